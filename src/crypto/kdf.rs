//! Key material generation and passphrase derivation
//!
//! Mount keys are either random (stored hex encoded in the config file) or
//! derived from a passphrase with Argon2id, in which case only the salt is
//! stored.

use crate::config::KdfConfig;
use crate::crypto::{SecretKey, KEY_SIZES, SALT_SIZE};
use crate::error::{Error, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::Zeroizing;

/// Derive a key from a passphrase using Argon2id
///
/// # Arguments
/// * `passphrase` - The passphrase to derive from
/// * `salt` - Salt stored alongside the mount configuration
/// * `config` - Argon2 parameters
/// * `key_len` - Desired key length (16, 24 or 32)
pub fn derive_key(
    passphrase: &[u8],
    salt: &[u8],
    config: &KdfConfig,
    key_len: usize,
) -> Result<SecretKey> {
    if !KEY_SIZES.contains(&key_len) {
        return Err(Error::KeyDerivation(format!(
            "Unsupported key length: {} bytes",
            key_len
        )));
    }
    if salt.len() < SALT_SIZE {
        return Err(Error::KeyDerivation(format!(
            "Salt too short: {} bytes, need {}",
            salt.len(),
            SALT_SIZE
        )));
    }

    let params = Params::new(
        config.argon2_memory_kib,
        config.argon2_iterations,
        config.argon2_parallelism,
        Some(key_len),
    )
    .map_err(|e| Error::KeyDerivation(format!("Invalid Argon2 parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key_bytes = Zeroizing::new(vec![0u8; key_len]);
    argon2
        .hash_password_into(passphrase, salt, key_bytes.as_mut_slice())
        .map_err(|e| Error::KeyDerivation(format!("Key derivation failed: {}", e)))?;

    Ok(SecretKey::new(key_bytes.to_vec()))
}

/// Generate a random salt
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Generate a random key of the given length
pub fn generate_key(key_len: usize) -> SecretKey {
    let mut key = Zeroizing::new(vec![0u8; key_len]);
    rand::thread_rng().fill_bytes(key.as_mut_slice());
    SecretKey::new(key.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> KdfConfig {
        KdfConfig {
            argon2_memory_kib: 1024, // Low for testing
            argon2_iterations: 1,
            argon2_parallelism: 1,
            key_size: 16,
            salt: Vec::new(),
        }
    }

    #[test]
    fn test_derive_key_deterministic() {
        let config = test_config();
        let salt = generate_salt();

        let key1 = derive_key(b"passphrase", &salt, &config, 16).unwrap();
        let key2 = derive_key(b"passphrase", &salt, &config, 16).unwrap();

        assert_eq!(key1.len(), 16);
        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_different_passphrases_different_keys() {
        let config = test_config();
        let salt = generate_salt();

        let key1 = derive_key(b"passphrase1", &salt, &config, 32).unwrap();
        let key2 = derive_key(b"passphrase2", &salt, &config, 32).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_rejects_short_salt() {
        let result = derive_key(b"pw", &[0u8; 4], &test_config(), 16);
        assert!(matches!(result, Err(Error::KeyDerivation(_))));
    }

    #[test]
    fn test_derive_key_rejects_bad_length() {
        let result = derive_key(b"pw", &generate_salt(), &test_config(), 20);
        assert!(matches!(result, Err(Error::KeyDerivation(_))));
    }

    #[test]
    fn test_generate_key() {
        let a = generate_key(32);
        let b = generate_key(32);
        assert_eq!(a.len(), 32);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
