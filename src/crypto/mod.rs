//! Cryptographic primitives for cipherfs
//!
//! Content is transformed with AES in counter mode without padding, so
//! ciphertext and plaintext always have the same length. The counter
//! block of every file is derived from its mount-relative name (see
//! [`derive_iv`]), which lets one key serve every file of a mount.
//!
//! A key must therefore be dedicated to exactly one mount: two mounts
//! sharing a key and containing the same relative name reuse a keystream.

mod iv;
mod kdf;
mod stream;

pub use iv::derive_iv;
pub use kdf::{derive_key, generate_key, generate_salt};
pub use stream::{CipherWriter, Transform};

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Cipher block size in bytes, also the IV length
pub const BLOCK_SIZE: usize = 16;

/// Valid AES key lengths in bytes
pub const KEY_SIZES: [usize; 3] = [16, 24, 32];

/// Key length generated by default (AES-256)
pub const DEFAULT_KEY_SIZE: usize = 32;

/// Salt size for passphrase derivation
pub const SALT_SIZE: usize = 16;

/// Block cipher family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Aes,
}

/// Block cipher mode of operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    /// Counter mode, 128-bit big-endian counter
    Ctr,
}

/// Padding scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    NoPadding,
}

/// Algorithm/mode/padding triple, e.g. `AES/CTR/NoPadding`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSpec {
    pub algorithm: Algorithm,
    pub mode: BlockMode,
    pub padding: Padding,
}

impl CipherSpec {
    /// Parse the three components separately
    pub fn from_parts(algorithm: &str, mode: &str, padding: &str) -> Result<Self> {
        let algorithm = match algorithm.trim().to_ascii_uppercase().as_str() {
            "AES" => Algorithm::Aes,
            other => return Err(Error::Setup(format!("Unsupported cipher algorithm '{}'", other))),
        };
        let mode = match mode.trim().to_ascii_uppercase().as_str() {
            "CTR" => BlockMode::Ctr,
            other => return Err(Error::Setup(format!("Unsupported cipher mode '{}'", other))),
        };
        let padding = match padding.trim().to_ascii_uppercase().as_str() {
            "NOPADDING" => Padding::NoPadding,
            other => return Err(Error::Setup(format!("Unsupported padding '{}'", other))),
        };
        Ok(CipherSpec {
            algorithm,
            mode,
            padding,
        })
    }

    /// Block size of the algorithm in bytes
    pub fn block_size(&self) -> usize {
        match self.algorithm {
            Algorithm::Aes => BLOCK_SIZE,
        }
    }

    /// Check a key length against the algorithm
    pub fn check_key(&self, key: &SecretKey) -> Result<()> {
        match self.algorithm {
            Algorithm::Aes if KEY_SIZES.contains(&key.len()) => Ok(()),
            Algorithm::Aes => Err(Error::Setup(format!(
                "Invalid AES key length: {} bytes, expected 16, 24 or 32",
                key.len()
            ))),
        }
    }
}

impl Default for CipherSpec {
    fn default() -> Self {
        CipherSpec {
            algorithm: Algorithm::Aes,
            mode: BlockMode::Ctr,
            padding: Padding::NoPadding,
        }
    }
}

impl FromStr for CipherSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(algorithm), Some(mode), Some(padding), None) => {
                CipherSpec::from_parts(algorithm, mode, padding)
            }
            _ => Err(Error::Setup(format!(
                "Invalid cipher transformation '{}', expected algorithm/mode/padding",
                s
            ))),
        }
    }
}

impl fmt::Display for CipherSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let algorithm = match self.algorithm {
            Algorithm::Aes => "AES",
        };
        let mode = match self.mode {
            BlockMode::Ctr => "CTR",
        };
        let padding = match self.padding {
            Padding::NoPadding => "NoPadding",
        };
        write!(f, "{}/{}/{}", algorithm, mode, padding)
    }
}

/// Symmetric key material (zeroized on drop)
#[derive(Clone)]
pub struct SecretKey(Zeroizing<Vec<u8>>);

impl SecretKey {
    /// Wrap raw key bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        SecretKey(Zeroizing::new(bytes.into()))
    }

    /// Parse a hex encoded key
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| Error::Setup(format!("Invalid hex key: {}", e)))?;
        Ok(SecretKey::new(bytes))
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check for an empty key
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Hex encode the key (for persisting in a config file)
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([{} bytes redacted])", self.len())
    }
}

/// Direction of a transform pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Which side of the channel holds ciphertext
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Persisted bytes are ciphertext, callers see plaintext
    #[default]
    Forward,
    /// Persisted bytes are plaintext, callers see ciphertext
    Reverse,
}

impl Mode {
    pub fn from_reverse(reverse: bool) -> Self {
        if reverse {
            Mode::Reverse
        } else {
            Mode::Forward
        }
    }

    pub fn is_reverse(&self) -> bool {
        *self == Mode::Reverse
    }

    /// Transform applied when copying persisted bytes into the working copy
    pub fn load_direction(&self) -> Direction {
        match self {
            Mode::Forward => Direction::Decrypt,
            Mode::Reverse => Direction::Encrypt,
        }
    }

    /// Transform applied when writing the working copy back
    pub fn store_direction(&self) -> Direction {
        match self {
            Mode::Forward => Direction::Encrypt,
            Mode::Reverse => Direction::Decrypt,
        }
    }
}

/// Cipher spec plus key, validated together
#[derive(Debug, Clone)]
pub struct CipherConfig {
    spec: CipherSpec,
    key: SecretKey,
}

impl CipherConfig {
    /// Create a cipher configuration, rejecting keys the algorithm cannot use
    pub fn new(spec: CipherSpec, key: SecretKey) -> Result<Self> {
        spec.check_key(&key)?;
        Ok(CipherConfig { spec, key })
    }

    pub fn spec(&self) -> &CipherSpec {
        &self.spec
    }

    pub fn block_size(&self) -> usize {
        self.spec.block_size()
    }

    /// Build the transform for one file, keyed by its relative name
    pub fn transform(&self, direction: Direction, relative_name: &str) -> Result<Transform> {
        let iv = derive_iv(relative_name, self.block_size())?;
        Transform::new(&self.spec, &self.key, &iv, direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transformation() {
        let spec: CipherSpec = "AES/CTR/NoPadding".parse().unwrap();
        assert_eq!(spec, CipherSpec::default());
        assert_eq!(spec.to_string(), "AES/CTR/NoPadding");

        let spec = CipherSpec::from_parts("aes", "ctr", "nopadding").unwrap();
        assert_eq!(spec, CipherSpec::default());
    }

    #[test]
    fn test_reject_unsupported() {
        assert!(matches!(
            CipherSpec::from_parts("DES", "CTR", "NoPadding"),
            Err(Error::Setup(_))
        ));
        assert!(matches!(
            CipherSpec::from_parts("AES", "CBC", "NoPadding"),
            Err(Error::Setup(_))
        ));
        assert!(matches!(
            CipherSpec::from_parts("AES", "CTR", "PKCS5Padding"),
            Err(Error::Setup(_))
        ));
        assert!("AES/CTR".parse::<CipherSpec>().is_err());
    }

    #[test]
    fn test_key_lengths() {
        let spec = CipherSpec::default();
        for len in KEY_SIZES {
            assert!(CipherConfig::new(spec, SecretKey::new(vec![7u8; len])).is_ok());
        }
        assert!(matches!(
            CipherConfig::new(spec, SecretKey::new(vec![7u8; 15])),
            Err(Error::Setup(_))
        ));
    }

    #[test]
    fn test_mode_directions() {
        assert_eq!(Mode::Forward.load_direction(), Direction::Decrypt);
        assert_eq!(Mode::Forward.store_direction(), Direction::Encrypt);
        assert_eq!(Mode::Reverse.load_direction(), Direction::Encrypt);
        assert_eq!(Mode::Reverse.store_direction(), Direction::Decrypt);
        assert!(Mode::from_reverse(true).is_reverse());
    }

    #[test]
    fn test_key_debug_redacted() {
        let key = SecretKey::from_hex("00112233445566778899aabbccddeeff").unwrap();
        let debug = format!("{:?}", key);
        assert!(!debug.contains("0011"));
        assert!(debug.contains("16 bytes"));
    }
}
