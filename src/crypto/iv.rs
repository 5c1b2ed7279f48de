//! Per-file initialization vectors
//!
//! The IV is the MD5 digest of the file's mount-relative name, cut to the
//! cipher block size. It is deterministic, so the same name always maps to
//! the same keystream under a given key.

use crate::error::{Error, Result};
use md5::{Digest, Md5};

/// Derive the IV for a relative name
///
/// # Arguments
/// * `relative_name` - Path relative to the mount root, `/` separated
/// * `block_size` - Cipher block size; must not exceed the digest length
pub fn derive_iv(relative_name: &str, block_size: usize) -> Result<Vec<u8>> {
    let digest = Md5::digest(relative_name.as_bytes());
    if block_size > digest.len() {
        return Err(Error::Transform(format!(
            "Digest too short for IV: {} bytes, need {}",
            digest.len(),
            block_size
        )));
    }
    Ok(digest[..block_size].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::BLOCK_SIZE;

    #[test]
    fn test_iv_known_digest() {
        let iv = derive_iv("", BLOCK_SIZE).unwrap();
        assert_eq!(hex::encode(iv), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_iv_deterministic() {
        let a = derive_iv("sub/file", BLOCK_SIZE).unwrap();
        let b = derive_iv("sub/file", BLOCK_SIZE).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), BLOCK_SIZE);
    }

    #[test]
    fn test_iv_unique_per_name() {
        let names = ["sub/file", "sub/file2", "sub/File", "file", "sub", "a/b/c"];
        let ivs: Vec<_> = names
            .iter()
            .map(|n| derive_iv(n, BLOCK_SIZE).unwrap())
            .collect();
        for i in 0..ivs.len() {
            for j in (i + 1)..ivs.len() {
                assert_ne!(ivs[i], ivs[j], "{} vs {}", names[i], names[j]);
            }
        }
    }

    #[test]
    fn test_iv_block_size_too_large() {
        assert!(matches!(derive_iv("x", 32), Err(Error::Transform(_))));
    }
}
