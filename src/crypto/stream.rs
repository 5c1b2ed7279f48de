//! Streaming keystream transform
//!
//! A [`Transform`] is the keyed cipher state for one pass over one file.
//! Counter mode is symmetric, so encryption and decryption apply the same
//! keystream; the direction is kept for diagnostics.

use crate::crypto::{BlockMode, CipherSpec, Direction, SecretKey};
use crate::error::{Error, Result};
use aes::{Aes128, Aes192, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher};
use std::io::{self, Read, Write};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

enum Keystream {
    Aes128(Aes128Ctr),
    Aes192(Aes192Ctr),
    Aes256(Aes256Ctr),
}

impl Keystream {
    fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        let rejected = |e: ctr::cipher::InvalidLength| {
            Error::Transform(format!("Cipher rejected key or IV: {}", e))
        };
        match key.len() {
            16 => Aes128Ctr::new_from_slices(key, iv)
                .map(Keystream::Aes128)
                .map_err(rejected),
            24 => Aes192Ctr::new_from_slices(key, iv)
                .map(Keystream::Aes192)
                .map_err(rejected),
            32 => Aes256Ctr::new_from_slices(key, iv)
                .map(Keystream::Aes256)
                .map_err(rejected),
            n => Err(Error::Transform(format!("Invalid AES key length: {} bytes", n))),
        }
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Keystream::Aes128(c) => c.apply_keystream(buf),
            Keystream::Aes192(c) => c.apply_keystream(buf),
            Keystream::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

/// Cipher state for one sequential pass over a file
pub struct Transform {
    direction: Direction,
    keystream: Keystream,
    processed: u64,
}

impl Transform {
    /// Key a new transform
    pub fn new(spec: &CipherSpec, key: &SecretKey, iv: &[u8], direction: Direction) -> Result<Self> {
        let keystream = match spec.mode {
            BlockMode::Ctr => Keystream::new(key.as_bytes(), iv)?,
        };
        Ok(Transform {
            direction,
            keystream,
            processed: 0,
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Bytes transformed so far
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Transform a buffer in place, continuing the keystream
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.keystream.apply(buf);
        self.processed += buf.len() as u64;
    }

    /// Stream everything from `reader` through the transform into `writer`
    ///
    /// Returns the number of bytes copied.
    pub fn copy<R: Read + ?Sized, W: Write>(self, reader: &mut R, writer: W) -> io::Result<u64> {
        let mut output = CipherWriter::new(writer, self);
        let copied = io::copy(reader, &mut output)?;
        output.finish()?;
        Ok(copied)
    }
}

/// Transforms everything written to it before passing it on
pub struct CipherWriter<W: Write> {
    inner: W,
    transform: Transform,
    // Scratch buffer reused between writes.
    buf: Vec<u8>,
}

impl<W: Write> CipherWriter<W> {
    pub fn new(inner: W, transform: Transform) -> Self {
        CipherWriter {
            inner,
            transform,
            buf: Vec::new(),
        }
    }

    /// Flush and hand back the inner writer
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for CipherWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.clear();
        self.buf.extend_from_slice(data);
        self.transform.apply(&mut self.buf);
        self.inner.write_all(&self.buf)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_iv, BLOCK_SIZE};
    use std::io::Cursor;

    fn transform(key: &[u8], name: &str, direction: Direction) -> Transform {
        let iv = derive_iv(name, BLOCK_SIZE).unwrap();
        Transform::new(&CipherSpec::default(), &SecretKey::new(key), &iv, direction).unwrap()
    }

    #[test]
    fn test_aes128_ctr_known_answer() {
        // NIST SP 800-38A F.5.1, first block
        let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let iv = hex::decode("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff").unwrap();
        let mut data = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();

        let mut t = Transform::new(&CipherSpec::default(), &SecretKey::new(key), &iv, Direction::Encrypt)
            .unwrap();
        t.apply(&mut data);
        assert_eq!(hex::encode(&data), "874d6191b620e3261bef6864990db6ce");
        assert_eq!(t.processed(), 16);
    }

    #[test]
    fn test_copy_roundtrip_all_key_sizes() {
        let plaintext: Vec<u8> = (0..100_000u32).map(|i| (i * 31 % 251) as u8).collect();
        for len in [16, 24, 32] {
            let key = vec![0x5au8; len];

            let mut ciphertext = Vec::new();
            transform(&key, "a/b", Direction::Encrypt)
                .copy(&mut Cursor::new(&plaintext), &mut ciphertext)
                .unwrap();
            assert_eq!(ciphertext.len(), plaintext.len());
            assert_ne!(ciphertext, plaintext);

            let mut decrypted = Vec::new();
            let copied = transform(&key, "a/b", Direction::Decrypt)
                .copy(&mut Cursor::new(&ciphertext), &mut decrypted)
                .unwrap();
            assert_eq!(copied, plaintext.len() as u64);
            assert_eq!(decrypted, plaintext);
        }
    }

    #[test]
    fn test_split_writes_match_single_pass() {
        let key = [1u8; 16];
        let data = b"The quick brown fox jumps over the lazy dog".to_vec();

        let mut whole = data.clone();
        transform(&key, "n", Direction::Encrypt).apply(&mut whole);

        let mut writer = CipherWriter::new(Vec::new(), transform(&key, "n", Direction::Encrypt));
        for piece in data.chunks(5) {
            writer.write_all(piece).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), whole);
    }

    #[test]
    fn test_different_names_different_ciphertext() {
        let key = [9u8; 16];
        let mut a = vec![0u8; 32];
        let mut b = vec![0u8; 32];
        transform(&key, "one", Direction::Encrypt).apply(&mut a);
        transform(&key, "two", Direction::Encrypt).apply(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_key_rejected() {
        let iv = [0u8; BLOCK_SIZE];
        let result = Transform::new(&CipherSpec::default(), &SecretKey::new(vec![0u8; 10]), &iv, Direction::Encrypt);
        assert!(matches!(result, Err(Error::Transform(_))));
    }
}
