//! cipherfs - Transparent per-file content encryption
//!
//! This library exposes encrypted file content through a seekable
//! random-access channel. In forward mode ciphertext is persisted and
//! callers work with plaintext; in reverse mode plaintext is persisted and
//! callers work with ciphertext. File names and directory structure are
//! left as they are.

pub mod channel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fs;

pub use config::{Config, MountConfig, MountOptions};
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::channel::{CipherFileChannel, OpenOptions};
    pub use crate::config::{Config, MountConfig, MountOptions};
    pub use crate::crypto::{Mode, SecretKey};
    pub use crate::error::{Error, Result};
    pub use crate::fs::{EncPath, EncryptedFs, MountTable, PathMatcher};
}
