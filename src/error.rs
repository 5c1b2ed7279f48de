//! Error types for cipherfs
//!
//! Every failure in the crate is reported through [`Error`]. Cipher and
//! digest failures are folded into [`Error::Transform`] so callers only
//! ever see one error surface, and [`Error`] converts into
//! [`std::io::Error`] for the `Read`/`Write`/`Seek` implementations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by cipherfs
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid cipher configuration at mount time
    #[error("Setup error: {0}")]
    Setup(String),

    /// Configuration file could not be read, parsed or written
    #[error("Configuration error: {0}")]
    Config(String),

    /// Physical file missing when a channel is constructed
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// Key, algorithm or IV rejected by the cipher primitive
    #[error("Transform error: {0}")]
    Transform(String),

    /// Passphrase key derivation failed
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Operation attempted on a closed channel
    #[error("Channel is closed")]
    ClosedChannel,

    /// Underlying storage failure on the persistent or scratch store
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation deliberately not implemented by the delegation layer
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A mount is already registered for this scheme
    #[error("Mount already exists for scheme '{0}'")]
    AlreadyExists(String),

    /// No mount is registered for this scheme
    #[error("No mount registered for scheme '{0}'")]
    MountNotFound(String),

    /// Path does not live below the mount root
    #[error("Path {path:?} is outside the mount root {root:?}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    /// Path that cannot be used for the requested operation
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: PathBuf, reason: &'static str },

    /// Malformed path matcher pattern
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// Path was wrapped by a different mount
    #[error("Path belongs to another mount: {0}")]
    ForeignPath(String),

    /// The close-time store transform did not complete; the working copy
    /// was kept so its content can be recovered
    #[error("Store transform failed, working copy kept at {scratch:?}: {source}")]
    StoreIncomplete {
        scratch: PathBuf,
        #[source]
        source: Box<Error>,
    },

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map onto the closest [`io::ErrorKind`]
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Error::Io(e) => e.kind(),
            Error::PathNotFound(_) | Error::MountNotFound(_) => io::ErrorKind::NotFound,
            Error::AlreadyExists(_) => io::ErrorKind::AlreadyExists,
            Error::ClosedChannel => io::ErrorKind::BrokenPipe,
            Error::Unsupported(_) => io::ErrorKind::Unsupported,
            Error::Setup(_)
            | Error::Config(_)
            | Error::OutsideRoot { .. }
            | Error::InvalidPath { .. }
            | Error::InvalidPattern(_)
            | Error::ForeignPath(_) => io::ErrorKind::InvalidInput,
            Error::StoreIncomplete { source, .. } => source.kind(),
            Error::Transform(_) | Error::KeyDerivation(_) | Error::Internal(_) => {
                io::ErrorKind::Other
            }
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            other => io::Error::new(other.kind(), other),
        }
    }
}
