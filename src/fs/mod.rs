//! Path/provider delegation layer
//!
//! Resolves wrapped paths to physical files, opens transform channels on
//! them and forwards every other filesystem operation unchanged to the
//! host filesystem.

mod filesystem;
mod matcher;
mod mounts;
mod path;

pub use filesystem::{AccessMode, EncDirEntry, EncryptedFs};
pub use matcher::PathMatcher;
pub use mounts::MountTable;
pub use path::{normalize_path, EncPath};
