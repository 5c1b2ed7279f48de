//! Mounted encrypted filesystem
//!
//! [`EncryptedFs`] is the delegation layer above the host filesystem. Opening
//! a file yields a [`CipherFileChannel`]; every other operation is forwarded
//! unchanged to `std::fs` on the unwrapped physical path, and paths coming
//! back are wrapped into the mount again.

use crate::channel::{sweep_stale, CipherFileChannel, OpenOptions};
use crate::config::{MountConfig, MountOptions};
use crate::error::{Error, Result};
use crate::fs::{EncPath, PathMatcher};
use std::ffi::OsString;
use std::fs::{self, Metadata, Permissions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Access modes of [`EncryptedFs::check_access`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
}

/// Directory entry, wrapped into the mount
#[derive(Debug, Clone)]
pub struct EncDirEntry {
    pub path: EncPath,
    pub name: OsString,
    pub file_type: fs::FileType,
}

/// One mount: a scheme plus an immutable mount configuration
///
/// A mount created directly (rather than through a
/// [`MountTable`](crate::fs::MountTable)) does not clean up scratch files
/// left by crashed processes; call [`EncryptedFs::sweep_scratch`] once at
/// start-up.
pub struct EncryptedFs {
    scheme: String,
    config: Arc<MountConfig>,
}

impl EncryptedFs {
    /// Create a mount from a validated configuration
    pub fn new(scheme: impl Into<String>, config: MountConfig) -> Arc<Self> {
        Arc::new(EncryptedFs {
            scheme: scheme.into(),
            config: Arc::new(config),
        })
    }

    /// Validate `options` and create a mount
    pub fn from_options(scheme: impl Into<String>, options: &MountOptions) -> Result<Arc<Self>> {
        Ok(Self::new(scheme, options.build()?))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn config(&self) -> &Arc<MountConfig> {
        &self.config
    }

    /// Root anchoring relative names
    pub fn root(&self) -> &Path {
        self.config.root()
    }

    /// Wrap a physical path into this mount
    pub fn path(self: &Arc<Self>, path: impl Into<PathBuf>) -> EncPath {
        EncPath::wrap(self, path)
    }

    /// Root directories of the underlying store, wrapped into this mount
    pub fn root_directories(self: &Arc<Self>) -> Vec<EncPath> {
        vec![self.path(std::path::MAIN_SEPARATOR_STR)]
    }

    /// Compile a `glob:` or `regex:` pattern into a matcher for this mount
    pub fn path_matcher(self: &Arc<Self>, syntax_and_pattern: &str) -> Result<PathMatcher> {
        PathMatcher::new(self, syntax_and_pattern)
    }

    /// Remove scratch files of dead processes from the scratch directory
    ///
    /// Returns the number of files removed.
    pub fn sweep_scratch(&self) -> Result<usize> {
        let removed = sweep_stale(self.config.scratch_dir())?;
        if removed > 0 {
            debug!(
                "Swept {} stale scratch file(s) from {:?}",
                removed,
                self.config.scratch_dir()
            );
        }
        Ok(removed)
    }

    /// Unwrap a path, rejecting paths of other mounts
    fn dismantle<'a>(&self, path: &'a EncPath) -> Result<&'a Path> {
        if path.belongs_to(self) {
            Ok(path.as_physical())
        } else {
            Err(Error::ForeignPath(format!(
                "{} (mounted as '{}', used with '{}')",
                path,
                path.mount().scheme(),
                self.scheme
            )))
        }
    }

    /// Open a transform channel on a file
    pub fn open(&self, path: &EncPath, options: &OpenOptions) -> Result<CipherFileChannel> {
        let physical = self.dismantle(path)?;
        let relative_name = self.config.relative_name(physical)?;
        debug!("open {:?} as {:?} with {:?}", physical, relative_name, options);
        CipherFileChannel::open(physical, relative_name, Arc::clone(&self.config), options)
    }

    /// Read the whole transformed content of a file
    pub fn read(&self, path: &EncPath) -> Result<Vec<u8>> {
        let mut channel = self.open(path, &OpenOptions::new().read(true))?;
        let mut content = Vec::with_capacity(channel.size()? as usize);
        channel.read_to_end(&mut content)?;
        channel.close()?;
        Ok(content)
    }

    /// Replace the content of a file, creating it if needed
    pub fn write(&self, path: &EncPath, contents: &[u8]) -> Result<()> {
        let mut channel = self.open(path, &OpenOptions::overwrite())?;
        // Empty contents never materialize, so drop the old bytes here.
        channel.truncate(0)?;
        channel.write_all(contents)?;
        channel.close()
    }

    /// Create an empty file; fails if it exists
    pub fn create_file(&self, path: &EncPath) -> Result<()> {
        let physical = self.dismantle(path)?;
        debug!("create {:?}", physical);
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(physical)?;
        Ok(())
    }

    pub fn metadata(&self, path: &EncPath) -> Result<Metadata> {
        Ok(fs::metadata(self.dismantle(path)?)?)
    }

    pub fn symlink_metadata(&self, path: &EncPath) -> Result<Metadata> {
        Ok(fs::symlink_metadata(self.dismantle(path)?)?)
    }

    pub fn exists(&self, path: &EncPath) -> bool {
        self.dismantle(path).map(Path::exists).unwrap_or(false)
    }

    /// Check access to a path
    ///
    /// Only the existence check (no modes) is implemented.
    pub fn check_access(&self, path: &EncPath, modes: &[AccessMode]) -> Result<()> {
        let physical = self.dismantle(path)?;
        if !modes.is_empty() {
            return Err(Error::Unsupported(format!(
                "access check for {:?} on {}",
                modes, path
            )));
        }
        if physical.exists() {
            Ok(())
        } else {
            Err(Error::PathNotFound(path.to_string()))
        }
    }

    pub fn create_dir(&self, path: &EncPath) -> Result<()> {
        let physical = self.dismantle(path)?;
        debug!("mkdir {:?}", physical);
        Ok(fs::create_dir(physical)?)
    }

    pub fn create_dir_all(&self, path: &EncPath) -> Result<()> {
        let physical = self.dismantle(path)?;
        debug!("mkdir -p {:?}", physical);
        Ok(fs::create_dir_all(physical)?)
    }

    /// List a directory
    pub fn read_dir(self: &Arc<Self>, path: &EncPath) -> Result<Vec<EncDirEntry>> {
        self.read_dir_filtered(path, |_| Ok(true))
    }

    /// List the entries of a directory whose wrapped path passes `filter`
    ///
    /// An error from the filter aborts the listing.
    pub fn read_dir_filtered<F>(
        self: &Arc<Self>,
        path: &EncPath,
        mut filter: F,
    ) -> Result<Vec<EncDirEntry>>
    where
        F: FnMut(&EncPath) -> Result<bool>,
    {
        let physical = self.dismantle(path)?;
        let mut entries = Vec::new();

        for entry in fs::read_dir(physical)? {
            let entry = entry?;
            let wrapped = self.path(entry.path());
            if !filter(&wrapped)? {
                continue;
            }
            entries.push(EncDirEntry {
                path: wrapped,
                name: entry.file_name(),
                file_type: entry.file_type()?,
            });
        }

        Ok(entries)
    }

    pub fn remove_file(&self, path: &EncPath) -> Result<()> {
        let physical = self.dismantle(path)?;
        debug!("unlink {:?}", physical);
        Ok(fs::remove_file(physical)?)
    }

    pub fn remove_dir(&self, path: &EncPath) -> Result<()> {
        let physical = self.dismantle(path)?;
        debug!("rmdir {:?}", physical);
        Ok(fs::remove_dir(physical)?)
    }

    /// Copy persisted bytes as they are
    ///
    /// The IV depends on the relative name, so in forward mode the copy
    /// does not decrypt under its new name.
    pub fn copy(&self, from: &EncPath, to: &EncPath) -> Result<u64> {
        let (from, to) = (self.dismantle(from)?, self.dismantle(to)?);
        debug!("copy {:?} -> {:?}", from, to);
        Ok(fs::copy(from, to)?)
    }

    /// Rename without touching content (same IV caveat as [`Self::copy`])
    pub fn rename(&self, from: &EncPath, to: &EncPath) -> Result<()> {
        let (from, to) = (self.dismantle(from)?, self.dismantle(to)?);
        debug!("rename {:?} -> {:?}", from, to);
        Ok(fs::rename(from, to)?)
    }

    pub fn hard_link(&self, original: &EncPath, link: &EncPath) -> Result<()> {
        let (original, link) = (self.dismantle(original)?, self.dismantle(link)?);
        Ok(fs::hard_link(original, link)?)
    }

    #[cfg(unix)]
    pub fn symlink(&self, target: &EncPath, link: &EncPath) -> Result<()> {
        let (target, link) = (self.dismantle(target)?, self.dismantle(link)?);
        Ok(std::os::unix::fs::symlink(target, link)?)
    }

    pub fn read_link(self: &Arc<Self>, path: &EncPath) -> Result<EncPath> {
        let target = fs::read_link(self.dismantle(path)?)?;
        Ok(self.path(target))
    }

    /// Dot files are hidden
    pub fn is_hidden(&self, path: &EncPath) -> Result<bool> {
        let physical = self.dismantle(path)?;
        Ok(physical
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(false))
    }

    pub fn is_same_file(&self, a: &EncPath, b: &EncPath) -> Result<bool> {
        let (a, b) = (self.dismantle(a)?, self.dismantle(b)?);
        if a == b {
            return Ok(true);
        }
        Ok(fs::canonicalize(a)? == fs::canonicalize(b)?)
    }

    pub fn set_permissions(&self, path: &EncPath, permissions: Permissions) -> Result<()> {
        Ok(fs::set_permissions(self.dismantle(path)?, permissions)?)
    }

    /// Change notification is not provided
    pub fn watch(&self, path: &EncPath) -> Result<()> {
        Err(Error::Unsupported(format!("watch service for {}", path)))
    }
}

impl std::fmt::Debug for EncryptedFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFs")
            .field("scheme", &self.scheme)
            .field("root", &self.config.root())
            .field("mode", &self.config.mode())
            .finish()
    }
}
