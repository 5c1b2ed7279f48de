//! Paths wrapped by a mount
//!
//! An [`EncPath`] is an ordinary physical path tagged with the mount it
//! belongs to. Conversions between the two are explicit: [`EncPath::wrap`]
//! on the way in and [`EncPath::as_physical`] / [`EncPath::into_physical`]
//! on the way out to the underlying store.

use crate::error::{Error, Result};
use crate::fs::EncryptedFs;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Lexically normalize a path, dropping `.` and resolving `..`
///
/// Never touches the filesystem. `..` above the root stays at the root.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// A physical path together with its owning mount
#[derive(Clone)]
pub struct EncPath {
    mount: Arc<EncryptedFs>,
    inner: PathBuf,
}

impl EncPath {
    /// Wrap a physical path into `mount`
    pub fn wrap(mount: &Arc<EncryptedFs>, path: impl Into<PathBuf>) -> Self {
        EncPath {
            mount: Arc::clone(mount),
            inner: path.into(),
        }
    }

    /// The mount this path belongs to
    pub fn mount(&self) -> &Arc<EncryptedFs> {
        &self.mount
    }

    /// The underlying physical path
    pub fn as_physical(&self) -> &Path {
        &self.inner
    }

    /// Unwrap into the underlying physical path
    pub fn into_physical(self) -> PathBuf {
        self.inner
    }

    /// Check whether this path was wrapped by `mount`
    pub fn belongs_to(&self, mount: &EncryptedFs) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.mount), mount)
    }

    pub fn join(&self, path: impl AsRef<Path>) -> EncPath {
        EncPath::wrap(&self.mount, self.inner.join(path))
    }

    pub fn parent(&self) -> Option<EncPath> {
        self.inner
            .parent()
            .map(|p| EncPath::wrap(&self.mount, p))
    }

    pub fn file_name(&self) -> Option<&OsStr> {
        self.inner.file_name()
    }

    /// Name relative to the mount root, the input of IV derivation
    pub fn relative_name(&self) -> Result<String> {
        self.mount.config().relative_name(&self.inner)
    }

    pub fn is_absolute(&self) -> bool {
        self.inner.is_absolute()
    }

    /// Lexically normalized form (see [`normalize_path`])
    pub fn normalize(&self) -> EncPath {
        EncPath::wrap(&self.mount, normalize_path(&self.inner))
    }

    /// Absolute form against the current directory, without touching the disk
    pub fn to_absolute(&self) -> Result<EncPath> {
        Ok(EncPath::wrap(&self.mount, std::path::absolute(&self.inner)?))
    }

    /// Canonical form with symlinks resolved; the path must exist
    pub fn to_real_path(&self) -> Result<EncPath> {
        Ok(EncPath::wrap(&self.mount, std::fs::canonicalize(&self.inner)?))
    }

    /// Replace the file name, keeping the parent
    pub fn resolve_sibling(&self, other: impl AsRef<Path>) -> EncPath {
        let sibling = match self.inner.parent() {
            Some(parent) => parent.join(other),
            None => other.as_ref().to_path_buf(),
        };
        EncPath::wrap(&self.mount, sibling)
    }

    /// Component-wise prefix test; paths of other mounts never match
    pub fn starts_with(&self, base: &EncPath) -> bool {
        Arc::ptr_eq(&self.mount, &base.mount) && self.inner.starts_with(&base.inner)
    }

    /// Component-wise suffix test; paths of other mounts never match
    pub fn ends_with(&self, child: &EncPath) -> bool {
        Arc::ptr_eq(&self.mount, &child.mount) && self.inner.ends_with(&child.inner)
    }

    /// Relative path leading from `self` to `other`
    ///
    /// Both paths are normalized first; `..` is emitted for every component
    /// of `self` not shared with `other`.
    pub fn relativize(&self, other: &EncPath) -> Result<EncPath> {
        if !Arc::ptr_eq(&self.mount, &other.mount) {
            return Err(Error::ForeignPath(other.to_string()));
        }
        if self.inner.is_absolute() != other.inner.is_absolute() {
            return Err(Error::InvalidPath {
                path: other.inner.clone(),
                reason: "cannot relativize between absolute and relative paths",
            });
        }

        let base = normalize_path(&self.inner);
        let target = normalize_path(&other.inner);
        let base: Vec<Component> = base.components().collect();
        let target: Vec<Component> = target.components().collect();
        let common = base
            .iter()
            .zip(&target)
            .take_while(|(a, b)| a == b)
            .count();

        let mut out = PathBuf::new();
        for _ in common..base.len() {
            out.push("..");
        }
        for component in &target[common..] {
            out.push(component.as_os_str());
        }
        Ok(EncPath::wrap(&self.mount, out))
    }

    /// URI form, e.g. `enc:///data/sub/file`
    pub fn to_uri(&self) -> String {
        let path = std::path::absolute(&self.inner).unwrap_or_else(|_| self.inner.clone());
        let path = normalize_path(&path);
        match Url::from_file_path(&path) {
            Ok(url) => format!(
                "{}:{}",
                self.mount.scheme(),
                url.as_str().trim_start_matches("file:")
            ),
            Err(()) => format!("{}://{}", self.mount.scheme(), path.to_string_lossy()),
        }
    }
}

impl PartialEq for EncPath {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.mount, &other.mount) && self.inner == other.inner
    }
}

impl Eq for EncPath {}

impl fmt::Debug for EncPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EncPath")
            .field(&self.mount.scheme())
            .field(&self.inner)
            .finish()
    }
}

impl fmt::Display for EncPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.display())
    }
}
