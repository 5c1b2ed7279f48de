//! Registry of active mounts
//!
//! A [`MountTable`] maps URI schemes to mounts. At most one mount may be
//! active per scheme within a table; tables themselves are ordinary values,
//! so independent tables (and mounts created without any table) coexist.
//!
//! Mounting through a table also sweeps stale scratch files of the mount's
//! scratch directory (see [`EncryptedFs::sweep_scratch`]).

use crate::config::MountOptions;
use crate::error::{Error, Result};
use crate::fs::{EncPath, EncryptedFs};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Active mounts by scheme
#[derive(Default)]
pub struct MountTable {
    mounts: RwLock<HashMap<String, Arc<EncryptedFs>>>,
}

fn parse_uri(uri: &str) -> Result<Url> {
    Url::parse(uri).map_err(|e| Error::Setup(format!("Invalid URI '{}': {}", uri, e)))
}

/// `scheme:///...` with an empty authority
fn is_local(url: &Url) -> bool {
    url.has_authority()
        && url.host_str().map_or(true, str::is_empty)
        && url.username().is_empty()
        && url.port().is_none()
        && url.query().is_none()
        && url.fragment().is_none()
}

/// Percent-decoded absolute path of a `scheme:///path` URI
fn decoded_path(url: &Url) -> Option<PathBuf> {
    let mut file = Url::parse("file:///").ok()?;
    file.set_path(url.path());
    file.to_file_path().ok()
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Establish a mount for the scheme of `uri` (e.g. `enc:///`)
    pub fn mount(&self, uri: &str, options: &MountOptions) -> Result<Arc<EncryptedFs>> {
        let url = parse_uri(uri)?;
        if !is_local(&url) || url.path() != "/" {
            return Err(Error::Setup(format!(
                "Invalid mount URI '{}', expected {}:///",
                uri,
                url.scheme()
            )));
        }
        let scheme = url.scheme().to_string();

        let mut mounts = self.mounts.write();
        if mounts.contains_key(&scheme) {
            return Err(Error::AlreadyExists(scheme));
        }

        let fs = EncryptedFs::from_options(scheme.clone(), options)?;
        info!(
            "Mounted {}:// at {:?} ({}, {:?})",
            scheme,
            fs.root(),
            fs.config().cipher().spec(),
            fs.config().mode()
        );
        if let Err(e) = fs.sweep_scratch() {
            warn!("Scratch sweep for {}:// failed: {}", scheme, e);
        }
        mounts.insert(scheme, Arc::clone(&fs));
        Ok(fs)
    }

    /// Look up the mount for the scheme of `uri`
    pub fn get(&self, uri: &str) -> Result<Arc<EncryptedFs>> {
        let url = parse_uri(uri)?;
        self.lookup(url.scheme())
    }

    fn lookup(&self, scheme: &str) -> Result<Arc<EncryptedFs>> {
        self.mounts
            .read()
            .get(scheme)
            .cloned()
            .ok_or_else(|| Error::MountNotFound(scheme.to_string()))
    }

    /// Remove a mount; open channels keep working until closed
    pub fn unmount(&self, scheme: &str) -> Option<Arc<EncryptedFs>> {
        let removed = self.mounts.write().remove(&scheme.to_ascii_lowercase());
        if removed.is_some() {
            info!("Unmounted {}://", scheme);
        }
        removed
    }

    /// Resolve `scheme:///absolute/path` into a wrapped path
    pub fn path_from_uri(&self, uri: &str) -> Result<EncPath> {
        let url = parse_uri(uri)?;
        let fs = self.lookup(url.scheme())?;
        if !is_local(&url) {
            return Err(Error::Setup(format!("Invalid path URI '{}'", uri)));
        }
        let path = decoded_path(&url)
            .ok_or_else(|| Error::Setup(format!("Invalid path URI '{}'", uri)))?;
        Ok(fs.path(path))
    }

    /// Schemes currently mounted
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.mounts.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;
    use std::path::Path;

    fn options() -> MountOptions {
        MountOptions::aes_ctr(SecretKey::new(vec![1u8; 16])).with_root("/data")
    }

    #[test]
    fn test_mount_once_per_scheme() {
        let table = MountTable::new();
        table.mount("enc:///", &options()).unwrap();

        assert!(matches!(
            table.mount("enc:///", &options()),
            Err(Error::AlreadyExists(ref s)) if s == "enc"
        ));
        assert!(matches!(
            table.mount("ENC:///", &options()),
            Err(Error::AlreadyExists(_))
        ));

        // A different scheme is independent.
        table.mount("enc2:///", &options().with_reverse(true)).unwrap();
        assert_eq!(table.schemes(), vec!["enc".to_string(), "enc2".to_string()]);
    }

    #[test]
    fn test_independent_tables() {
        let a = MountTable::new();
        let b = MountTable::new();
        a.mount("enc:///", &options()).unwrap();
        b.mount("enc:///", &options()).unwrap();
    }

    #[test]
    fn test_invalid_uris() {
        let table = MountTable::new();
        assert!(matches!(table.mount("enc:/", &options()), Err(Error::Setup(_))));
        assert!(matches!(table.mount("no-scheme", &options()), Err(Error::Setup(_))));
        assert!(matches!(table.mount("1x:///", &options()), Err(Error::Setup(_))));
    }

    #[test]
    fn test_failed_setup_does_not_register() {
        let table = MountTable::new();
        let mut bad = options();
        bad.key = None;
        assert!(matches!(table.mount("enc:///", &bad), Err(Error::Setup(_))));
        assert!(table.mount("enc:///", &options()).is_ok());
    }

    #[test]
    fn test_get_and_unmount() {
        let table = MountTable::new();
        assert!(matches!(table.get("enc:///"), Err(Error::MountNotFound(_))));

        let fs = table.mount("enc:///", &options()).unwrap();
        assert!(Arc::ptr_eq(&table.get("enc:///x").unwrap(), &fs));

        assert!(table.unmount("enc").is_some());
        assert!(table.unmount("enc").is_none());
        assert!(matches!(table.get("enc:///"), Err(Error::MountNotFound(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_mount_sweeps_scratch_dir() {
        let scratch = tempfile::tempdir().unwrap();
        // Beyond any real pid_max.
        let stale = scratch.path().join("cipherfs-2147483002-m.dat");
        std::fs::write(&stale, b"old").unwrap();

        let table = MountTable::new();
        table
            .mount("enc:///", &options().with_scratch_dir(scratch.path()))
            .unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn test_path_from_uri_decodes_escapes() {
        let table = MountTable::new();
        table.mount("enc:///", &options()).unwrap();

        let path = table.path_from_uri("enc:///data/my%20dir/a%23b").unwrap();
        assert_eq!(path.as_physical(), Path::new("/data/my dir/a#b"));
        assert_eq!(path.relative_name().unwrap(), "my dir/a#b");
        assert!(table.path_from_uri("enc://host/data/x").is_err());
    }

    #[test]
    fn test_path_from_uri() {
        let table = MountTable::new();
        let fs = table.mount("enc:///", &options()).unwrap();

        let path = table.path_from_uri("enc:///data/sub/file").unwrap();
        assert!(path.belongs_to(&fs));
        assert_eq!(path.as_physical(), Path::new("/data/sub/file"));
        assert_eq!(path.relative_name().unwrap(), "sub/file");

        assert!(table.path_from_uri("enc:relative").is_err());
        assert!(matches!(
            table.path_from_uri("other:///x"),
            Err(Error::MountNotFound(_))
        ));
    }
}
