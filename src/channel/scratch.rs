//! Private scratch storage for working copies
//!
//! Each materialized channel owns one scratch file created with owner-only
//! permissions. Files are named `cipherfs-<pid>-*.dat` so that copies left
//! behind by a process that died without cleaning up can be swept later.
//! A working copy that could not be written back is renamed to
//! `cipherfs-unsaved-*.dat`, which the sweep never touches.

use crate::error::Result;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};

/// Prefix shared by every scratch file
pub const SCRATCH_PREFIX: &str = "cipherfs-";

/// Suffix shared by every scratch file
pub const SCRATCH_SUFFIX: &str = ".dat";

const UNSAVED_PREFIX: &str = "cipherfs-unsaved-";

/// A working copy on disk, deleted when dropped
pub struct ScratchFile {
    file: NamedTempFile,
}

impl ScratchFile {
    /// Create an empty scratch file in `dir`
    pub fn create(dir: &Path) -> Result<Self> {
        let prefix = format!("{}{}-", SCRATCH_PREFIX, std::process::id());
        let file = Builder::new()
            .prefix(&prefix)
            .suffix(SCRATCH_SUFFIX)
            .tempfile_in(dir)?;
        debug!("Created scratch file {:?}", file.path());
        Ok(ScratchFile { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn file(&self) -> &File {
        self.file.as_file()
    }

    pub fn file_mut(&mut self) -> &mut File {
        self.file.as_file_mut()
    }

    /// Delete the scratch file
    pub fn discard(self) -> io::Result<()> {
        let path = self.file.path().to_path_buf();
        self.file.close()?;
        debug!("Removed scratch file {:?}", path);
        Ok(())
    }

    /// Keep the scratch file on disk and return where it ended up
    pub fn preserve(self) -> PathBuf {
        let dir = self
            .file
            .path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let name = self
            .file
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = dir.join(format!(
            "{}{}",
            UNSAVED_PREFIX,
            name.trim_start_matches(SCRATCH_PREFIX)
        ));

        match self.file.persist_noclobber(&target) {
            Ok(_) => {
                warn!("Kept unsaved working copy at {:?}", target);
                target
            }
            Err(e) => {
                let file = e.file;
                match file.keep() {
                    Ok((_, path)) => {
                        warn!("Kept unsaved working copy at {:?}", path);
                        path
                    }
                    Err(e) => {
                        let path = e.file.path().to_path_buf();
                        warn!("Could not keep working copy {:?}: {}", path, e.error);
                        // Dropping the temp file would delete the data.
                        std::mem::forget(e.file);
                        path
                    }
                }
            }
        }
    }
}

/// Extract the owning process id from a scratch file name
fn owner_pid(name: &str) -> Option<u32> {
    let rest = name.strip_prefix(SCRATCH_PREFIX)?;
    if !name.ends_with(SCRATCH_SUFFIX) {
        return None;
    }
    let (pid, _) = rest.split_once('-')?;
    pid.parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return true;
    };
    // Signal 0 only checks for existence.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Remove scratch files in `dir` whose owning process no longer exists
///
/// Returns the number of files removed.
pub fn sweep_stale(dir: &Path) -> Result<usize> {
    let own_pid = std::process::id();
    let mut removed = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(pid) = owner_pid(&name.to_string_lossy()) else {
            continue;
        };
        if pid == own_pid || process_alive(pid) {
            continue;
        }
        if !entry.file_type()?.is_file() {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("Swept stale scratch file {:?}", entry.path());
                removed += 1;
            }
            Err(e) => warn!("Failed to sweep {:?}: {}", entry.path(), e),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::tempdir;

    #[test]
    fn test_create_and_discard() {
        let dir = tempdir().unwrap();
        let mut scratch = ScratchFile::create(dir.path()).unwrap();
        let path = scratch.path().to_path_buf();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(owner_pid(&name), Some(std::process::id()));

        scratch.file_mut().write_all(b"data").unwrap();
        assert!(path.exists());

        scratch.discard().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_deletes() {
        let dir = tempdir().unwrap();
        let scratch = ScratchFile::create(dir.path()).unwrap();
        let path = scratch.path().to_path_buf();
        drop(scratch);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_private_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let scratch = ScratchFile::create(dir.path()).unwrap();
        let mode = scratch.file().metadata().unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[test]
    fn test_preserve_keeps_content() {
        let dir = tempdir().unwrap();
        let mut scratch = ScratchFile::create(dir.path()).unwrap();
        scratch.file_mut().write_all(b"unsaved").unwrap();
        scratch.file_mut().seek(SeekFrom::Start(0)).unwrap();

        let kept = scratch.preserve();
        assert!(kept
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(UNSAVED_PREFIX));
        assert_eq!(fs::read(&kept).unwrap(), b"unsaved");
        assert_eq!(owner_pid(&kept.file_name().unwrap().to_string_lossy()), None);
    }

    #[test]
    fn test_owner_pid() {
        assert_eq!(owner_pid("cipherfs-123-abc.dat"), Some(123));
        assert_eq!(owner_pid("cipherfs-unsaved-123-abc.dat"), None);
        assert_eq!(owner_pid("cipherfs-123-abc.tmp"), None);
        assert_eq!(owner_pid("other-123-abc.dat"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_sweep_stale() {
        let dir = tempdir().unwrap();

        // Beyond any real pid_max.
        let dead = dir.path().join("cipherfs-2147483000-x.dat");
        fs::write(&dead, b"stale").unwrap();
        let unsaved = dir.path().join("cipherfs-unsaved-2147483000-y.dat");
        fs::write(&unsaved, b"keep").unwrap();
        let live = ScratchFile::create(dir.path()).unwrap();

        let removed = sweep_stale(dir.path()).unwrap();
        assert_eq!(removed, 1);
        assert!(!dead.exists());
        assert!(unsaved.exists());
        assert!(live.path().exists());
    }
}
