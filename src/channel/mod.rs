//! Random-access transform channel
//!
//! A [`CipherFileChannel`] exposes one persisted file as a seekable byte
//! channel whose caller-facing bytes are the transformed form of what is
//! stored: plaintext over ciphertext in forward mode, ciphertext over
//! plaintext in reverse mode.
//!
//! Counter-mode keystream depends on the byte offset, so arbitrary partial
//! writes cannot be applied to the persisted bytes directly. Instead the
//! channel lazily materializes a transformed working copy in a private
//! scratch file on the first read or write, serves all I/O from it, and
//! transforms it back into the persistent file on close if it was modified.
//!
//! Until the first read or write, position, size and truncation act on the
//! persistent file itself, so metadata queries never pay for a transform.
//!
//! Working copies of a process that dies before closing its channels stay
//! in the scratch directory until [`sweep_stale`] removes them.

mod options;
mod scratch;

pub use options::OpenOptions;
pub use scratch::{sweep_stale, ScratchFile, SCRATCH_PREFIX, SCRATCH_SUFFIX};

use crate::config::MountConfig;
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle of a channel
enum State {
    /// No working copy yet; the persistent file is authoritative
    Unmaterialized { persistent: File },
    /// The scratch file is the sole source of truth
    Materialized {
        persistent: File,
        scratch: ScratchFile,
        modified: bool,
    },
    Closed,
}

/// Seekable channel over a transformed file
pub struct CipherFileChannel {
    config: Arc<MountConfig>,
    relative_name: String,
    // Fixed at construction: load the persisted content on materialization.
    load_required: bool,
    append: bool,
    state: State,
}

impl CipherFileChannel {
    /// Open the physical file at `path` read/write and wrap it
    ///
    /// The file is created only when `options` asks for it; otherwise a
    /// missing file is [`Error::PathNotFound`].
    pub fn open(
        path: &Path,
        relative_name: impl Into<String>,
        config: Arc<MountConfig>,
        options: &OpenOptions,
    ) -> Result<Self> {
        let persistent = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(options.create && !options.create_new)
            .create_new(options.create_new)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Error::PathNotFound(path.display().to_string()),
                _ => Error::Io(e),
            })?;

        Ok(Self::from_file(persistent, relative_name, config, options))
    }

    /// Wrap an already opened persistent file (must be readable and writable)
    pub fn from_file(
        persistent: File,
        relative_name: impl Into<String>,
        config: Arc<MountConfig>,
        options: &OpenOptions,
    ) -> Self {
        let relative_name = relative_name.into();
        let load_required = options.requires_load();
        debug!(
            "Opened channel for {:?} ({:?}, load: {})",
            relative_name,
            config.mode(),
            load_required
        );

        CipherFileChannel {
            config,
            relative_name,
            load_required,
            append: options.append,
            state: State::Unmaterialized { persistent },
        }
    }

    /// Name relative to the mount root
    pub fn relative_name(&self) -> &str {
        &self.relative_name
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, State::Closed)
    }

    /// Whether a working copy exists
    pub fn is_materialized(&self) -> bool {
        matches!(self.state, State::Materialized { .. })
    }

    /// Whether anything was written since the working copy was created
    pub fn is_modified(&self) -> bool {
        matches!(self.state, State::Materialized { modified: true, .. })
    }

    /// The file currently answering position, size and truncate
    fn current(&self) -> Result<&File> {
        match &self.state {
            State::Unmaterialized { persistent } => Ok(persistent),
            State::Materialized { scratch, .. } => Ok(scratch.file()),
            State::Closed => Err(Error::ClosedChannel),
        }
    }

    /// Current position
    pub fn position(&self) -> Result<u64> {
        let mut file = self.current()?;
        Ok(file.stream_position()?)
    }

    /// Move to `position`; positions past the end are allowed
    pub fn set_position(&mut self, position: u64) -> Result<&mut Self> {
        let mut file = self.current()?;
        file.seek(SeekFrom::Start(position))?;
        Ok(self)
    }

    /// Current size in bytes
    pub fn size(&self) -> Result<u64> {
        Ok(self.current()?.metadata()?.len())
    }

    /// Shrink to `length` if currently larger; never grows
    ///
    /// The position is clamped to the new length.
    pub fn truncate(&mut self, length: u64) -> Result<&mut Self> {
        let mut file = self.current()?;
        if file.metadata()?.len() > length {
            file.set_len(length)?;
        }
        if file.stream_position()? > length {
            file.seek(SeekFrom::Start(length))?;
        }
        Ok(self)
    }

    /// Read into `buf` at the current position, returning 0 at the end
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.materialize()?;
        match &mut self.state {
            State::Materialized { scratch, .. } => Ok(scratch.file_mut().read(buf)?),
            State::Closed => Err(Error::ClosedChannel),
            State::Unmaterialized { .. } => Err(Error::Internal("channel not materialized".into())),
        }
    }

    /// Write all of `buf` at the current position (at the end in append mode)
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.materialize()?;
        let append = self.append;
        match &mut self.state {
            State::Materialized {
                scratch, modified, ..
            } => {
                let file = scratch.file_mut();
                if append {
                    file.seek(SeekFrom::End(0))?;
                }
                file.write_all(buf)?;
                if !buf.is_empty() {
                    *modified = true;
                }
                Ok(buf.len())
            }
            State::Closed => Err(Error::ClosedChannel),
            State::Unmaterialized { .. } => Err(Error::Internal("channel not materialized".into())),
        }
    }

    /// Create the working copy if it does not exist yet
    fn materialize(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Unmaterialized { mut persistent } => match self.load(&mut persistent) {
                Ok(scratch) => {
                    self.state = State::Materialized {
                        persistent,
                        scratch,
                        modified: false,
                    };
                    Ok(())
                }
                Err(e) => {
                    self.state = State::Unmaterialized { persistent };
                    Err(e)
                }
            },
            State::Closed => Err(Error::ClosedChannel),
            materialized => {
                self.state = materialized;
                Ok(())
            }
        }
    }

    /// Build a working copy from the persistent file
    ///
    /// On failure the scratch file is removed and the persistent position
    /// is restored.
    fn load(&self, persistent: &mut File) -> Result<ScratchFile> {
        let position = persistent.stream_position()?;
        let result = self.load_at(persistent, position);
        if result.is_err() {
            if let Err(e) = persistent.seek(SeekFrom::Start(position)) {
                warn!("Failed to restore position of {:?}: {}", self.relative_name, e);
            }
        }
        result
    }

    fn load_at(&self, persistent: &mut File, position: u64) -> Result<ScratchFile> {
        let mut scratch = ScratchFile::create(self.config.scratch_dir())?;

        if self.load_required {
            let direction = self.config.mode().load_direction();
            let transform = self
                .config
                .cipher()
                .transform(direction, &self.relative_name)?;

            persistent.seek(SeekFrom::Start(0))?;
            let copied = transform.copy(persistent, scratch.file_mut())?;
            debug!(
                "Loaded {} bytes of {:?} ({:?})",
                copied, self.relative_name, direction
            );
        }

        scratch.file_mut().seek(SeekFrom::Start(position))?;
        Ok(scratch)
    }

    /// Transform the working copy back into the persistent file
    fn store(&self, persistent: &mut File, scratch: &mut ScratchFile) -> Result<u64> {
        let direction = self.config.mode().store_direction();
        let transform = self
            .config
            .cipher()
            .transform(direction, &self.relative_name)?;

        persistent.set_len(0)?;
        persistent.seek(SeekFrom::Start(0))?;
        scratch.file_mut().seek(SeekFrom::Start(0))?;

        let output = BufWriter::new(&mut *persistent);
        let copied = transform.copy(scratch.file_mut(), output)?;
        debug!(
            "Stored {} bytes of {:?} ({:?})",
            copied, self.relative_name, direction
        );
        Ok(copied)
    }

    /// Close the channel, writing the working copy back if it was modified
    ///
    /// If the write-back fails, the working copy is kept on disk and
    /// [`Error::StoreIncomplete`] names its location. Closing twice is a
    /// no-op.
    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Closed => Ok(()),
            State::Unmaterialized { persistent } => {
                drop(persistent);
                debug!("Closed {:?} without transform", self.relative_name);
                Ok(())
            }
            State::Materialized {
                persistent,
                scratch,
                modified: false,
            } => {
                drop(persistent);
                if let Err(e) = scratch.discard() {
                    warn!("Failed to remove working copy of {:?}: {}", self.relative_name, e);
                }
                debug!("Closed unmodified {:?}", self.relative_name);
                Ok(())
            }
            State::Materialized {
                mut persistent,
                mut scratch,
                modified: true,
            } => match self.store(&mut persistent, &mut scratch) {
                Ok(_) => {
                    drop(persistent);
                    if let Err(e) = scratch.discard() {
                        warn!("Failed to remove working copy of {:?}: {}", self.relative_name, e);
                    }
                    Ok(())
                }
                Err(e) => {
                    drop(persistent);
                    let kept = scratch.preserve();
                    Err(Error::StoreIncomplete {
                        scratch: kept,
                        source: Box::new(e),
                    })
                }
            },
        }
    }
}

impl Drop for CipherFileChannel {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                warn!("Failed to close channel for {:?}: {}", self.relative_name, e);
            }
        }
    }
}

impl Read for CipherFileChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        CipherFileChannel::read(self, buf).map_err(io::Error::from)
    }
}

impl Write for CipherFileChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        CipherFileChannel::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::ClosedChannel.into())
        }
    }
}

impl Seek for CipherFileChannel {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.size()?.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position()?.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of channel")
        })?;
        self.set_position(target)?;
        Ok(target)
    }
}
