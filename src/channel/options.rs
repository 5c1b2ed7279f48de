//! Open options of a channel
//!
//! The options decide two things: whether the persistent file may be
//! created, and whether its current content has to be loaded into the
//! working copy before the first read or write.

/// Requested open options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub create_new: bool,
    pub truncate: bool,
}

impl OpenOptions {
    /// Empty option set (content is loaded on first use)
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate `open(2)` flags
    pub fn from_flags(flags: i32) -> Self {
        let mode = flags & libc::O_ACCMODE;
        OpenOptions {
            read: mode == libc::O_RDONLY || mode == libc::O_RDWR,
            write: mode == libc::O_WRONLY || mode == libc::O_RDWR,
            append: (flags & libc::O_APPEND) != 0,
            create: (flags & libc::O_CREAT) != 0,
            create_new: (flags & libc::O_CREAT) != 0 && (flags & libc::O_EXCL) != 0,
            truncate: (flags & libc::O_TRUNC) != 0,
        }
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn create_new(mut self, create_new: bool) -> Self {
        self.create_new = create_new;
        self
    }

    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// Options of a whole-file overwrite: write, create, truncate
    pub fn overwrite() -> Self {
        OpenOptions::new().write(true).create(true).truncate(true)
    }

    /// True when no option at all was requested
    pub fn is_empty(&self) -> bool {
        *self == OpenOptions::default()
    }

    /// Whether the persisted content must be loaded before first use
    ///
    /// An explicit option set without `read` and without `append` replaces
    /// the file entirely, so its old content is never needed.
    pub fn requires_load(&self) -> bool {
        self.is_empty() || self.read || self.append
    }
}
