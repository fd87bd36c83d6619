//! Working directory and buffered directory walks.
//!
//! A [`DirWalk`] pulls entries from the OS in batches of at most
//! [`DIRENT_MAX`]. The explicit protocol mirrors the batch structure:
//!
//! ```no_run
//! # fn main() -> std::io::Result<()> {
//! let mut walk = platform_fs::DirWalk::open("..")?;
//! loop {
//!     while let Some(entry) = walk.next_entry() {
//!         println!("{:?} {}", entry.name(), entry.is_dir());
//!     }
//!     if !walk.buffer()? {
//!         break;
//!     }
//! }
//! walk.close();
//! # Ok(())
//! # }
//! ```
//!
//! or iterate it and let the batches refill transparently.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::platform;
use crate::stat::epoch_seconds;

/// Largest number of entries read from the OS per batch.
pub const DIRENT_MAX: usize = 64;

/// Current working directory of the process.
pub fn getcwd() -> io::Result<PathBuf> {
    platform::getcwd()
}

/// One directory entry. `.` and `..` are never produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirEntry {
    pub(crate) name: OsString,
    pub(crate) is_dir: bool,
    pub(crate) mtime: i64,
}

impl DirEntry {
    pub fn name(&self) -> &OsStr {
        &self.name
    }

    pub fn into_name(self) -> OsString {
        self.name
    }

    /// True for directories. Symlinks are never reported as directories.
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Last modification, in whole seconds since the Unix epoch.
    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn modified(&self) -> SystemTime {
        epoch_seconds(self.mtime)
    }
}

/// An open directory with its current batch of entries.
///
/// As an iterator it ends after the first error.
pub struct DirWalk {
    raw: platform::RawDir,
    batch: Vec<DirEntry>,
    pos: usize,
    // Set once iteration has ended or failed
    done: bool,
}

impl DirWalk {
    /// Open `path` and read the first batch.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<DirWalk> {
        let path = path.as_ref();
        let raw = platform::opendir(path)?;
        log::debug!("opened directory {}", path.display());

        let mut walk = DirWalk {
            raw,
            batch: Vec::with_capacity(DIRENT_MAX),
            pos: 0,
            done: false,
        };
        walk.buffer()?;
        Ok(walk)
    }

    /// Next entry of the current batch, `None` once the batch is drained.
    pub fn next_entry(&mut self) -> Option<&DirEntry> {
        let entry = self.batch.get(self.pos)?;
        self.pos += 1;
        Some(entry)
    }

    /// Replace the current batch with up to [`DIRENT_MAX`] new entries.
    ///
    /// Returns `false` when the directory has no entries left.
    pub fn buffer(&mut self) -> io::Result<bool> {
        self.batch.clear();
        self.pos = 0;
        platform::readdir(&mut self.raw, &mut self.batch, DIRENT_MAX)?;
        log::trace!("buffered {} directory entries", self.batch.len());
        Ok(!self.batch.is_empty())
    }

    pub fn close(self) {
        drop(self)
    }
}

impl Iterator for DirWalk {
    type Item = io::Result<DirEntry>;

    fn next(&mut self) -> Option<io::Result<DirEntry>> {
        if self.done {
            return None;
        }
        if self.pos == self.batch.len() {
            match self.buffer() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        let entry = std::mem::take(&mut self.batch[self.pos]);
        self.pos += 1;
        Some(Ok(entry))
    }
}

impl std::iter::FusedIterator for DirWalk {}
