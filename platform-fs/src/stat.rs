//! File status.

use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::platform;

/// What a path refers to, after following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Other,
}

/// Status of a file as reported by [`stat`] or [`Handle::stat`](crate::Handle::stat).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub(crate) size: u64,
    pub(crate) kind: FileKind,
    pub(crate) mtime: i64,
    pub(crate) readonly: bool,
}

impl Stat {
    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    /// Last modification, in whole seconds since the Unix epoch.
    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn modified(&self) -> SystemTime {
        epoch_seconds(self.mtime)
    }

    /// True when no write permission is set (POSIX) or the read-only
    /// attribute is set (Windows).
    pub fn readonly(&self) -> bool {
        self.readonly
    }
}

/// Query the status of `path`, following symlinks.
pub fn stat<P: AsRef<Path>>(path: P) -> io::Result<Stat> {
    platform::stat(path.as_ref())
}

pub(crate) fn epoch_seconds(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_mtime_is_before_epoch() {
        assert_eq!(epoch_seconds(-10), UNIX_EPOCH - Duration::from_secs(10));
        assert_eq!(epoch_seconds(0), UNIX_EPOCH);
    }
}
