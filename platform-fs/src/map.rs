//! Read-only memory maps of whole files.

use std::fmt;
use std::io;
use std::ops::Deref;
use std::path::Path;

use crate::platform;

/// A private, read-only mapping of an entire file.
///
/// An empty file yields an empty map that holds no OS resources.
pub struct Map {
    inner: platform::RawMap,
}

// SAFETY: the view is read-only and owned exclusively by this value.
unsafe impl Send for Map {}
// SAFETY: shared access only ever reads the mapped pages.
unsafe impl Sync for Map {}

impl Map {
    /// Map the file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Map> {
        let path = path.as_ref();
        let inner = platform::map(path)?;
        log::debug!("mapped {} ({} bytes)", path.display(), inner.len());
        Ok(Map { inner })
    }

    pub fn as_slice(&self) -> &[u8] {
        self.inner.as_slice()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    /// Release the mapping now instead of at drop.
    pub fn unmap(self) {
        drop(self)
    }
}

impl Drop for Map {
    fn drop(&mut self) {
        log::debug!("unmapping {} bytes", self.inner.len());
        // SAFETY: `inner` came from `platform::map` and is released exactly once, here.
        unsafe { platform::unmap(&mut self.inner) }
    }
}

impl Deref for Map {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for Map {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("addr", &self.as_slice().as_ptr())
            .field("len", &self.len())
            .finish()
    }
}
