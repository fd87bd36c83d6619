//! Raw file handles: open/close, positioned I/O, truncation and advisory locks.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::mem;
use std::path::Path;

use bitflags::bitflags;

use crate::platform;
use crate::stat::Stat;

#[cfg(unix)]
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
#[cfg(windows)]
use std::os::windows::io::{AsRawHandle, FromRawHandle, IntoRawHandle};

/// The native handle type: a file descriptor on POSIX, a `HANDLE` on Windows.
#[cfg(unix)]
pub type RawHandle = std::os::unix::io::RawFd;
#[cfg(windows)]
pub type RawHandle = std::os::windows::io::RawHandle;

bitflags! {
    /// How [`open`] accesses and creates the file.
    ///
    /// `WRONLY` takes precedence over `RDWR`; with neither the file is read-only.
    /// `EXCL` only has an effect together with `CREAT`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const RDONLY = 0x0;
        const WRONLY = 0x1;
        const RDWR = 0x2;
        const APPEND = 0x4;
        const TRUNC = 0x8;
        const CREAT = 0x10;
        const EXCL = 0x20;
    }
}

bitflags! {
    /// Whole-file advisory lock request for [`Handle::lock`].
    ///
    /// The default is a blocking shared lock.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LockFlags: u32 {
        const SHARE = 0x0;
        const EXCL = 0x1;
        const NOWAIT = 0x2;
        const UNLOCK = 0x4;
    }
}

/// Origin for [`Handle::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// An open file. Closed when dropped.
pub struct Handle {
    raw: RawHandle,
}

// SAFETY: a Win32 file handle may be used from any thread.
#[cfg(windows)]
unsafe impl Send for Handle {}
// SAFETY: see above; all methods take `&self` and forward to thread-safe calls.
#[cfg(windows)]
unsafe impl Sync for Handle {}

/// Open `path` with `flags`.
pub fn open<P: AsRef<Path>>(path: P, flags: OpenFlags) -> io::Result<Handle> {
    Handle::open(path, flags)
}

/// Close `handle`, reporting any error from the OS.
pub fn close(handle: Handle) -> io::Result<()> {
    handle.close()
}

impl Handle {
    pub fn open<P: AsRef<Path>>(path: P, flags: OpenFlags) -> io::Result<Handle> {
        let path = path.as_ref();
        let raw = platform::open(path, flags)?;
        log::trace!("opened {} with {:?}", path.display(), flags);
        Ok(Handle { raw })
    }

    pub fn close(self) -> io::Result<()> {
        platform::close(self.into_raw())
    }

    pub fn as_raw(&self) -> RawHandle {
        self.raw
    }

    /// Give up ownership without closing.
    pub fn into_raw(self) -> RawHandle {
        let raw = self.raw;
        mem::forget(self);
        raw
    }

    /// Take ownership of `raw`.
    ///
    /// # Safety
    ///
    /// `raw` must be an open file handle that nothing else will close.
    pub unsafe fn from_raw(raw: RawHandle) -> Handle {
        Handle { raw }
    }

    pub fn stat(&self) -> io::Result<Stat> {
        platform::fstat(self.raw)
    }

    /// Acquire, convert or release the whole-file advisory lock.
    ///
    /// With `NOWAIT`, a lock held elsewhere fails with [`io::ErrorKind::WouldBlock`].
    pub fn lock(&self, flags: LockFlags) -> io::Result<()> {
        platform::lock(self.raw, flags).inspect_err(|err| {
            log::debug!("lock {:?} failed: {}", flags, err);
        })
    }

    /// Set the file length to `len`, extending with zeros or discarding the tail.
    pub fn truncate(&self, len: u64) -> io::Result<()> {
        platform::truncate(self.raw, len)
    }

    /// Move the file position; returns the new offset from the start.
    pub fn seek(&self, off: i64, whence: Whence) -> io::Result<u64> {
        platform::seek(self.raw, off, whence)
    }

    /// Read until `buf` is full or the end of the file is reached.
    ///
    /// Returns the number of bytes read, which is short only at end of file.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut off = 0;
        while off < buf.len() {
            match platform::read(self.raw, &mut buf[off..]) {
                Ok(0) => break,
                Ok(n) => off += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        log::trace!("read {} of {} bytes", off, buf.len());
        Ok(off)
    }

    /// Write all of `buf`, retrying partial transfers.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut off = 0;
        while off < buf.len() {
            match platform::write(self.raw, &buf[off..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole buffer",
                    ))
                }
                Ok(n) => off += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        log::trace!("wrote {} bytes", off);
        Ok(off)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Err(err) = platform::close(self.raw) {
            log::warn!("failed to close file handle: {}", err);
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.raw).finish()
    }
}

/// Send the first `n` bytes of `file` to `socket`.
///
/// The file position is not used or moved. Returns the number of bytes sent,
/// which is less than `n` only when the file is shorter.
#[cfg(unix)]
pub fn sendfile<S: AsRawFd>(socket: &S, file: &Handle, n: usize) -> io::Result<usize> {
    let sd = socket.as_raw_fd();
    let mut off = 0;
    while off < n {
        match platform::sendfile(sd, file.raw, off as u64, n - off) {
            Ok(0) => break,
            Ok(sent) => off += sent,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    log::trace!("sent {} of {} bytes", off, n);
    Ok(off)
}

fn seek_args(pos: SeekFrom) -> io::Result<(i64, Whence)> {
    match pos {
        SeekFrom::Start(n) => i64::try_from(n)
            .map(|n| (n, Whence::Set))
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seek offset out of range")),
        SeekFrom::Current(n) => Ok((n, Whence::Cur)),
        SeekFrom::End(n) => Ok((n, Whence::End)),
    }
}

impl Read for &Handle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Handle::read(self, buf)
    }
}

impl Write for &Handle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Handle::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for &Handle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (off, whence) = seek_args(pos)?;
        Handle::seek(self, off, whence)
    }
}

impl Read for Handle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Handle::read(self, buf)
    }
}

impl Write for Handle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Handle::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for Handle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (off, whence) = seek_args(pos)?;
        Handle::seek(self, off, whence)
    }
}

#[cfg(unix)]
impl AsRawFd for Handle {
    fn as_raw_fd(&self) -> RawFd {
        self.raw
    }
}

#[cfg(unix)]
impl FromRawFd for Handle {
    unsafe fn from_raw_fd(fd: RawFd) -> Handle {
        Handle { raw: fd }
    }
}

#[cfg(unix)]
impl IntoRawFd for Handle {
    fn into_raw_fd(self) -> RawFd {
        self.into_raw()
    }
}

#[cfg(windows)]
impl AsRawHandle for Handle {
    fn as_raw_handle(&self) -> RawHandle {
        self.raw
    }
}

#[cfg(windows)]
impl FromRawHandle for Handle {
    unsafe fn from_raw_handle(handle: RawHandle) -> Handle {
        Handle { raw: handle }
    }
}

#[cfg(windows)]
impl IntoRawHandle for Handle {
    fn into_raw_handle(self) -> RawHandle {
        self.into_raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_from_start_beyond_i64_is_rejected() {
        let err = seek_args(SeekFrom::Start(u64::MAX)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(seek_args(SeekFrom::End(-4)).unwrap(), (-4, Whence::End));
    }

    #[test]
    fn flag_values_are_stable() {
        assert_eq!(OpenFlags::RDONLY.bits(), 0);
        assert_eq!((OpenFlags::CREAT | OpenFlags::EXCL).bits(), 0x30);
        assert_eq!((LockFlags::EXCL | LockFlags::NOWAIT).bits(), 0x3);
        assert_eq!(LockFlags::UNLOCK.bits(), 0x4);
    }
}
