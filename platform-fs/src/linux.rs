// Linux-specific implementation
// The POSIX layer covers everything but sendfile(2) and the directory stream

#[path = "posix.rs"]
mod posix;

pub use posix::*;

use std::io;
use std::os::fd::RawFd;
use std::path::Path;

use crate::dir::DirEntry;

// sendfile(out_fd, in_fd, &offset, count); the kernel advances `offset` only
pub fn sendfile(sd: RawFd, fd: RawFd, offset: u64, len: usize) -> io::Result<usize> {
    let mut off = libc::off_t::try_from(offset)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
    // SAFETY: `off` is a valid in/out offset for the duration of the call.
    let sent = unsafe { libc::sendfile(sd, fd, &mut off, len) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sent as usize)
}

pub struct RawDir(ReadDir);

pub fn opendir(path: &Path) -> io::Result<RawDir> {
    let path = cstr(path)?;
    ReadDir::open(&path).map(RawDir)
}

pub fn readdir(dir: &mut RawDir, out: &mut Vec<DirEntry>, max: usize) -> io::Result<()> {
    dir.0.fill(out, max)
}
