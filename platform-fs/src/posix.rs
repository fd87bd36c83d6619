// POSIX layer shared by the Linux and macOS backends
// Everything here is a direct libc call plus errno translation

use std::ffi::{CStr, CString, OsStr, OsString};
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

use libc::{c_char, c_int};

use crate::dir::DirEntry;
use crate::file::{LockFlags, OpenFlags, Whence};
use crate::stat::{FileKind, Stat};

pub const PATH_MAX: usize = libc::PATH_MAX as usize;

// Largest single read/write the kernel accepts without EINVAL
#[cfg(target_os = "macos")]
const IO_LIMIT: usize = c_int::MAX as usize - 1;
#[cfg(not(target_os = "macos"))]
const IO_LIMIT: usize = isize::MAX as usize;

pub(crate) fn cstr(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "path contains an interior NUL byte",
        )
    })
}

pub(crate) fn cvt(ret: c_int) -> io::Result<c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn cvt_size(ret: isize) -> io::Result<usize> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

#[cfg(target_os = "linux")]
fn errno_location() -> *mut c_int {
    // SAFETY: always returns the calling thread's errno slot.
    unsafe { libc::__errno_location() }
}

#[cfg(target_os = "macos")]
fn errno_location() -> *mut c_int {
    // SAFETY: always returns the calling thread's errno slot.
    unsafe { libc::__error() }
}

// readdir() only reports errors through errno, so it has to be cleared first
fn clear_errno() {
    // SAFETY: the slot is thread-local and always writable.
    unsafe { *errno_location() = 0 }
}

pub(crate) fn stat_from(st: &libc::stat) -> Stat {
    let kind = match st.st_mode & libc::S_IFMT {
        libc::S_IFDIR => FileKind::Dir,
        libc::S_IFREG => FileKind::File,
        _ => FileKind::Other,
    };
    Stat {
        size: st.st_size as u64,
        kind,
        mtime: st.st_mtime as i64,
        readonly: st.st_mode as u32 & 0o222 == 0,
    }
}

pub fn stat(path: &Path) -> io::Result<Stat> {
    let path = cstr(path)?;
    let mut st = MaybeUninit::<libc::stat>::uninit();
    // SAFETY: `path` is NUL-terminated and `st` is writable.
    cvt(unsafe { libc::stat(path.as_ptr(), st.as_mut_ptr()) })?;
    // SAFETY: stat() succeeded and filled the struct.
    Ok(stat_from(unsafe { st.assume_init_ref() }))
}

pub fn fstat(fd: RawFd) -> io::Result<Stat> {
    let mut st = MaybeUninit::<libc::stat>::uninit();
    // SAFETY: `st` is writable; a bad descriptor is reported as EBADF.
    cvt(unsafe { libc::fstat(fd, st.as_mut_ptr()) })?;
    // SAFETY: fstat() succeeded and filled the struct.
    Ok(stat_from(unsafe { st.assume_init_ref() }))
}

// Memory mapping

pub struct RawMap {
    addr: *mut u8,
    len: usize,
}

impl RawMap {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: `addr` points to a live PROT_READ mapping of `len` bytes.
        unsafe { std::slice::from_raw_parts(self.addr, self.len) }
    }
}

fn open_fd(path: &CStr, oflag: c_int) -> io::Result<OwnedFd> {
    // SAFETY: `path` is NUL-terminated.
    let fd = cvt(unsafe { libc::open(path.as_ptr(), oflag | libc::O_CLOEXEC) })?;
    // SAFETY: `fd` was just returned by open() and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub fn map(path: &Path) -> io::Result<RawMap> {
    use std::os::fd::AsRawFd;

    let path = cstr(path)?;
    let fd = open_fd(&path, libc::O_RDONLY)?;
    let size = fstat(fd.as_raw_fd())?.size;
    let len = usize::try_from(size).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidData, "file too large to map")
    })?;

    // mmap() rejects zero-length mappings
    if len == 0 {
        return Ok(RawMap {
            addr: ptr::null_mut(),
            len: 0,
        });
    }

    // SAFETY: a fresh private read-only mapping does not alias any Rust memory.
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ,
            libc::MAP_FILE | libc::MAP_PRIVATE,
            fd.as_raw_fd(),
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    // The mapping keeps the file alive; `fd` closes here
    Ok(RawMap {
        addr: addr.cast(),
        len,
    })
}

/// # Safety
///
/// `map` must come from [`map`] and must not be used afterwards.
pub unsafe fn unmap(map: &mut RawMap) {
    if map.len == 0 {
        return;
    }
    // SAFETY: the caller guarantees `addr`/`len` describe one live mapping.
    if unsafe { libc::munmap(map.addr.cast(), map.len) } == -1 {
        log::warn!("munmap failed: {}", io::Error::last_os_error());
    }
    map.addr = ptr::null_mut();
    map.len = 0;
}

// Input/output

pub(crate) fn open_flags(flags: OpenFlags) -> c_int {
    let mut oflag = if flags.contains(OpenFlags::WRONLY) {
        libc::O_WRONLY
    } else if flags.contains(OpenFlags::RDWR) {
        libc::O_RDWR
    } else {
        libc::O_RDONLY
    };

    if flags.contains(OpenFlags::APPEND) {
        oflag |= libc::O_APPEND;
    }
    if flags.contains(OpenFlags::TRUNC) {
        oflag |= libc::O_TRUNC;
    }
    if flags.contains(OpenFlags::CREAT) {
        oflag |= libc::O_CREAT;
        if flags.contains(OpenFlags::EXCL) {
            oflag |= libc::O_EXCL;
        }
    }

    oflag | libc::O_CLOEXEC
}

pub fn open(path: &Path, flags: OpenFlags) -> io::Result<RawFd> {
    let path = cstr(path)?;
    let oflag = open_flags(flags);
    if oflag & libc::O_CREAT != 0 {
        // SAFETY: `path` is NUL-terminated; the mode is passed as a promoted vararg.
        return cvt(unsafe { libc::open(path.as_ptr(), oflag, 0o644 as libc::c_uint) });
    }
    // SAFETY: `path` is NUL-terminated.
    cvt(unsafe { libc::open(path.as_ptr(), oflag) })
}

pub fn close(fd: RawFd) -> io::Result<()> {
    // SAFETY: the caller gives up `fd`; it is not used again.
    cvt(unsafe { libc::close(fd) }).map(drop)
}

pub fn lock(fd: RawFd, flags: LockFlags) -> io::Result<()> {
    // SAFETY: all-zero is a valid `flock`: start 0, length 0 (whole file), SEEK_SET.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    let l_type = if flags.contains(LockFlags::UNLOCK) {
        libc::F_UNLCK
    } else if flags.contains(LockFlags::EXCL) {
        libc::F_WRLCK
    } else {
        libc::F_RDLCK
    };
    fl.l_type = l_type as libc::c_short;
    fl.l_whence = libc::SEEK_SET as libc::c_short;

    let nowait = flags.contains(LockFlags::NOWAIT);
    let cmd = if nowait { libc::F_SETLK } else { libc::F_SETLKW };

    loop {
        // SAFETY: `fl` is a valid flock for the duration of the call.
        if unsafe { libc::fcntl(fd, cmd, &fl as *const libc::flock) } != -1 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) if !nowait => continue,
            Some(libc::EACCES) | Some(libc::EAGAIN) if nowait => {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "file is locked by another process",
                ))
            }
            _ => return Err(err),
        }
    }
}

pub fn truncate(fd: RawFd, len: u64) -> io::Result<()> {
    let len = libc::off_t::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length out of range"))?;
    loop {
        // SAFETY: plain syscall on a caller-owned descriptor.
        match cvt(unsafe { libc::ftruncate(fd, len) }) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            res => return res.map(drop),
        }
    }
}

pub fn seek(fd: RawFd, off: i64, whence: Whence) -> io::Result<u64> {
    let whence = match whence {
        Whence::Set => libc::SEEK_SET,
        Whence::Cur => libc::SEEK_CUR,
        Whence::End => libc::SEEK_END,
    };
    // SAFETY: plain syscall on a caller-owned descriptor.
    let pos = unsafe { libc::lseek(fd, off as libc::off_t, whence) };
    if pos == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(pos as u64)
}

pub fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let len = buf.len().min(IO_LIMIT);
    // SAFETY: `buf` is valid for writes of `len` bytes.
    cvt_size(unsafe { libc::read(fd, buf.as_mut_ptr().cast(), len) })
}

pub fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let len = buf.len().min(IO_LIMIT);
    // SAFETY: `buf` is valid for reads of `len` bytes.
    cvt_size(unsafe { libc::write(fd, buf.as_ptr().cast(), len) })
}

// Directory operations

pub fn getcwd() -> io::Result<PathBuf> {
    let mut buf = Vec::<u8>::with_capacity(512);
    loop {
        let cap = buf.capacity();
        // SAFETY: `buf` has `cap` writable bytes.
        let ret = unsafe { libc::getcwd(buf.as_mut_ptr().cast::<c_char>(), cap) };
        if !ret.is_null() {
            // SAFETY: getcwd() wrote a NUL-terminated string into `buf`.
            let len = unsafe { CStr::from_ptr(buf.as_ptr().cast::<c_char>()) }
                .to_bytes()
                .len();
            // SAFETY: the first `len` bytes were initialised by getcwd().
            unsafe { buf.set_len(len) };
            buf.shrink_to_fit();
            return Ok(PathBuf::from(OsString::from_vec(buf)));
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ERANGE) {
            return Err(err);
        }
        buf.reserve(cap * 2);
    }
}

// A readdir() stream; kind and mtime come from fstatat() on each name
pub struct ReadDir {
    dir: NonNull<libc::DIR>,
    done: bool,
}

// SAFETY: the DIR stream is only touched through `&mut self`.
unsafe impl Send for ReadDir {}

impl ReadDir {
    pub fn open(path: &CStr) -> io::Result<ReadDir> {
        // SAFETY: `path` is NUL-terminated.
        let dir = unsafe { libc::opendir(path.as_ptr()) };
        match NonNull::new(dir) {
            Some(dir) => Ok(ReadDir { dir, done: false }),
            None => Err(io::Error::last_os_error()),
        }
    }

    pub fn fill(&mut self, out: &mut Vec<DirEntry>, max: usize) -> io::Result<()> {
        // SAFETY: `dir` is an open stream.
        let dirfd = unsafe { libc::dirfd(self.dir.as_ptr()) };

        while !self.done && out.len() < max {
            clear_errno();
            // SAFETY: `dir` is an open stream owned by `self`.
            let ent = unsafe { libc::readdir(self.dir.as_ptr()) };
            if ent.is_null() {
                let err = io::Error::last_os_error();
                if err.raw_os_error().unwrap_or(0) != 0 {
                    return Err(err);
                }
                self.done = true;
                break;
            }

            // SAFETY: `ent` stays valid until the next readdir() on this stream.
            let name = unsafe { CStr::from_ptr((*ent).d_name.as_ptr()) };
            if is_dot(name.to_bytes()) {
                continue;
            }

            let mut st = MaybeUninit::<libc::stat>::uninit();
            // SAFETY: `name` is NUL-terminated and relative to `dirfd`.
            let ret = unsafe {
                libc::fstatat(
                    dirfd,
                    name.as_ptr(),
                    st.as_mut_ptr(),
                    libc::AT_SYMLINK_NOFOLLOW,
                )
            };
            if ret == -1 {
                let err = io::Error::last_os_error();
                // Removed between readdir() and fstatat()
                if err.kind() == io::ErrorKind::NotFound {
                    continue;
                }
                return Err(err);
            }
            // SAFETY: fstatat() succeeded and filled the struct.
            let st = stat_from(unsafe { st.assume_init_ref() });

            out.push(DirEntry {
                name: OsStr::from_bytes(name.to_bytes()).to_os_string(),
                is_dir: st.kind == FileKind::Dir,
                mtime: st.mtime,
            });
        }
        Ok(())
    }
}

impl Drop for ReadDir {
    fn drop(&mut self) {
        // SAFETY: `dir` is open and closed exactly once, here.
        if unsafe { libc::closedir(self.dir.as_ptr()) } == -1 {
            log::warn!("closedir failed: {}", io::Error::last_os_error());
        }
    }
}

pub(crate) fn is_dot(name: &[u8]) -> bool {
    name == b"." || name == b".."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_only_wins_over_read_write() {
        let oflag = open_flags(OpenFlags::WRONLY | OpenFlags::RDWR);
        assert_eq!(oflag & libc::O_ACCMODE, libc::O_WRONLY);
        assert_eq!(open_flags(OpenFlags::RDONLY) & libc::O_ACCMODE, libc::O_RDONLY);
    }

    #[test]
    fn exclusive_requires_create() {
        assert_eq!(open_flags(OpenFlags::EXCL) & libc::O_EXCL, 0);
        let oflag = open_flags(OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::RDWR);
        assert_ne!(oflag & libc::O_EXCL, 0);
        assert_ne!(oflag & libc::O_CREAT, 0);
    }

    #[test]
    fn append_and_truncate_translate() {
        let oflag = open_flags(OpenFlags::WRONLY | OpenFlags::APPEND | OpenFlags::TRUNC);
        assert_ne!(oflag & libc::O_APPEND, 0);
        assert_ne!(oflag & libc::O_TRUNC, 0);
        assert_ne!(oflag & libc::O_CLOEXEC, 0);
    }

    #[test]
    fn interior_nul_is_invalid_input() {
        let err = cstr(Path::new("a\0b")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn dot_entries_are_recognised() {
        assert!(is_dot(b"."));
        assert!(is_dot(b".."));
        assert!(!is_dot(b"..."));
        assert!(!is_dot(b".hidden"));
    }
}
