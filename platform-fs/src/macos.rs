// macOS-specific implementation
// Directory batches come from getattrlistbulk(2), which returns name, type and
// modification time for many entries in one call. Volumes that refuse bulk
// reads fall back to the readdir()/fstatat() stream from the POSIX layer.

#[path = "posix.rs"]
mod posix;

pub use posix::*;

use std::collections::VecDeque;
use std::ffi::{CString, OsStr};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use libc::{c_int, c_void, size_t};

use crate::dir::{DirEntry, DIRENT_MAX};

// sys/attr.h
#[repr(C)]
struct AttrList {
    bitmapcount: u16,
    reserved: u16,
    commonattr: u32,
    volattr: u32,
    dirattr: u32,
    fileattr: u32,
    forkattr: u32,
}

const ATTR_BIT_MAP_COUNT: u16 = 5;
const ATTR_CMN_NAME: u32 = 0x0000_0001;
const ATTR_CMN_OBJTYPE: u32 = 0x0000_0008;
const ATTR_CMN_MODTIME: u32 = 0x0000_0400;
const ATTR_CMN_RETURNED_ATTRS: u32 = 0x8000_0000;
const FSOPT_PACK_INVAL_ATTRS: u64 = 0x0000_0008;

// sys/vnode.h: enum vtype
const VDIR: u32 = 2;

extern "C" {
    fn getattrlistbulk(
        dirfd: c_int,
        attr_list: *mut AttrList,
        attr_buf: *mut c_void,
        attr_buf_size: size_t,
        options: u64,
    ) -> c_int;
}

// Packed record layout with FSOPT_PACK_INVAL_ATTRS (every requested attribute present):
//   u32 length | attribute_set_t returned (5 x u32) | attrreference_t name (i32 off, u32 len)
//   | u32 objtype | timespec mtime (i64 sec, i64 nsec)
const REC_RETURNED: usize = 4;
const REC_NAME: usize = 24;
const REC_OBJTYPE: usize = 32;
const REC_MTIME: usize = 36;
const REC_HEADER: usize = 52;

// Room for a full batch of long names
const BULK_BUF_SIZE: usize = DIRENT_MAX * (REC_HEADER + 1024);

pub fn sendfile(sd: RawFd, fd: RawFd, offset: u64, len: usize) -> io::Result<usize> {
    let offset = libc::off_t::try_from(offset)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
    let mut sent = libc::off_t::try_from(len).unwrap_or(libc::off_t::MAX);
    // SAFETY: `sent` is a valid in/out length; no header/trailer vector is passed.
    let ret = unsafe { libc::sendfile(fd, sd, offset, &mut sent, ptr::null_mut(), 0) };
    if ret == -1 {
        let err = io::Error::last_os_error();
        // A partial transfer is reported through `sent` along with EINTR/EAGAIN
        if sent > 0 && matches!(err.raw_os_error(), Some(libc::EINTR) | Some(libc::EAGAIN)) {
            return Ok(sent as usize);
        }
        return Err(err);
    }
    Ok(sent as usize)
}

pub enum RawDir {
    Bulk(BulkDir),
    Stream(ReadDir),
}

pub struct BulkDir {
    fd: OwnedFd,
    path: CString,
    buf: Vec<u8>,
    pending: VecDeque<DirEntry>,
    started: bool,
    done: bool,
}

pub fn opendir(path: &Path) -> io::Result<RawDir> {
    let path = cstr(path)?;
    // SAFETY: `path` is NUL-terminated.
    let fd = cvt(unsafe {
        libc::open(
            path.as_ptr(),
            libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
        )
    })?;
    Ok(RawDir::Bulk(BulkDir {
        // SAFETY: `fd` was just returned by open() and is owned by nobody else.
        fd: unsafe { OwnedFd::from_raw_fd(fd) },
        path,
        buf: vec![0; BULK_BUF_SIZE],
        pending: VecDeque::new(),
        started: false,
        done: false,
    }))
}

pub fn readdir(dir: &mut RawDir, out: &mut Vec<DirEntry>, max: usize) -> io::Result<()> {
    let fallback = match dir {
        RawDir::Stream(stream) => return stream.fill(out, max),
        RawDir::Bulk(bulk) => match bulk.fill(out, max) {
            Ok(()) => return Ok(()),
            Err(err) if !bulk.started && is_unsupported(&err) => {
                log::debug!("bulk attribute reads unsupported ({}), using readdir", err);
                ReadDir::open(&bulk.path)?
            }
            Err(err) => return Err(err),
        },
    };
    *dir = RawDir::Stream(fallback);
    readdir(dir, out, max)
}

fn is_unsupported(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENOTSUP) | Some(libc::EINVAL))
}

impl BulkDir {
    fn fill(&mut self, out: &mut Vec<DirEntry>, max: usize) -> io::Result<()> {
        while out.len() < max {
            if let Some(entry) = self.pending.pop_front() {
                out.push(entry);
                continue;
            }
            if self.done {
                break;
            }
            self.bulk_read()?;
        }
        Ok(())
    }

    fn bulk_read(&mut self) -> io::Result<()> {
        let mut attrs = AttrList {
            bitmapcount: ATTR_BIT_MAP_COUNT,
            reserved: 0,
            commonattr: ATTR_CMN_RETURNED_ATTRS
                | ATTR_CMN_NAME
                | ATTR_CMN_OBJTYPE
                | ATTR_CMN_MODTIME,
            volattr: 0,
            dirattr: 0,
            fileattr: 0,
            forkattr: 0,
        };

        // SAFETY: `attrs` and `buf` are valid for the call; the kernel writes at most `buf.len()` bytes.
        let count = unsafe {
            getattrlistbulk(
                self.fd.as_raw_fd(),
                &mut attrs,
                self.buf.as_mut_ptr().cast(),
                self.buf.len(),
                FSOPT_PACK_INVAL_ATTRS,
            )
        };
        let count = cvt(count)?;
        self.started = true;

        if count == 0 {
            self.done = true;
            return Ok(());
        }

        let mut pos = 0;
        for _ in 0..count {
            let len = read_u32(&self.buf, pos)? as usize;
            let record = self
                .buf
                .get(pos..pos + len)
                .ok_or_else(malformed)?;
            if let Some(entry) = parse_record(record)? {
                self.pending.push_back(entry);
            }
            pos += len;
        }
        log::trace!("getattrlistbulk returned {} entries", count);
        Ok(())
    }
}

fn parse_record(record: &[u8]) -> io::Result<Option<DirEntry>> {
    let returned = read_u32(record, REC_RETURNED)?;

    let name_off = read_u32(record, REC_NAME)? as i32;
    let name_len = read_u32(record, REC_NAME + 4)? as usize;
    let start = usize::try_from(REC_NAME as i64 + name_off as i64).map_err(|_| malformed())?;
    let name = record.get(start..start + name_len).ok_or_else(malformed)?;
    // attr_length counts the terminating NUL
    let name = match name.iter().position(|&b| b == 0) {
        Some(nul) => &name[..nul],
        None => name,
    };
    if is_dot(name) {
        return Ok(None);
    }

    let objtype = read_u32(record, REC_OBJTYPE)?;
    let mtime = if returned & ATTR_CMN_MODTIME != 0 {
        i64::from_ne_bytes(read_array(record, REC_MTIME)?)
    } else {
        0
    };

    Ok(Some(DirEntry {
        name: OsStr::from_bytes(name).to_os_string(),
        is_dir: returned & ATTR_CMN_OBJTYPE != 0 && objtype == VDIR,
        mtime,
    }))
}

fn read_u32(buf: &[u8], at: usize) -> io::Result<u32> {
    read_array(buf, at).map(u32::from_ne_bytes)
}

fn read_array<const N: usize>(buf: &[u8], at: usize) -> io::Result<[u8; N]> {
    buf.get(at..at + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(malformed)
}

fn malformed() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        "malformed getattrlistbulk record",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &[u8], objtype: u32, mtime: i64) -> Vec<u8> {
        let mut rec = vec![0u8; REC_HEADER];
        let total = REC_HEADER + name.len() + 1;
        rec[0..4].copy_from_slice(&(total as u32).to_ne_bytes());
        let returned = ATTR_CMN_RETURNED_ATTRS | ATTR_CMN_NAME | ATTR_CMN_OBJTYPE | ATTR_CMN_MODTIME;
        rec[REC_RETURNED..REC_RETURNED + 4].copy_from_slice(&returned.to_ne_bytes());
        let name_off = (REC_HEADER - REC_NAME) as i32;
        rec[REC_NAME..REC_NAME + 4].copy_from_slice(&name_off.to_ne_bytes());
        rec[REC_NAME + 4..REC_NAME + 8].copy_from_slice(&(name.len() as u32 + 1).to_ne_bytes());
        rec[REC_OBJTYPE..REC_OBJTYPE + 4].copy_from_slice(&objtype.to_ne_bytes());
        rec[REC_MTIME..REC_MTIME + 8].copy_from_slice(&mtime.to_ne_bytes());
        rec.extend_from_slice(name);
        rec.push(0);
        rec
    }

    #[test]
    fn parses_directory_record() {
        let entry = parse_record(&record(b"src", VDIR, 1_700_000_000)).unwrap().unwrap();
        assert_eq!(entry.name(), "src");
        assert!(entry.is_dir());
        assert_eq!(entry.mtime(), 1_700_000_000);
    }

    #[test]
    fn regular_file_is_not_a_directory() {
        let entry = parse_record(&record(b"lib.rs", 1, 5)).unwrap().unwrap();
        assert!(!entry.is_dir());
    }

    #[test]
    fn truncated_name_is_malformed() {
        let mut rec = record(b"name", 1, 0);
        rec.truncate(REC_HEADER + 2);
        let err = parse_record(&rec).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
