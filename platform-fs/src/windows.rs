// Windows-specific implementation using the Windows API
// Uses kernel32.dll functions; all paths go through the wide (W) entry points

#![allow(non_snake_case, dead_code, clippy::upper_case_acronyms)]

use std::ffi::{c_void, OsString};
use std::io;
use std::os::windows::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::ptr;

use crate::dir::DirEntry;
use crate::file::{LockFlags, OpenFlags, Whence};
use crate::stat::{FileKind, Stat};

pub const PATH_MAX: usize = 260;

// Windows API types
type DWORD = u32;
type BOOL = i32;
type HANDLE = *mut c_void;
type LPVOID = *mut c_void;
type LPCWSTR = *const u16;

const INVALID_HANDLE_VALUE: HANDLE = -1isize as HANDLE;

const GENERIC_READ: DWORD = 0x8000_0000;
const GENERIC_WRITE: DWORD = 0x4000_0000;
const FILE_WRITE_DATA: DWORD = 0x0002;
const FILE_GENERIC_WRITE: DWORD = 0x0012_0116;

const FILE_SHARE_READ: DWORD = 0x1;
const FILE_SHARE_WRITE: DWORD = 0x2;
const FILE_SHARE_DELETE: DWORD = 0x4;

const CREATE_NEW: DWORD = 1;
const CREATE_ALWAYS: DWORD = 2;
const OPEN_EXISTING: DWORD = 3;
const OPEN_ALWAYS: DWORD = 4;
const TRUNCATE_EXISTING: DWORD = 5;

const FILE_ATTRIBUTE_READONLY: DWORD = 0x01;
const FILE_ATTRIBUTE_DIRECTORY: DWORD = 0x10;
const FILE_ATTRIBUTE_NORMAL: DWORD = 0x80;
const FILE_ATTRIBUTE_REPARSE_POINT: DWORD = 0x400;
const FILE_FLAG_BACKUP_SEMANTICS: DWORD = 0x0200_0000;

const PAGE_READONLY: DWORD = 0x02;
const FILE_MAP_READ: DWORD = 0x04;

const LOCKFILE_FAIL_IMMEDIATELY: DWORD = 0x1;
const LOCKFILE_EXCLUSIVE_LOCK: DWORD = 0x2;

const FILE_BEGIN: DWORD = 0;
const FILE_CURRENT: DWORD = 1;
const FILE_END: DWORD = 2;

const GET_FILE_EX_INFO_STANDARD: i32 = 0;
const FILE_END_OF_FILE_INFO_CLASS: i32 = 6;

const ERROR_FILE_NOT_FOUND: i32 = 2;
const ERROR_ACCESS_DENIED: i32 = 5;
const ERROR_HANDLE_EOF: i32 = 38;
const ERROR_BROKEN_PIPE: i32 = 109;
const ERROR_NO_MORE_FILES: i32 = 18;
const ERROR_LOCK_VIOLATION: i32 = 33;
const ERROR_IO_PENDING: i32 = 997;

// Seconds between 1601-01-01 and 1970-01-01
const EPOCH_DIFF_SECS: i64 = 11_644_473_600;

// ReadFile/WriteFile take a DWORD length
const IO_LIMIT: usize = DWORD::MAX as usize;

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct FILETIME {
    dwLowDateTime: DWORD,
    dwHighDateTime: DWORD,
}

#[repr(C)]
#[derive(Default)]
struct WIN32_FILE_ATTRIBUTE_DATA {
    dwFileAttributes: DWORD,
    ftCreationTime: FILETIME,
    ftLastAccessTime: FILETIME,
    ftLastWriteTime: FILETIME,
    nFileSizeHigh: DWORD,
    nFileSizeLow: DWORD,
}

#[repr(C)]
#[derive(Default)]
struct BY_HANDLE_FILE_INFORMATION {
    dwFileAttributes: DWORD,
    ftCreationTime: FILETIME,
    ftLastAccessTime: FILETIME,
    ftLastWriteTime: FILETIME,
    dwVolumeSerialNumber: DWORD,
    nFileSizeHigh: DWORD,
    nFileSizeLow: DWORD,
    nNumberOfLinks: DWORD,
    nFileIndexHigh: DWORD,
    nFileIndexLow: DWORD,
}

#[repr(C)]
struct WIN32_FIND_DATAW {
    dwFileAttributes: DWORD,
    ftCreationTime: FILETIME,
    ftLastAccessTime: FILETIME,
    ftLastWriteTime: FILETIME,
    nFileSizeHigh: DWORD,
    nFileSizeLow: DWORD,
    dwReserved0: DWORD,
    dwReserved1: DWORD,
    cFileName: [u16; 260],
    cAlternateFileName: [u16; 14],
}

#[repr(C)]
struct OVERLAPPED {
    Internal: usize,
    InternalHigh: usize,
    Offset: DWORD,
    OffsetHigh: DWORD,
    hEvent: HANDLE,
}

#[repr(C)]
struct FILE_END_OF_FILE_INFO {
    EndOfFile: i64,
}

// External Windows API functions (kernel32.dll)
#[link(name = "kernel32")]
extern "system" {
    fn CreateFileW(
        lpFileName: LPCWSTR,
        dwDesiredAccess: DWORD,
        dwShareMode: DWORD,
        lpSecurityAttributes: LPVOID,
        dwCreationDisposition: DWORD,
        dwFlagsAndAttributes: DWORD,
        hTemplateFile: HANDLE,
    ) -> HANDLE;
    fn ReOpenFile(
        hOriginalFile: HANDLE,
        dwDesiredAccess: DWORD,
        dwShareMode: DWORD,
        dwFlagsAndAttributes: DWORD,
    ) -> HANDLE;
    fn CloseHandle(hObject: HANDLE) -> BOOL;
    fn ReadFile(
        hFile: HANDLE,
        lpBuffer: LPVOID,
        nNumberOfBytesToRead: DWORD,
        lpNumberOfBytesRead: *mut DWORD,
        lpOverlapped: *mut OVERLAPPED,
    ) -> BOOL;
    fn WriteFile(
        hFile: HANDLE,
        lpBuffer: *const c_void,
        nNumberOfBytesToWrite: DWORD,
        lpNumberOfBytesWritten: *mut DWORD,
        lpOverlapped: *mut OVERLAPPED,
    ) -> BOOL;
    fn GetFileSizeEx(hFile: HANDLE, lpFileSize: *mut i64) -> BOOL;
    fn GetFileAttributesExW(
        lpFileName: LPCWSTR,
        fInfoLevelId: i32,
        lpFileInformation: LPVOID,
    ) -> BOOL;
    fn GetFileInformationByHandle(
        hFile: HANDLE,
        lpFileInformation: *mut BY_HANDLE_FILE_INFORMATION,
    ) -> BOOL;
    fn CreateFileMappingW(
        hFile: HANDLE,
        lpFileMappingAttributes: LPVOID,
        flProtect: DWORD,
        dwMaximumSizeHigh: DWORD,
        dwMaximumSizeLow: DWORD,
        lpName: LPCWSTR,
    ) -> HANDLE;
    fn MapViewOfFile(
        hFileMappingObject: HANDLE,
        dwDesiredAccess: DWORD,
        dwFileOffsetHigh: DWORD,
        dwFileOffsetLow: DWORD,
        dwNumberOfBytesToMap: usize,
    ) -> LPVOID;
    fn UnmapViewOfFile(lpBaseAddress: *const c_void) -> BOOL;
    fn LockFileEx(
        hFile: HANDLE,
        dwFlags: DWORD,
        dwReserved: DWORD,
        nNumberOfBytesToLockLow: DWORD,
        nNumberOfBytesToLockHigh: DWORD,
        lpOverlapped: *mut OVERLAPPED,
    ) -> BOOL;
    fn UnlockFileEx(
        hFile: HANDLE,
        dwReserved: DWORD,
        nNumberOfBytesToUnlockLow: DWORD,
        nNumberOfBytesToUnlockHigh: DWORD,
        lpOverlapped: *mut OVERLAPPED,
    ) -> BOOL;
    fn SetFilePointerEx(
        hFile: HANDLE,
        liDistanceToMove: i64,
        lpNewFilePointer: *mut i64,
        dwMoveMethod: DWORD,
    ) -> BOOL;
    fn SetFileInformationByHandle(
        hFile: HANDLE,
        FileInformationClass: i32,
        lpFileInformation: LPVOID,
        dwBufferSize: DWORD,
    ) -> BOOL;
    fn GetCurrentDirectoryW(nBufferLength: DWORD, lpBuffer: *mut u16) -> DWORD;
    fn FindFirstFileW(lpFileName: LPCWSTR, lpFindFileData: *mut WIN32_FIND_DATAW) -> HANDLE;
    fn FindNextFileW(hFindFile: HANDLE, lpFindFileData: *mut WIN32_FIND_DATAW) -> BOOL;
    fn FindClose(hFindFile: HANDLE) -> BOOL;
}

// NUL-terminated UTF-16 copy of a path
fn wide(path: &Path) -> io::Result<Vec<u16>> {
    let mut buf: Vec<u16> = path.as_os_str().encode_wide().collect();
    if buf.contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "path contains an interior NUL character",
        ));
    }
    buf.push(0);
    Ok(buf)
}

fn cvt(ret: BOOL) -> io::Result<()> {
    if ret == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn filetime_to_unix(ft: FILETIME) -> i64 {
    let ticks = ((ft.dwHighDateTime as u64) << 32) | ft.dwLowDateTime as u64;
    (ticks / 10_000_000) as i64 - EPOCH_DIFF_SECS
}

fn stat_from(attrs: DWORD, size_high: DWORD, size_low: DWORD, mtime: FILETIME) -> Stat {
    let kind = if attrs & FILE_ATTRIBUTE_DIRECTORY != 0 {
        FileKind::Dir
    } else {
        FileKind::File
    };
    Stat {
        size: ((size_high as u64) << 32) | size_low as u64,
        kind,
        mtime: filetime_to_unix(mtime),
        readonly: attrs & FILE_ATTRIBUTE_READONLY != 0,
    }
}

pub fn stat(path: &Path) -> io::Result<Stat> {
    let path = wide(path)?;
    let mut data = WIN32_FILE_ATTRIBUTE_DATA::default();
    // SAFETY: `path` is NUL-terminated and `data` is writable.
    cvt(unsafe {
        GetFileAttributesExW(
            path.as_ptr(),
            GET_FILE_EX_INFO_STANDARD,
            (&mut data as *mut WIN32_FILE_ATTRIBUTE_DATA).cast(),
        )
    })?;
    if data.dwFileAttributes & FILE_ATTRIBUTE_REPARSE_POINT != 0 {
        return stat_target(&path);
    }
    Ok(stat_from(
        data.dwFileAttributes,
        data.nFileSizeHigh,
        data.nFileSizeLow,
        data.ftLastWriteTime,
    ))
}

// Attribute queries describe a reparse point itself; opening it resolves the link
fn stat_target(path: &[u16]) -> io::Result<Stat> {
    // SAFETY: `path` is NUL-terminated. No access rights are requested.
    let handle = unsafe {
        CreateFileW(
            path.as_ptr(),
            0,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            ptr::null_mut(),
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS,
            ptr::null_mut(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }
    let st = fstat(handle);
    // SAFETY: `handle` was opened above and is not used again.
    unsafe { CloseHandle(handle) };
    st
}

pub fn fstat(handle: HANDLE) -> io::Result<Stat> {
    let mut info = BY_HANDLE_FILE_INFORMATION::default();
    // SAFETY: `info` is writable; a bad handle is reported by the call.
    cvt(unsafe { GetFileInformationByHandle(handle, &mut info) })?;
    Ok(stat_from(
        info.dwFileAttributes,
        info.nFileSizeHigh,
        info.nFileSizeLow,
        info.ftLastWriteTime,
    ))
}

// Memory mapping

pub struct RawMap {
    addr: *mut u8,
    len: usize,
    file: HANDLE,
    mapping: HANDLE,
}

impl RawMap {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: `addr` points to a live FILE_MAP_READ view of `len` bytes.
        unsafe { std::slice::from_raw_parts(self.addr, self.len) }
    }
}

pub fn map(path: &Path) -> io::Result<RawMap> {
    let path = wide(path)?;
    // SAFETY: `path` is NUL-terminated.
    let file = unsafe {
        CreateFileW(
            path.as_ptr(),
            GENERIC_READ,
            FILE_SHARE_READ,
            ptr::null_mut(),
            OPEN_EXISTING,
            FILE_ATTRIBUTE_NORMAL,
            ptr::null_mut(),
        )
    };
    if file == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }

    match map_handle(file) {
        Ok(map) => Ok(map),
        Err(err) => {
            // SAFETY: `file` was opened above and is not referenced elsewhere.
            unsafe { CloseHandle(file) };
            Err(err)
        }
    }
}

fn map_handle(file: HANDLE) -> io::Result<RawMap> {
    let mut size = 0i64;
    // SAFETY: `size` is writable.
    cvt(unsafe { GetFileSizeEx(file, &mut size) })?;
    let len = usize::try_from(size).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidData, "file too large to map")
    })?;

    // CreateFileMapping rejects empty files
    if len == 0 {
        return Ok(RawMap {
            addr: ptr::null_mut(),
            len: 0,
            file,
            mapping: ptr::null_mut(),
        });
    }

    // SAFETY: `file` is an open handle with read access.
    let mapping = unsafe {
        CreateFileMappingW(file, ptr::null_mut(), PAGE_READONLY, 0, 0, ptr::null())
    };
    if mapping.is_null() {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: `mapping` is a read-only section covering the whole file.
    let addr = unsafe { MapViewOfFile(mapping, FILE_MAP_READ, 0, 0, len) };
    if addr.is_null() {
        let err = io::Error::last_os_error();
        // SAFETY: `mapping` was created above and has no views.
        unsafe { CloseHandle(mapping) };
        return Err(err);
    }

    Ok(RawMap {
        addr: addr.cast(),
        len,
        file,
        mapping,
    })
}

/// # Safety
///
/// `map` must come from [`map`] and must not be used afterwards.
pub unsafe fn unmap(map: &mut RawMap) {
    // SAFETY: the caller guarantees the view and handles are live and unshared.
    unsafe {
        if !map.addr.is_null() && UnmapViewOfFile(map.addr as *const c_void) == 0 {
            log::warn!("UnmapViewOfFile failed: {}", io::Error::last_os_error());
        }
        if !map.mapping.is_null() {
            CloseHandle(map.mapping);
        }
        if !map.file.is_null() {
            CloseHandle(map.file);
        }
    }
    map.addr = ptr::null_mut();
    map.mapping = ptr::null_mut();
    map.file = ptr::null_mut();
    map.len = 0;
}

// Input/output

// (desired access, creation disposition) for CreateFileW
fn open_mode(flags: OpenFlags) -> (DWORD, DWORD) {
    let mut access = if flags.contains(OpenFlags::WRONLY) {
        GENERIC_WRITE
    } else if flags.contains(OpenFlags::RDWR) {
        GENERIC_READ | GENERIC_WRITE
    } else {
        GENERIC_READ
    };

    if flags.contains(OpenFlags::APPEND) {
        // Append-only writes: everything GENERIC_WRITE grants except FILE_WRITE_DATA
        access &= !GENERIC_WRITE;
        access |= FILE_GENERIC_WRITE & !FILE_WRITE_DATA;
    }

    let creat = flags.contains(OpenFlags::CREAT);
    // Truncating dispositions need GENERIC_WRITE; append handles truncate after opening
    let trunc = flags.contains(OpenFlags::TRUNC) && !flags.contains(OpenFlags::APPEND);
    let disposition = match (creat, trunc, flags.contains(OpenFlags::EXCL)) {
        (true, _, true) => CREATE_NEW,
        (true, true, false) => CREATE_ALWAYS,
        (true, false, false) => OPEN_ALWAYS,
        (false, true, _) => TRUNCATE_EXISTING,
        (false, false, _) => OPEN_EXISTING,
    };

    (access, disposition)
}

pub fn open(path: &Path, flags: OpenFlags) -> io::Result<HANDLE> {
    let path = wide(path)?;
    let (access, disposition) = open_mode(flags);
    // SAFETY: `path` is NUL-terminated.
    let handle = unsafe {
        CreateFileW(
            path.as_ptr(),
            access,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            ptr::null_mut(),
            disposition,
            FILE_ATTRIBUTE_NORMAL,
            ptr::null_mut(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }
    if flags.contains(OpenFlags::APPEND | OpenFlags::TRUNC) {
        if let Err(err) = truncate(handle, 0) {
            // SAFETY: `handle` was opened above and is not returned.
            unsafe { CloseHandle(handle) };
            return Err(err);
        }
    }
    Ok(handle)
}

pub fn close(handle: HANDLE) -> io::Result<()> {
    // SAFETY: the caller gives up `handle`; it is not used again.
    cvt(unsafe { CloseHandle(handle) })
}

fn whole_file() -> OVERLAPPED {
    OVERLAPPED {
        Internal: 0,
        InternalHigh: 0,
        Offset: 0,
        OffsetHigh: 0,
        hEvent: ptr::null_mut(),
    }
}

pub fn lock(handle: HANDLE, flags: LockFlags) -> io::Result<()> {
    let mut overlapped = whole_file();

    if flags.contains(LockFlags::UNLOCK) {
        // SAFETY: `overlapped` outlives the synchronous call.
        return cvt(unsafe {
            UnlockFileEx(handle, 0, DWORD::MAX, DWORD::MAX, &mut overlapped)
        });
    }

    let mut dwflags = 0;
    if flags.contains(LockFlags::EXCL) {
        dwflags |= LOCKFILE_EXCLUSIVE_LOCK;
    }
    if flags.contains(LockFlags::NOWAIT) {
        dwflags |= LOCKFILE_FAIL_IMMEDIATELY;
    }

    // SAFETY: `overlapped` outlives the synchronous call.
    let ret = unsafe { LockFileEx(handle, dwflags, 0, DWORD::MAX, DWORD::MAX, &mut overlapped) };
    if ret != 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(ERROR_LOCK_VIOLATION) | Some(ERROR_IO_PENDING) if flags.contains(LockFlags::NOWAIT) => {
            Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "file is locked by another handle",
            ))
        }
        _ => Err(err),
    }
}

pub fn truncate(handle: HANDLE, len: u64) -> io::Result<()> {
    let len = i64::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length out of range"))?;
    match set_end_of_file(handle, len) {
        Err(err) if err.raw_os_error() == Some(ERROR_ACCESS_DENIED) && can_append(handle) => {
            truncate_reopened(handle, len)
        }
        res => res,
    }
}

// Append-only handles hold FILE_APPEND_DATA but not FILE_WRITE_DATA, which
// FileEndOfFileInfo requires. A zero-length write succeeds only with write access.
fn can_append(handle: HANDLE) -> bool {
    let mut done: DWORD = 0;
    // SAFETY: a zero-length write reads nothing from the buffer.
    unsafe { WriteFile(handle, b"".as_ptr().cast(), 0, &mut done, ptr::null_mut()) != 0 }
}

fn truncate_reopened(handle: HANDLE, len: i64) -> io::Result<()> {
    // SAFETY: `handle` is an open file handle.
    let writer = unsafe {
        ReOpenFile(
            handle,
            GENERIC_WRITE,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            0,
        )
    };
    if writer == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }
    let res = set_end_of_file(writer, len);
    // SAFETY: `writer` was opened above and is not used again.
    unsafe { CloseHandle(writer) };
    res
}

fn set_end_of_file(handle: HANDLE, len: i64) -> io::Result<()> {
    let mut info = FILE_END_OF_FILE_INFO { EndOfFile: len };
    // SAFETY: `info` is a valid FILE_END_OF_FILE_INFO for the call.
    cvt(unsafe {
        SetFileInformationByHandle(
            handle,
            FILE_END_OF_FILE_INFO_CLASS,
            (&mut info as *mut FILE_END_OF_FILE_INFO).cast(),
            std::mem::size_of::<FILE_END_OF_FILE_INFO>() as DWORD,
        )
    })
}

pub fn seek(handle: HANDLE, off: i64, whence: Whence) -> io::Result<u64> {
    let method = match whence {
        Whence::Set => FILE_BEGIN,
        Whence::Cur => FILE_CURRENT,
        Whence::End => FILE_END,
    };
    let mut pos = 0i64;
    // SAFETY: `pos` is writable.
    cvt(unsafe { SetFilePointerEx(handle, off, &mut pos, method) })?;
    Ok(pos as u64)
}

pub fn read(handle: HANDLE, buf: &mut [u8]) -> io::Result<usize> {
    let len = buf.len().min(IO_LIMIT) as DWORD;
    let mut done: DWORD = 0;
    // SAFETY: `buf` is valid for writes of `len` bytes.
    let ret = unsafe {
        ReadFile(
            handle,
            buf.as_mut_ptr().cast(),
            len,
            &mut done,
            ptr::null_mut(),
        )
    };
    if ret == 0 {
        let err = io::Error::last_os_error();
        // End of file on pipes and some devices
        return match err.raw_os_error() {
            Some(ERROR_HANDLE_EOF) | Some(ERROR_BROKEN_PIPE) => Ok(0),
            _ => Err(err),
        };
    }
    Ok(done as usize)
}

pub fn write(handle: HANDLE, buf: &[u8]) -> io::Result<usize> {
    let len = buf.len().min(IO_LIMIT) as DWORD;
    let mut done: DWORD = 0;
    // SAFETY: `buf` is valid for reads of `len` bytes.
    cvt(unsafe {
        WriteFile(
            handle,
            buf.as_ptr().cast(),
            len,
            &mut done,
            ptr::null_mut(),
        )
    })?;
    Ok(done as usize)
}

// Directory operations

pub fn getcwd() -> io::Result<PathBuf> {
    let mut buf: Vec<u16> = Vec::new();
    loop {
        // SAFETY: `buf` has `buf.len()` writable elements.
        let n = unsafe { GetCurrentDirectoryW(buf.len() as DWORD, buf.as_mut_ptr()) } as usize;
        if n == 0 {
            return Err(io::Error::last_os_error());
        }
        // On success the count excludes the NUL; when too small it includes it
        if n < buf.len() {
            buf.truncate(n);
            return Ok(PathBuf::from(OsString::from_wide(&buf)));
        }
        buf.resize(n, 0);
    }
}

pub struct RawDir {
    handle: HANDLE,
    first: Option<Box<WIN32_FIND_DATAW>>,
    done: bool,
}

// SAFETY: the find handle is only touched through `&mut self`.
unsafe impl Send for RawDir {}

fn empty_find_data() -> Box<WIN32_FIND_DATAW> {
    Box::new(WIN32_FIND_DATAW {
        dwFileAttributes: 0,
        ftCreationTime: FILETIME::default(),
        ftLastAccessTime: FILETIME::default(),
        ftLastWriteTime: FILETIME::default(),
        nFileSizeHigh: 0,
        nFileSizeLow: 0,
        dwReserved0: 0,
        dwReserved1: 0,
        cFileName: [0; 260],
        cAlternateFileName: [0; 14],
    })
}

pub fn opendir(path: &Path) -> io::Result<RawDir> {
    let pattern = wide(&path.join("*"))?;
    let mut data = empty_find_data();
    // SAFETY: `pattern` is NUL-terminated and `data` is writable.
    let handle = unsafe { FindFirstFileW(pattern.as_ptr(), &mut *data) };
    if handle == INVALID_HANDLE_VALUE {
        let err = io::Error::last_os_error();
        // A pattern that matches nothing is an empty directory, not an error
        if err.raw_os_error() == Some(ERROR_FILE_NOT_FOUND) {
            return Ok(RawDir {
                handle,
                first: None,
                done: true,
            });
        }
        return Err(err);
    }
    Ok(RawDir {
        handle,
        first: Some(data),
        done: false,
    })
}

fn entry_from(data: &WIN32_FIND_DATAW) -> Option<DirEntry> {
    let len = data
        .cFileName
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(data.cFileName.len());
    let name = &data.cFileName[..len];
    if name == [b'.' as u16] || name == [b'.' as u16, b'.' as u16] {
        return None;
    }
    let attrs = data.dwFileAttributes;
    Some(DirEntry {
        name: OsString::from_wide(name),
        is_dir: attrs & FILE_ATTRIBUTE_DIRECTORY != 0 && attrs & FILE_ATTRIBUTE_REPARSE_POINT == 0,
        mtime: filetime_to_unix(data.ftLastWriteTime),
    })
}

pub fn readdir(dir: &mut RawDir, out: &mut Vec<DirEntry>, max: usize) -> io::Result<()> {
    if let Some(first) = dir.first.take() {
        out.extend(entry_from(&first));
    }

    let mut data = empty_find_data();
    while !dir.done && out.len() < max {
        // SAFETY: `handle` is an open find handle and `data` is writable.
        if unsafe { FindNextFileW(dir.handle, &mut *data) } == 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(ERROR_NO_MORE_FILES) {
                return Err(err);
            }
            dir.done = true;
            break;
        }
        out.extend(entry_from(&data));
    }
    Ok(())
}

impl Drop for RawDir {
    fn drop(&mut self) {
        if self.handle != INVALID_HANDLE_VALUE {
            // SAFETY: `handle` is open and closed exactly once, here.
            unsafe { FindClose(self.handle) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filetime_epoch_maps_to_unix_zero() {
        let ticks = EPOCH_DIFF_SECS as u64 * 10_000_000;
        let ft = FILETIME {
            dwLowDateTime: ticks as u32,
            dwHighDateTime: (ticks >> 32) as u32,
        };
        assert_eq!(filetime_to_unix(ft), 0);
    }

    #[test]
    fn creation_disposition_follows_flags() {
        assert_eq!(open_mode(OpenFlags::RDONLY), (GENERIC_READ, OPEN_EXISTING));
        assert_eq!(open_mode(OpenFlags::CREAT | OpenFlags::WRONLY).1, OPEN_ALWAYS);
        assert_eq!(open_mode(OpenFlags::CREAT | OpenFlags::TRUNC | OpenFlags::WRONLY).1, CREATE_ALWAYS);
        assert_eq!(open_mode(OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::RDWR).1, CREATE_NEW);
        assert_eq!(open_mode(OpenFlags::TRUNC | OpenFlags::WRONLY).1, TRUNCATE_EXISTING);
    }

    #[test]
    fn append_with_trunc_opens_without_truncating_disposition() {
        let append = OpenFlags::WRONLY | OpenFlags::APPEND;
        assert_eq!(open_mode(append | OpenFlags::TRUNC).1, OPEN_EXISTING);
        assert_eq!(open_mode(append | OpenFlags::TRUNC | OpenFlags::CREAT).1, OPEN_ALWAYS);
        assert_eq!(open_mode(append | OpenFlags::CREAT | OpenFlags::EXCL).1, CREATE_NEW);
    }

    #[test]
    fn append_drops_write_data_access() {
        let (access, _) = open_mode(OpenFlags::WRONLY | OpenFlags::APPEND);
        assert_eq!(access & GENERIC_WRITE, 0);
        assert_eq!(access & FILE_WRITE_DATA, 0);
        assert_ne!(access & 0x0004, 0); // FILE_APPEND_DATA
    }
}
