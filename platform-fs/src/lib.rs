//! Portable file-system primitives.
//!
//! One API for file status, read-only memory maps, raw file I/O, advisory
//! locking and buffered directory walks on Linux, macOS and Windows. Every
//! operation is a thin translation of one or two native calls; errors are
//! always reported as [`std::io::Error`].
//!
//! ```no_run
//! use platform_fs::{DirWalk, Map, OpenFlags};
//!
//! # fn main() -> std::io::Result<()> {
//! let map = Map::open("Cargo.toml")?;
//! let file = platform_fs::open("Cargo.toml", OpenFlags::RDONLY)?;
//! let mut buf = vec![0u8; map.len()];
//! file.read(&mut buf)?;
//! assert_eq!(&buf[..], &map[..]);
//!
//! for entry in DirWalk::open(".")? {
//!     let entry = entry?;
//!     println!("{:?} dir={} mtime={}", entry.name(), entry.is_dir(), entry.mtime());
//! }
//! # Ok(())
//! # }
//! ```

// Platform-specific implementations
// Linux and macOS share the POSIX layer, Windows uses the Win32 API directly

#[cfg(target_os = "linux")]
#[path = "linux.rs"]
mod platform;

#[cfg(target_os = "macos")]
#[path = "macos.rs"]
mod platform;

#[cfg(target_os = "windows")]
#[path = "windows.rs"]
mod platform;

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
compile_error!("platform-fs supports Linux, macOS and Windows only");

pub mod dir;
pub mod file;
pub mod map;
pub mod stat;

pub use dir::{getcwd, DirEntry, DirWalk, DIRENT_MAX};
pub use file::{close, open, Handle, LockFlags, OpenFlags, RawHandle, Whence};
pub use map::Map;
pub use stat::{stat, FileKind, Stat};

#[cfg(unix)]
pub use file::sendfile;

/// Longest path the native APIs accept, terminator included.
pub const PATH_MAX: usize = platform::PATH_MAX;
