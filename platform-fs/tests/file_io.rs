use std::fs;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use platform_fs::{open, stat, Handle, Map, OpenFlags, Whence};

#[test]
fn read_matches_map() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("source.rs");
    let content = "fn main() {}\n".repeat(500);
    fs::write(&path, &content).unwrap();

    let size = stat(&path).unwrap().size() as usize;
    let map = Map::open(&path).unwrap();

    let file = open(&path, OpenFlags::RDONLY).unwrap();
    let mut buf = vec![0u8; size];
    assert_eq!(file.read(&mut buf).unwrap(), size);
    file.close().unwrap();

    assert_eq!(&buf[..], &map[..]);
}

#[test]
fn read_stops_short_at_end_of_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short");
    fs::write(&path, b"abc").unwrap();

    let file = open(&path, OpenFlags::RDONLY).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(file.read(&mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"abc");
    assert_eq!(file.read(&mut buf).unwrap(), 0);
}

#[test]
fn create_write_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("new.txt");

    let file = open(&path, OpenFlags::WRONLY | OpenFlags::CREAT).unwrap();
    assert_eq!(file.write(b"first line\n").unwrap(), 11);
    drop(file);

    assert_eq!(fs::read(&path).unwrap(), b"first line\n");
}

#[test]
fn open_without_create_fails_for_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = open(dir.path().join("missing"), OpenFlags::RDWR).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn exclusive_create_refuses_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("exists");
    fs::write(&path, b"keep").unwrap();

    let err = open(&path, OpenFlags::WRONLY | OpenFlags::CREAT | OpenFlags::EXCL).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(fs::read(&path).unwrap(), b"keep");
}

#[test]
fn append_goes_to_the_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log");
    fs::write(&path, b"one\n").unwrap();

    let file = open(&path, OpenFlags::WRONLY | OpenFlags::APPEND).unwrap();
    file.seek(0, Whence::Set).unwrap();
    file.write(b"two\n").unwrap();
    drop(file);

    assert_eq!(fs::read(&path).unwrap(), b"one\ntwo\n");
}

#[test]
fn trunc_discards_previous_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trunc");
    fs::write(&path, b"old contents").unwrap();

    let file = open(&path, OpenFlags::WRONLY | OpenFlags::TRUNC).unwrap();
    file.write(b"new").unwrap();
    drop(file);

    assert_eq!(fs::read(&path).unwrap(), b"new");
}

#[test]
fn seek_positions_reads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seek");
    fs::write(&path, b"0123456789").unwrap();

    let file = open(&path, OpenFlags::RDONLY).unwrap();
    assert_eq!(file.seek(4, Whence::Set).unwrap(), 4);
    let mut buf = [0u8; 2];
    file.read(&mut buf).unwrap();
    assert_eq!(&buf, b"45");

    assert_eq!(file.seek(1, Whence::Cur).unwrap(), 7);
    assert_eq!(file.seek(-3, Whence::End).unwrap(), 7);
    assert_eq!(file.seek(0, Whence::End).unwrap(), 10);
}

#[test]
fn truncate_shrinks_and_extends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resize");
    fs::write(&path, b"abcdef").unwrap();

    let file = open(&path, OpenFlags::RDWR).unwrap();
    file.truncate(3).unwrap();
    assert_eq!(file.stat().unwrap().size(), 3);
    file.truncate(8).unwrap();
    assert_eq!(file.stat().unwrap().size(), 8);
    drop(file);

    assert_eq!(fs::read(&path).unwrap(), b"abc\0\0\0\0\0");
}

#[test]
fn handle_composes_with_std_io_traits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("traits");

    let mut file = Handle::open(&path, OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
    writeln!(file, "line {}", 1).unwrap();
    file.flush().unwrap();
    Seek::seek(&mut file, SeekFrom::Start(0)).unwrap();

    let mut text = String::new();
    file.read_to_string(&mut text).unwrap();
    assert_eq!(text, "line 1\n");
}

#[test]
fn raw_handle_round_trip_keeps_file_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw");
    fs::write(&path, b"raw").unwrap();

    let file = open(&path, OpenFlags::RDONLY).unwrap();
    let raw = file.into_raw();
    // SAFETY: `raw` was just released by its owner.
    let file = unsafe { Handle::from_raw(raw) };
    let mut buf = [0u8; 3];
    file.read(&mut buf).unwrap();
    assert_eq!(&buf, b"raw");
    platform_fs::close(file).unwrap();
}

#[test]
fn append_with_trunc_empties_then_appends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.txt");
    fs::write(&path, b"old contents").unwrap();

    let file = open(&path, OpenFlags::WRONLY | OpenFlags::APPEND | OpenFlags::TRUNC).unwrap();
    assert_eq!(file.write(b"new").unwrap(), 3);
    file.seek(0, Whence::Set).unwrap();
    file.write(b"er").unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"newer");

    file.truncate(1).unwrap();
    file.close().unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"n");
}

#[test]
fn truncate_needs_write_access() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ro.txt");
    fs::write(&path, b"keep").unwrap();

    let file = open(&path, OpenFlags::RDONLY).unwrap();
    assert!(file.truncate(0).is_err());
    drop(file);
    assert_eq!(fs::read(&path).unwrap(), b"keep");
}
