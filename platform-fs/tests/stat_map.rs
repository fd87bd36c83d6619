use std::fs;
use std::io::ErrorKind;

use platform_fs::{stat, FileKind, Map};

#[test]
fn stat_reports_size_and_kind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.txt");
    fs::write(&path, b"hello, world\n").unwrap();

    let st = stat(&path).unwrap();
    assert_eq!(st.size(), 13);
    assert_eq!(st.kind(), FileKind::File);
    assert!(st.is_file());
    assert!(!st.readonly());

    let expected = fs::metadata(&path).unwrap().modified().unwrap();
    let secs = expected
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    assert_eq!(st.mtime(), secs);

    let st = stat(dir.path()).unwrap();
    assert!(st.is_dir());
}

#[test]
fn stat_missing_path_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = stat(dir.path().join("missing")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn readonly_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ro.txt");
    fs::write(&path, b"x").unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_readonly(true);
    fs::set_permissions(&path, perms).unwrap();

    assert!(stat(&path).unwrap().readonly());

    let mut perms = fs::metadata(&path).unwrap().permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    fs::set_permissions(&path, perms).unwrap();
}

#[test]
fn map_exposes_file_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mapped.bin");
    let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    fs::write(&path, &content).unwrap();

    let map = Map::open(&path).unwrap();
    assert_eq!(map.len(), content.len());
    assert!(!map.is_empty());
    assert_eq!(&map[..], &content[..]);
    map.unmap();
}

#[test]
fn empty_file_maps_to_empty_slice() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty");
    fs::write(&path, b"").unwrap();

    let map = Map::open(&path).unwrap();
    assert!(map.is_empty());
    assert_eq!(map.as_slice(), b"");
}

#[test]
fn map_outlives_file_removal_on_unix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gone");
    fs::write(&path, b"still here").unwrap();

    let map = Map::open(&path).unwrap();
    if cfg!(unix) {
        fs::remove_file(&path).unwrap();
    }
    assert_eq!(&map[..], b"still here");
}

#[test]
fn map_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = Map::open(dir.path().join("nope")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[cfg(unix)]
#[test]
fn stat_follows_symlink() {
    use std::os::unix::fs::symlink;

    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("target.txt"), b"12345").unwrap();
    fs::create_dir(dir.path().join("target-dir")).unwrap();
    symlink(dir.path().join("target.txt"), dir.path().join("file-link")).unwrap();
    symlink(dir.path().join("target-dir"), dir.path().join("dir-link")).unwrap();

    let st = stat(dir.path().join("file-link")).unwrap();
    assert_eq!(st.size(), 5);
    assert!(st.is_file());
    assert!(stat(dir.path().join("dir-link")).unwrap().is_dir());

    symlink(dir.path().join("gone"), dir.path().join("dangling")).unwrap();
    let err = stat(dir.path().join("dangling")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// Creating symlinks needs developer mode or elevation; skip when refused.
#[cfg(windows)]
#[test]
fn stat_follows_symlink() {
    use std::os::windows::fs::{symlink_dir, symlink_file};

    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("target.txt"), b"12345").unwrap();
    fs::create_dir(dir.path().join("target-dir")).unwrap();
    if symlink_file(dir.path().join("target.txt"), dir.path().join("file-link")).is_err() {
        return;
    }
    symlink_dir(dir.path().join("target-dir"), dir.path().join("dir-link")).unwrap();

    let st = stat(dir.path().join("file-link")).unwrap();
    assert_eq!(st.size(), 5);
    assert!(st.is_file());
    assert!(stat(dir.path().join("dir-link")).unwrap().is_dir());
}
