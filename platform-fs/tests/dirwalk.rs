use std::collections::BTreeMap;
use std::fs;

use platform_fs::{getcwd, DirWalk, DIRENT_MAX};

fn populate(root: &std::path::Path, files: usize, dirs: usize) {
    for i in 0..files {
        fs::write(root.join(format!("file-{:03}.txt", i)), b"x").unwrap();
    }
    for i in 0..dirs {
        fs::create_dir(root.join(format!("dir-{:03}", i))).unwrap();
    }
}

#[test]
fn iterator_lists_every_entry_once() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path(), 150, 20);

    let mut seen = BTreeMap::new();
    for entry in DirWalk::open(dir.path()).unwrap() {
        let entry = entry.unwrap();
        let name = entry.name().to_str().unwrap().to_owned();
        assert!(seen.insert(name, entry.is_dir()).is_none());
    }

    assert_eq!(seen.len(), 170);
    assert!(!seen.contains_key("."));
    assert!(!seen.contains_key(".."));
    assert_eq!(seen.get("dir-007"), Some(&true));
    assert_eq!(seen.get("file-149.txt"), Some(&false));
}

#[test]
fn explicit_batches_never_exceed_dirent_max() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path(), 2 * DIRENT_MAX + 5, 0);

    let mut walk = DirWalk::open(dir.path()).unwrap();
    let mut total = 0;
    let mut batches = 0;
    loop {
        let mut in_batch = 0;
        while let Some(entry) = walk.next_entry() {
            assert!(!entry.is_dir());
            in_batch += 1;
        }
        assert!(in_batch <= DIRENT_MAX);
        total += in_batch;
        batches += 1;
        if !walk.buffer().unwrap() {
            break;
        }
    }
    walk.close();

    assert_eq!(total, 2 * DIRENT_MAX + 5);
    assert!(batches >= 3);
}

#[test]
fn empty_directory_yields_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut walk = DirWalk::open(dir.path()).unwrap();
    assert!(walk.next_entry().is_none());
    assert!(!walk.buffer().unwrap());
    assert!(walk.next().is_none());
}

#[test]
fn entry_mtime_matches_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stamped");
    fs::write(&path, b"t").unwrap();

    let entry = DirWalk::open(dir.path()).unwrap().next().unwrap().unwrap();
    let modified = fs::metadata(&path).unwrap().modified().unwrap();
    let secs = modified
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    assert_eq!(entry.name(), "stamped");
    assert_eq!(entry.mtime(), secs);
}

#[cfg(unix)]
#[test]
fn symlink_to_directory_is_not_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("real")).unwrap();
    std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();

    let entries: BTreeMap<_, _> = DirWalk::open(dir.path())
        .unwrap()
        .map(|e| e.unwrap())
        .map(|e| (e.name().to_owned(), e.is_dir()))
        .collect();
    assert_eq!(entries.get(std::ffi::OsStr::new("real")), Some(&true));
    assert_eq!(entries.get(std::ffi::OsStr::new("link")), Some(&false));
}

#[test]
fn opening_a_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(DirWalk::open(dir.path().join("absent")).is_err());
}

#[test]
fn getcwd_matches_std() {
    assert_eq!(getcwd().unwrap(), std::env::current_dir().unwrap());
}

#[test]
fn iterator_stays_finished() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path(), 3, 0);

    let mut walk = DirWalk::open(dir.path()).unwrap();
    assert_eq!(walk.by_ref().count(), 3);
    assert!(walk.next().is_none());
    assert!(walk.next().is_none());
}

// Losing search permission mid-walk makes fstatat fail for the next batch.
// Root bypasses the permission check, so there is nothing to observe then.
#[cfg(target_os = "linux")]
#[test]
fn iterator_ends_after_error() {
    use std::os::unix::fs::PermissionsExt;

    // SAFETY: geteuid has no preconditions.
    if unsafe { libc::geteuid() } == 0 {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    populate(dir.path(), 2 * DIRENT_MAX, 0);

    let mut walk = DirWalk::open(dir.path()).unwrap();
    for _ in 0..DIRENT_MAX {
        walk.next().unwrap().unwrap();
    }

    fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o600)).unwrap();
    let failed = walk.next();
    let after = walk.next();
    fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o700)).unwrap();

    assert!(matches!(failed, Some(Err(_))));
    assert!(after.is_none());
}
