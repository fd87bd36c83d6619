use std::fs;

use platform_fs::{open, LockFlags, OpenFlags};

#[test]
fn shared_then_exclusive_then_unlock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lockfile");
    fs::write(&path, b"").unwrap();

    let file = open(&path, OpenFlags::RDWR).unwrap();
    file.lock(LockFlags::SHARE).unwrap();
    file.lock(LockFlags::UNLOCK).unwrap();
    file.lock(LockFlags::EXCL | LockFlags::NOWAIT).unwrap();
    file.lock(LockFlags::UNLOCK).unwrap();
}

#[test]
fn shared_locks_coexist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared");
    fs::write(&path, b"").unwrap();

    let a = open(&path, OpenFlags::RDONLY).unwrap();
    let b = open(&path, OpenFlags::RDONLY).unwrap();
    a.lock(LockFlags::SHARE | LockFlags::NOWAIT).unwrap();
    b.lock(LockFlags::SHARE | LockFlags::NOWAIT).unwrap();
    a.lock(LockFlags::UNLOCK).unwrap();
    b.lock(LockFlags::UNLOCK).unwrap();
}

// Windows locks belong to the handle, so a second handle in the same
// process observes the conflict. POSIX record locks belong to the process
// and are covered by the cross-process runner instead.
#[cfg(windows)]
#[test]
fn exclusive_lock_blocks_other_handle() {
    use std::io::ErrorKind;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("exclusive");
    fs::write(&path, b"").unwrap();

    let a = open(&path, OpenFlags::RDWR).unwrap();
    let b = open(&path, OpenFlags::RDWR).unwrap();
    a.lock(LockFlags::EXCL).unwrap();
    let err = b.lock(LockFlags::EXCL | LockFlags::NOWAIT).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WouldBlock);
    a.lock(LockFlags::UNLOCK).unwrap();
    b.lock(LockFlags::EXCL | LockFlags::NOWAIT).unwrap();
}

#[test]
fn handles_and_walks_cross_threads() {
    use platform_fs::{DirWalk, Map};
    use std::thread;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threads");
    fs::write(&path, b"shared").unwrap();

    let file = open(&path, OpenFlags::RDWR).unwrap();
    let map = Map::open(&path).unwrap();
    thread::scope(|s| {
        s.spawn(|| {
            file.lock(LockFlags::SHARE).unwrap();
            assert_eq!(&map[..], b"shared");
            file.lock(LockFlags::UNLOCK).unwrap();
        });
    });

    let walk = DirWalk::open(dir.path()).unwrap();
    let names = thread::spawn(move || walk.count()).join().unwrap();
    assert_eq!(names, 1);
}
