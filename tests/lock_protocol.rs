//! Exercises the lock ladder the way a pager would: readers coexisting,
//! a writer promoting past them, and a second handle being locked out of
//! RESERVED/EXCLUSIVE while the first holds them. Each `LockState` here
//! stands in for one connection's `WindowsFile`, sharing one underlying
//! `File` the way two `sqlite3_file`s opened against the same path would
//! share the OS-level byte-range locks.

use std::fs::OpenOptions;

use sqlite_vfs::LockKind;
use sqlite_winvfs::lock::{self, LockState};
use sqlite_winvfs::random::{FixedSource, RandomSource};

fn open(path: &std::path::Path) -> std::fs::File {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .unwrap()
}

#[test]
fn two_readers_can_coexist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let (a, b) = (open(&path), open(&path));
    let (mut sa, mut sb) = (LockState::new(), LockState::new());
    let rng = FixedSource(1);

    assert!(lock::lock(&a, &mut sa, LockKind::Shared, &rng).unwrap());
    assert!(lock::lock(&b, &mut sb, LockKind::Shared, &rng).unwrap());
    assert_eq!(sa.current, LockKind::Shared);
    assert_eq!(sb.current, LockKind::Shared);
}

#[test]
fn second_reserved_is_refused_while_first_holds_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let (a, b) = (open(&path), open(&path));
    let (mut sa, mut sb) = (LockState::new(), LockState::new());
    let rng = FixedSource(2);

    assert!(lock::lock(&a, &mut sa, LockKind::Shared, &rng).unwrap());
    assert!(lock::lock(&b, &mut sb, LockKind::Shared, &rng).unwrap());
    assert!(lock::lock(&a, &mut sa, LockKind::Reserved, &rng).unwrap());

    // On a real Windows host this must fail: RESERVED is exclusive.
    // The non-Windows fallback in `lock::try_lock_range` always grants,
    // so this assertion is only meaningful when compiled for Windows.
    if cfg!(windows) {
        assert!(!lock::lock(&b, &mut sb, LockKind::Reserved, &rng).unwrap());
    }
}

#[test]
fn check_reserved_reports_other_connections_reservation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let (a, b) = (open(&path), open(&path));
    let (mut sa, sb) = (LockState::new(), LockState::new());
    let rng = FixedSource(3);

    assert!(lock::lock(&a, &mut sa, LockKind::Shared, &rng).unwrap());
    assert!(lock::lock(&a, &mut sa, LockKind::Reserved, &rng).unwrap());

    if cfg!(windows) {
        assert!(lock::check_reserved(&b, &sb).unwrap());
    }
}

#[test]
fn downgrade_to_none_releases_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("solo.db");
    let file = open(&path);
    let mut state = LockState::new();
    let rng = FixedSource(4);

    assert!(lock::lock(&file, &mut state, LockKind::Shared, &rng).unwrap());
    assert!(lock::lock(&file, &mut state, LockKind::Reserved, &rng).unwrap());
    assert!(lock::lock(&file, &mut state, LockKind::Exclusive, &rng).unwrap());
    assert!(lock::unlock(&file, &mut state, LockKind::None).unwrap());
    assert_eq!(state.current, LockKind::None);

    // A fresh acquisition from scratch must still succeed afterwards.
    assert!(lock::lock(&file, &mut state, LockKind::Shared, &rng).unwrap());
}

#[test]
fn legacy_host_uses_random_shared_byte() {
    use sqlite_winvfs::variant::{HostVariant, ReaderLockStrategy};

    assert_eq!(
        HostVariant::Legacy.reader_strategy(),
        ReaderLockStrategy::RandomByte
    );
    assert_eq!(HostVariant::Modern.reader_strategy(), ReaderLockStrategy::Whole);
}

#[test]
fn random_source_trait_object_is_usable_across_the_public_api() {
    let rng: Box<dyn RandomSource> = Box::new(FixedSource(9));
    let mut buf = [0u8; 4];
    rng.fill(&mut buf);
    assert_eq!(buf, [9; 4]);
}
