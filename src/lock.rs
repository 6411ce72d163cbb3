//! The byte-range lock protocol (spec C2) — the core of this crate.
//!
//! Grounded on `os_win.c`'s `sqlite3OsLock`/`sqlite3OsUnlock`/
//! `sqlite3OsCheckReservedLock`, `getReadLock`/`unlockReadLock`. Every
//! process sharing a database file, on any platform, must agree on the byte
//! offsets in [`crate::constants`] and on this state machine; nothing here
//! is free to diverge from the reference behavior even where it looks
//! awkward in Rust.
//!
//! Lock state advances NONE -> SHARED -> RESERVED -> (PENDING) -> EXCLUSIVE
//! and never skips a step on the way up; `unlock` can drop straight back to
//! any weaker state. [`LockKind`] (from the bridge crate) is ordered by
//! exactly this ladder, so `want <= current` is the no-op check used
//! throughout.

use std::fs::File;
use std::time::Duration;

use sqlite_vfs::LockKind;

use crate::constants::{
    PENDING_BYTE, PENDING_RETRIES, PENDING_RETRY_DELAY_MS, RESERVED_BYTE, SHARED_FIRST,
    SHARED_SIZE,
};
use crate::error::WinOsError;
use crate::mutex;
use crate::random::RandomSource;
use crate::variant::{self, HostVariant, ReaderLockStrategy};

/// Per-handle lock bookkeeping that lives alongside the open file. Needed
/// because the byte-range locks themselves are inherently process-global —
/// this struct is what lets a single [`crate::file::WindowsFile`] know
/// what *it* currently holds without re-deriving that from the OS.
#[derive(Debug, Default)]
pub struct LockState {
    pub current: LockKind,
    /// Set only on [`HostVariant::Legacy`] hosts, where a SHARED lock is one
    /// randomly chosen byte within the pool rather than the whole range.
    shared_byte: Option<u32>,
    /// Whether this handle holds `PENDING_BYTE`. Held for the entire
    /// EXCLUSIVE-promotion attempt (successful or not, while still
    /// retrying) and released once the lock drops back to RESERVED or
    /// below — tracked separately from `current` because `PENDING` itself
    /// is a way station, never the terminal state the pager asks for.
    pending_held: bool,
}

impl LockState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Attempt to move `state.current` to `want`. Returns `Ok(false)` on lock
/// contention (never an error — contention is an expected, common outcome,
/// matching `SQLITE_BUSY` being a return code rather than a C error path).
pub fn lock(
    file: &File,
    state: &mut LockState,
    want: LockKind,
    random: &dyn RandomSource,
) -> Result<bool, WinOsError> {
    if want <= state.current {
        return Ok(true);
    }
    // Serialize the in-memory lock-state bookkeeping below across threads
    // in this process, mirroring `sqlite3OsEnterMutex`/`LeaveMutex` around
    // the reference's own lock-state transitions.
    let _guard = mutex::enter();
    // Only None->Shared, Shared->Reserved, and *->Exclusive are requested by
    // the pager; PENDING is an internal way station on the path to
    // EXCLUSIVE, matching the reference implementation's lock ladder.
    let host = variant::detect();

    if state.current == LockKind::None {
        if !acquire_shared(file, state, host, random)? {
            return Ok(false);
        }
        if want == LockKind::Shared {
            return Ok(true);
        }
    }

    if want == LockKind::Reserved {
        debug_assert_eq!(state.current, LockKind::Shared);
        if !try_lock_range(file, host, RESERVED_BYTE, 1, false)? {
            return Ok(false);
        }
        state.current = LockKind::Reserved;
        return Ok(true);
    }

    if want == LockKind::Exclusive {
        return acquire_exclusive(file, state, host);
    }

    Ok(true)
}

/// Drop the lock back to `to`, which must not be stronger than the current
/// lock. `to` is usually [`LockKind::None`] or [`LockKind::Shared`].
pub fn unlock(file: &File, state: &mut LockState, to: LockKind) -> Result<bool, WinOsError> {
    if to >= state.current {
        return Ok(true);
    }
    let _guard = mutex::enter();
    let host = variant::detect();

    if state.current == LockKind::Exclusive {
        unlock_range(file, host, SHARED_FIRST, SHARED_SIZE)?;
        state.current = LockKind::Reserved;
    }
    if state.pending_held && to < LockKind::Reserved {
        unlock_range(file, host, PENDING_BYTE, 1)?;
        state.pending_held = false;
    }
    if to == LockKind::Shared {
        if state.current >= LockKind::Reserved {
            unlock_range(file, host, RESERVED_BYTE, 1)?;
        }
        state.current = LockKind::Shared;
        return Ok(true);
    }
    if state.current >= LockKind::Reserved {
        unlock_range(file, host, RESERVED_BYTE, 1)?;
        state.current = LockKind::Shared;
    }
    if to == LockKind::None {
        release_shared(file, state, host)?;
        state.current = LockKind::None;
    }
    Ok(true)
}

/// Probe whether some other connection holds (or is about to take) a
/// RESERVED lock, without taking one ourselves.
///
/// `os_win.c`'s `sqlite3OsCheckReservedLock` unconditionally `return 0`
/// after the probe regardless of its own result — a documented anomaly in
/// the reference source (see `DESIGN.md`). This implementation follows the
/// *documented* contract instead: probe-lock the byte, release it
/// immediately, and report whether the probe itself succeeded.
pub fn check_reserved(file: &File, state: &LockState) -> Result<bool, WinOsError> {
    if state.current >= LockKind::Reserved {
        return Ok(true);
    }
    let _guard = mutex::enter();
    let host = variant::detect();
    let got = try_lock_range(file, host, RESERVED_BYTE, 1, false)?;
    if got {
        unlock_range(file, host, RESERVED_BYTE, 1)?;
    }
    Ok(!got)
}

fn acquire_shared(
    file: &File,
    state: &mut LockState,
    host: HostVariant,
    random: &dyn RandomSource,
) -> Result<bool, WinOsError> {
    // Probe PENDING first so a reader never sneaks in while another
    // connection is mid-promotion to EXCLUSIVE (`getReadLock`). This
    // pre-lock is always exclusive, same as the PENDING_BYTE lock taken in
    // `acquire_exclusive`. The pending lock may be held momentarily by a
    // reader about to release it, so retry a few times before giving up.
    if !lock_pending_byte_with_retry(file, host)? {
        return Ok(false);
    }
    let got_reader = match host.reader_strategy() {
        ReaderLockStrategy::Whole => try_lock_range(file, host, SHARED_FIRST, SHARED_SIZE, false)?,
        ReaderLockStrategy::RandomByte => {
            let byte = pick_shared_byte(random);
            let ok = try_lock_range(file, host, SHARED_FIRST + byte, 1, true)?;
            if ok {
                state.shared_byte = Some(byte);
            }
            ok
        }
    };
    unlock_range(file, host, PENDING_BYTE, 1)?;
    if got_reader {
        state.current = LockKind::Shared;
    }
    Ok(got_reader)
}

fn release_shared(file: &File, state: &mut LockState, host: HostVariant) -> Result<(), WinOsError> {
    match (host.reader_strategy(), state.shared_byte.take()) {
        (ReaderLockStrategy::Whole, _) => unlock_range(file, host, SHARED_FIRST, SHARED_SIZE)?,
        (ReaderLockStrategy::RandomByte, Some(byte)) => {
            unlock_range(file, host, SHARED_FIRST + byte, 1)?
        }
        (ReaderLockStrategy::RandomByte, None) => {}
    }
    Ok(())
}

fn acquire_exclusive(
    file: &File,
    state: &mut LockState,
    host: HostVariant,
) -> Result<bool, WinOsError> {
    if !state.pending_held {
        if !lock_pending_byte_with_retry(file, host)? {
            return Ok(false);
        }
        state.pending_held = true;
    }
    // Release our own reader lock before attempting the full-pool exclusive
    // lock; other readers' locks are what we're waiting out. If the
    // exclusive attempt below fails, this connection is left holding
    // neither a reader lock nor EXCLUSIVE, even though `state.current` may
    // still read `Reserved` — a known gap inherited from the reference
    // protocol, not patched here (see `DESIGN.md`).
    release_shared(file, state, host)?;

    // Single attempt, no backoff: a failure here means some other
    // connection still holds a reader lock, and the caller gets BUSY back
    // immediately to decide whether to retry.
    let got = try_lock_range(file, host, SHARED_FIRST, SHARED_SIZE, true)?;
    if got {
        state.current = LockKind::Exclusive;
    }
    Ok(got)
}

/// Try to take the exclusive PENDING_BYTE pre-lock, retrying a few times
/// with a short sleep: the byte might be held by another reader that is
/// about to release it (`getReadLock`'s retry loop in the reference).
fn lock_pending_byte_with_retry(file: &File, host: HostVariant) -> Result<bool, WinOsError> {
    for attempt in 0..PENDING_RETRIES {
        if try_lock_range(file, host, PENDING_BYTE, 1, true)? {
            return Ok(true);
        }
        if attempt + 1 < PENDING_RETRIES {
            std::thread::sleep(Duration::from_millis(PENDING_RETRY_DELAY_MS as u64));
        }
    }
    Ok(false)
}

fn pick_shared_byte(random: &dyn RandomSource) -> u32 {
    let mut buf = [0u8; 4];
    random.fill(&mut buf);
    u32::from_le_bytes(buf) % SHARED_SIZE
}

#[cfg(windows)]
fn try_lock_range(
    file: &File,
    host: HostVariant,
    offset: u32,
    len: u32,
    exclusive: bool,
) -> Result<bool, WinOsError> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::{ERROR_IO_PENDING, ERROR_LOCK_VIOLATION};
    use windows_sys::Win32::Storage::FileSystem::{
        LockFile, LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    let handle = file.as_raw_handle() as isize;

    match host {
        HostVariant::Modern => {
            let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
            overlapped.Anonymous.Anonymous.Offset = offset;
            overlapped.Anonymous.Anonymous.OffsetHigh = 0;
            let flags = LOCKFILE_FAIL_IMMEDIATELY
                | if exclusive { LOCKFILE_EXCLUSIVE_LOCK } else { 0 };
            // SAFETY: `handle` is a valid, open file handle for the
            // lifetime of this call; `overlapped` lives on the stack for
            // the duration of the (synchronous, LOCKFILE_FAIL_IMMEDIATELY)
            // call.
            let ok = unsafe { LockFileEx(handle, flags, 0, len, 0, &mut overlapped) };
            if ok != 0 {
                Ok(true)
            } else {
                let err = std::io::Error::last_os_error();
                match err.raw_os_error().map(|e| e as u32) {
                    Some(code) if code == ERROR_LOCK_VIOLATION || code == ERROR_IO_PENDING => {
                        Ok(false)
                    }
                    _ => Err(WinOsError::Win32 {
                        call: "LockFileEx",
                        source: err,
                    }),
                }
            }
        }
        HostVariant::Legacy => {
            // SAFETY: `handle` is a valid, open file handle.
            let ok = unsafe { LockFile(handle, offset, 0, len, 0) };
            if ok != 0 {
                Ok(true)
            } else {
                let err = std::io::Error::last_os_error();
                match err.raw_os_error().map(|e| e as u32) {
                    Some(code) if code == ERROR_LOCK_VIOLATION => Ok(false),
                    _ => Err(WinOsError::Win32 {
                        call: "LockFile",
                        source: err,
                    }),
                }
            }
        }
    }
}

#[cfg(windows)]
fn unlock_range(file: &File, host: HostVariant, offset: u32, len: u32) -> Result<(), WinOsError> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Storage::FileSystem::{UnlockFile, UnlockFileEx};
    use windows_sys::Win32::System::IO::OVERLAPPED;

    let handle = file.as_raw_handle() as isize;

    let ok = match host {
        HostVariant::Modern => {
            let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
            overlapped.Anonymous.Anonymous.Offset = offset;
            overlapped.Anonymous.Anonymous.OffsetHigh = 0;
            // SAFETY: see `try_lock_range`.
            unsafe { UnlockFileEx(handle, 0, len, 0, &mut overlapped) }
        }
        // SAFETY: see `try_lock_range`.
        HostVariant::Legacy => unsafe { UnlockFile(handle, offset, 0, len, 0) },
    };
    if ok != 0 {
        Ok(())
    } else {
        let err = std::io::Error::last_os_error();
        // An unlock of a region we never held (e.g. redundant release on an
        // already-degraded state) is not an error worth surfacing.
        if err.raw_os_error() == Some(158 /* ERROR_NOT_LOCKED */) {
            return Ok(());
        }
        Err(WinOsError::Win32 {
            call: "UnlockFileEx",
            source: err,
        })
    }
}

#[cfg(not(windows))]
fn try_lock_range(
    _file: &File,
    _host: HostVariant,
    _offset: u32,
    _len: u32,
    _exclusive: bool,
) -> Result<bool, WinOsError> {
    // Non-Windows builds exist only so this crate's tests and tooling can
    // run in CI; the byte-range semantics this module exists for are
    // Windows-only, so we fall back to always-granted, in-process-only
    // locking, sufficient for the single-process tests in `tests/`.
    Ok(true)
}

#[cfg(not(windows))]
fn unlock_range(_file: &File, _host: HostVariant, _offset: u32, _len: u32) -> Result<(), WinOsError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::FixedSource;

    fn scratch_file() -> (tempfile::TempDir, File) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        (dir, file)
    }

    #[test]
    fn lock_ladder_is_monotonic_noop_below_current() {
        let (_dir, file) = scratch_file();
        let mut state = LockState::new();
        let random = FixedSource(1);
        assert!(lock(&file, &mut state, LockKind::Shared, &random).unwrap());
        assert!(lock(&file, &mut state, LockKind::None, &random).unwrap());
        assert_eq!(state.current, LockKind::Shared);
    }

    #[test]
    fn full_promotion_and_release_round_trip() {
        let (_dir, file) = scratch_file();
        let mut state = LockState::new();
        let random = FixedSource(3);
        assert!(lock(&file, &mut state, LockKind::Shared, &random).unwrap());
        assert!(lock(&file, &mut state, LockKind::Reserved, &random).unwrap());
        assert!(lock(&file, &mut state, LockKind::Exclusive, &random).unwrap());
        assert_eq!(state.current, LockKind::Exclusive);
        assert!(unlock(&file, &mut state, LockKind::None).unwrap());
        assert_eq!(state.current, LockKind::None);
    }

    #[test]
    fn check_reserved_true_when_none_held() {
        let (_dir, file) = scratch_file();
        let state = LockState::new();
        assert!(!check_reserved(&file, &state).unwrap());
    }
}
