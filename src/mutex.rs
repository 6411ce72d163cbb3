//! Process-wide mutex (spec C5), grounding: `os_win.c`'s
//! `sqlite3OsEnterMutex`/`sqlite3OsLeaveMutex`, which serialize the
//! lock-state bookkeeping done outside the byte-range lock itself (e.g. the
//! pending-lock retry loop) across all threads in the process. Held for the
//! duration of `crate::lock::{lock,unlock,check_reserved}`.
//!
//! The C original hand-rolls its one-time init with `InterlockedIncrement`
//! and a spin-sleep; `OnceLock` gives the same guarantee directly.

use std::sync::{Mutex, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};

static PROCESS_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
static HELD: AtomicBool = AtomicBool::new(false);

fn mutex() -> &'static Mutex<()> {
    PROCESS_MUTEX.get_or_init(|| Mutex::new(()))
}

/// RAII guard for the process mutex. Dropping it releases the mutex, mirroring
/// `sqlite3OsLeaveMutex`'s pairing with `sqlite3OsEnterMutex`.
pub struct ProcessMutexGuard {
    _inner: std::sync::MutexGuard<'static, ()>,
}

impl Drop for ProcessMutexGuard {
    fn drop(&mut self) {
        HELD.store(false, Ordering::Release);
    }
}

/// Acquire the process-wide mutex used to serialize lock-state transitions.
///
/// Not reentrant: the original C mutex is a CRITICAL_SECTION that *is*
/// reentrant per-thread, but nothing in this protocol ever calls
/// `enter_mutex` while already holding it, so reentrance here indicates a
/// bug rather than legitimate nesting. Debug builds assert on it.
pub fn enter() -> ProcessMutexGuard {
    let guard = mutex().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    debug_assert!(
        !HELD.swap(true, Ordering::AcqRel),
        "process mutex re-entered on the same thread"
    );
    ProcessMutexGuard { _inner: guard }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        {
            let _g = enter();
            assert!(HELD.load(Ordering::Acquire));
        }
        assert!(!HELD.load(Ordering::Acquire));
    }

    #[test]
    fn sequential_acquisition_does_not_deadlock() {
        enter();
        enter();
    }
}
