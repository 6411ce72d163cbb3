//! Julian Day clock (spec C6), grounding: `os_win.c`'s
//! `sqlite3OsCurrentTime`/`sqlite3OsCurrentTimeInt64`.
//!
//! Windows' native time base is 100-ns ticks since 1601-01-01
//! (`FILETIME`/`GetSystemTimeAsFileTime`). SQLite's pager wants a Julian Day
//! number, so the conversion constant `2305813.5` below is the Julian Day
//! of the FILETIME epoch itself.

use std::sync::atomic::{AtomicI64, Ordering};

const TICKS_PER_DAY: f64 = 864e9;
const FILETIME_EPOCH_AS_JULIAN_DAY: f64 = 2305813.5;

/// When set, `current_julian_day` reports this value (as 100-ns ticks since
/// 1601-01-01) instead of querying the host clock. Lets tests pin time
/// without touching the system clock.
static OVERRIDE_TICKS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Install a fixed clock reading, in Unix seconds, for the remainder of the
/// process. Intended for tests only.
pub fn set_test_override_unix_seconds(unix_seconds: f64) {
    let ticks = (unix_seconds * 1e7) as i64 + UNIX_EPOCH_TICKS;
    OVERRIDE_TICKS.store(ticks, Ordering::Release);
}

/// Clear a previously installed test override, returning to the host clock.
pub fn clear_test_override() {
    OVERRIDE_TICKS.store(i64::MIN, Ordering::Release);
}

// 100-ns ticks between the FILETIME epoch (1601-01-01) and the Unix epoch
// (1970-01-01).
const UNIX_EPOCH_TICKS: i64 = 116_444_736_000_000_000;

fn raw_ticks() -> i64 {
    let overridden = OVERRIDE_TICKS.load(Ordering::Acquire);
    if overridden != i64::MIN {
        return overridden;
    }
    host_ticks()
}

#[cfg(windows)]
fn host_ticks() -> i64 {
    use windows_sys::Win32::Foundation::FILETIME;
    use windows_sys::Win32::System::SystemInformation::GetSystemTimeAsFileTime;

    // SAFETY: `ft` is an out-param fully written by the call.
    unsafe {
        let mut ft: FILETIME = std::mem::zeroed();
        GetSystemTimeAsFileTime(&mut ft);
        ((ft.dwHighDateTime as i64) << 32) | ft.dwLowDateTime as i64
    }
}

#[cfg(not(windows))]
fn host_ticks() -> i64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    now.as_nanos() as i64 / 100 + UNIX_EPOCH_TICKS
}

/// Current time as a Julian Day number, the unit `sqlite3_vfs::xCurrentTime`
/// hands back to the pager.
pub fn current_julian_day() -> f64 {
    raw_ticks() as f64 / TICKS_PER_DAY + FILETIME_EPOCH_AS_JULIAN_DAY
}

/// Current time in milliseconds since the Julian epoch, the unit
/// `xCurrentTimeInt64` hands back. Matches `sqlite3OsCurrentTimeInt64`'s
/// integer arithmetic rather than recomputing from the float above, to
/// avoid reintroducing the precision loss that function exists to avoid.
pub fn current_julian_day_millis() -> i64 {
    const UNIX_EPOCH_AS_JULIAN_MS: i64 = 210_866_760_000_000; // 2440587.5 days in ms
    let ticks = raw_ticks() - UNIX_EPOCH_TICKS;
    ticks / 10_000 + UNIX_EPOCH_AS_JULIAN_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_pins_known_epoch() {
        set_test_override_unix_seconds(0.0);
        let jd = current_julian_day();
        assert!((jd - 2440587.5).abs() < 1e-6, "got {jd}");
        clear_test_override();
    }

    #[test]
    fn millis_matches_float_within_a_day() {
        set_test_override_unix_seconds(1_700_000_000.0);
        let jd = current_julian_day();
        let ms = current_julian_day_millis();
        assert!((jd * 86_400_000.0 - ms as f64).abs() < 5.0);
        clear_test_override();
    }
}
