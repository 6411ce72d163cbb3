//! Host-variant detection (spec C3).
//!
//! Distinguishes hosts that expose reader/writer byte-range locking
//! (`LockFileEx`/`UnlockFileEx`, "modern": NT-family) from hosts that only
//! expose single-mode byte-range locking (`LockFile`/`UnlockFile`, "legacy":
//! Win9x/ME). The distinction is resolved once per process and cached; no
//! lock call re-checks it.

use std::sync::OnceLock;

/// Which lock API family the host exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostVariant {
    /// Exposes `LockFileEx`/`UnlockFileEx`: true reader/writer byte-range
    /// locks over the whole SHARED pool.
    Modern,
    /// Only exposes `LockFile`/`UnlockFile`: a SHARED acquisition must pick
    /// one random byte in the pool rather than reader-locking the whole
    /// range.
    Legacy,
}

impl HostVariant {
    /// The reader-lock strategy appropriate for this host variant.
    pub fn reader_strategy(self) -> ReaderLockStrategy {
        match self {
            HostVariant::Modern => ReaderLockStrategy::Whole,
            HostVariant::Legacy => ReaderLockStrategy::RandomByte,
        }
    }
}

/// How a SHARED acquisition places its reader lock within the pool.
///
/// Kept as a strategy value rather than an inline `if host.is_modern()` at
/// every call site in [`crate::lock`] — the branch belongs here, once, not
/// scattered through the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderLockStrategy {
    /// Reader-lock (non-exclusive) the entire SHARED pool.
    Whole,
    /// Exclusively lock one randomly chosen byte within the pool.
    RandomByte,
}

static HOST_VARIANT: OnceLock<HostVariant> = OnceLock::new();

/// Resolve (and cache) the host variant for this process.
pub fn detect() -> HostVariant {
    *HOST_VARIANT.get_or_init(query_os_version)
}

#[cfg(windows)]
fn query_os_version() -> HostVariant {
    use std::mem::size_of;
    use windows_sys::Win32::System::SystemInformation::{GetVersionExW, OSVERSIONINFOW};

    // SAFETY: `info` is zero-initialized and its `dwOSVersionInfoSize` field
    // is set before the call, as `GetVersionExW` requires.
    unsafe {
        let mut info: OSVERSIONINFOW = std::mem::zeroed();
        info.dwOSVersionInfoSize = size_of::<OSVERSIONINFOW>() as u32;
        if GetVersionExW(&mut info) == 0 {
            // Query failed; assume the modern API family is present rather
            // than silently degrading every future lock to the lossy
            // random-byte scheme.
            return HostVariant::Modern;
        }
        // VER_PLATFORM_WIN32_NT == 2
        if info.dwPlatformId == 2 {
            HostVariant::Modern
        } else {
            HostVariant::Legacy
        }
    }
}

#[cfg(not(windows))]
fn query_os_version() -> HostVariant {
    HostVariant::Modern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_is_cached() {
        // Calling detect() twice must not re-query the host; this is mostly
        // documentation since OnceLock already guarantees it, but it keeps
        // the call site honest if detect() is ever changed to take a
        // parameter.
        assert_eq!(detect(), detect());
    }

    #[test]
    fn strategy_matches_variant() {
        assert_eq!(
            HostVariant::Modern.reader_strategy(),
            ReaderLockStrategy::Whole
        );
        assert_eq!(
            HostVariant::Legacy.reader_strategy(),
            ReaderLockStrategy::RandomByte
        );
    }
}
