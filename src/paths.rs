//! Path and temp-name services (spec C4), grounding: `os_win.c`'s
//! `sqlite3OsFullPathname`/`sqlite3OsTempFileName`.
//!
//! `full_pathname` deliberately does not use `std::fs::canonicalize`: that
//! produces `\\?\`-prefixed paths, which SQLite's own path handling (and
//! many Windows APIs outside the `\\?\`-aware set) doesn't expect. The host
//! API that SQLite's own C code calls, `GetFullPathNameW`, is used instead.

use std::path::{Path, PathBuf};

use crate::constants::{TEMP_FILE_PREFIX, TEMP_NAME_ALPHABET, TEMP_NAME_RANDOM_CHARS};
use crate::error::WinOsError;
use crate::random::RandomSource;

/// Resolve `path` to an absolute path the way `GetFullPathNameW` would,
/// without the `\\?\` long-path prefix `std::fs::canonicalize` adds.
pub fn full_pathname(path: &Path) -> Result<PathBuf, WinOsError> {
    imp::full_pathname(path)
}

/// Generate a temp file path: the host temp directory, joined with
/// `TEMP_FILE_PREFIX` followed by `TEMP_NAME_RANDOM_CHARS` random
/// alphanumeric characters, matching `os_win.c`'s `etilqs_` naming.
///
/// Regenerates the random suffix and retries if the candidate path already
/// exists, mirroring the reference's `for(;;) { ...; if (!exists) break; }`.
pub fn temp_file_name(random: &dyn RandomSource) -> Result<PathBuf, WinOsError> {
    let dir = imp::temp_dir()?;
    loop {
        let mut name = String::with_capacity(TEMP_FILE_PREFIX.len() + TEMP_NAME_RANDOM_CHARS);
        name.push_str(TEMP_FILE_PREFIX);
        let mut raw = vec![0u8; TEMP_NAME_RANDOM_CHARS];
        random.fill(&mut raw);
        for byte in raw {
            name.push(TEMP_NAME_ALPHABET[(byte as usize) % TEMP_NAME_ALPHABET.len()] as char);
        }
        let candidate = dir.join(name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use std::os::windows::ffi::{OsStrExt, OsStringExt};

    pub fn full_pathname(path: &Path) -> Result<PathBuf, WinOsError> {
        use windows_sys::Win32::Storage::FileSystem::GetFullPathNameW;

        let mut wide: Vec<u16> = path.as_os_str().encode_wide().collect();
        wide.push(0);

        // First call with an empty buffer to learn the required length.
        // SAFETY: a null buffer with length 0 is the documented way to
        // query the size; `wide` is NUL-terminated above.
        let needed = unsafe { GetFullPathNameW(wide.as_ptr(), 0, std::ptr::null_mut(), std::ptr::null_mut()) };
        if needed == 0 {
            return Err(WinOsError::Win32 {
                call: "GetFullPathNameW",
                source: std::io::Error::last_os_error(),
            });
        }
        let mut buf = vec![0u16; needed as usize];
        // SAFETY: `buf` is sized exactly to `needed`, as the first call
        // reported.
        let written = unsafe {
            GetFullPathNameW(wide.as_ptr(), needed, buf.as_mut_ptr(), std::ptr::null_mut())
        };
        if written == 0 || written as usize >= buf.len() {
            return Err(WinOsError::Win32 {
                call: "GetFullPathNameW",
                source: std::io::Error::last_os_error(),
            });
        }
        buf.truncate(written as usize);
        Ok(PathBuf::from(std::ffi::OsString::from_wide(&buf)))
    }

    pub fn temp_dir() -> Result<PathBuf, WinOsError> {
        use windows_sys::Win32::Storage::FileSystem::GetTempPathW;

        let needed = unsafe { GetTempPathW(0, std::ptr::null_mut()) };
        if needed == 0 {
            return Err(WinOsError::Win32 {
                call: "GetTempPathW",
                source: std::io::Error::last_os_error(),
            });
        }
        let mut buf = vec![0u16; needed as usize];
        // SAFETY: `buf` is sized per the length `GetTempPathW` itself
        // reported on the length-query call above.
        let written = unsafe { GetTempPathW(needed, buf.as_mut_ptr()) };
        if written == 0 {
            return Err(WinOsError::Win32 {
                call: "GetTempPathW",
                source: std::io::Error::last_os_error(),
            });
        }
        buf.truncate(written as usize);
        Ok(PathBuf::from(std::ffi::OsString::from_wide(&buf)))
    }
}

#[cfg(not(windows))]
mod imp {
    use super::*;

    pub fn full_pathname(path: &Path) -> Result<PathBuf, WinOsError> {
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            let cwd = std::env::current_dir().map_err(|source| WinOsError::Io {
                path: path.display().to_string(),
                source,
            })?;
            Ok(cwd.join(path))
        }
    }

    pub fn temp_dir() -> Result<PathBuf, WinOsError> {
        Ok(std::env::temp_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::FixedSource;

    #[test]
    fn temp_file_name_carries_prefix_and_length() {
        let name = temp_file_name(&FixedSource(5)).unwrap();
        let file_name = name.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with(TEMP_FILE_PREFIX));
        assert_eq!(
            file_name.len(),
            TEMP_FILE_PREFIX.len() + TEMP_NAME_RANDOM_CHARS
        );
    }

    #[test]
    fn full_pathname_of_relative_is_absolute() {
        let resolved = full_pathname(Path::new("some.db")).unwrap();
        assert!(resolved.is_absolute());
    }
}
