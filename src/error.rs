use snafu::Snafu;

/// Windows-specific failures surfaced by [`crate::file::WindowsFile`] and
/// [`crate::vfs::WindowsVfs`]. This is the `External` type parameter of
/// `sqlite_vfs::error::Error<External>`; lock contention is deliberately not
/// represented here (see the module doc on [`crate::lock`]) — it is reported
/// as `Ok(false)`, not an `Err`.
#[derive(Debug, Snafu)]
pub enum WinOsError {
    #[snafu(display("could not open {path}: {source}"))]
    CantOpen {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("i/o error on {path}: {source}"))]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("short read on {path}: got {got} of {wanted} bytes"))]
    ShortRead {
        path: String,
        got: usize,
        wanted: usize,
    },

    #[snafu(display("write could not drain buffer for {path}"))]
    Full { path: String },

    #[snafu(display("win32 call {call} failed: {source}"))]
    Win32 {
        call: &'static str,
        source: std::io::Error,
    },
}
