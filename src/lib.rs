#![allow(async_fn_in_trait)]

//! A Windows OS abstraction layer for a single-file relational database
//! engine, modeled on SQLite's own `os_win.c`: byte-range file locking that
//! works across legacy (single-mode) and modern (reader/writer) Windows
//! lock APIs, plus the file I/O, path, mutex, clock and randomness services
//! the lock protocol and its callers need.
//!
//! [`vfs::WindowsVfs`] and [`file::WindowsFile`] implement the
//! [`sqlite_vfs::Vfs`]/[`sqlite_vfs::DatabaseHandle`] pair and can be
//! registered with [`sqlite_vfs::register`].

pub mod clock;
pub mod constants;
pub mod error;
pub mod file;
pub mod lock;
pub mod mutex;
pub mod paths;
pub mod random;
pub mod variant;
pub mod vfs;

pub use error::WinOsError;
pub use file::WindowsFile;
pub use vfs::WindowsVfs;
