use std::sync::Arc;

use sqlite_winvfs::{random::OsRandomSource, WindowsVfs};

/// Registers the Windows VFS as the process default. Mostly useful as a
/// smoke test and a worked example of [`sqlite_vfs::register`]; real
/// consumers link against the library crate directly.
#[tokio::main]
async fn main() {
    env_logger::init();

    let vfs = WindowsVfs::new(Arc::new(OsRandomSource));
    if let Err(err) = sqlite_vfs::register("winvfs", vfs, true) {
        log::error!("failed to register winvfs: {err}");
        std::process::exit(1);
    }
    log::info!("winvfs registered as the default sqlite3_vfs");
}
