//! Session logger: routes `tracing` output into a single file.
//!
//! The file is **truncated at each start**, so it only ever holds the most
//! recent session.
//!
//! Default location:
//!   Windows:  `%APPDATA%\paintcore\paintcore.log`
//!   Linux:    `~/.local/share/paintcore/paintcore.log`
//!   macOS:    `~/Library/Application Support/paintcore/paintcore.log`
//!
//! Library code never calls into this module; it only emits `tracing` events.
//! Hosts that want a log file call [`init`] once at startup.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing::{error, info, warn};

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Returns the path of the active session log, if [`init`] succeeded.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Initialise the session logger at `path`.
///
/// * Creates (or truncates) the log file.
/// * Installs a global `tracing-subscriber` fmt subscriber writing to it.
/// * Installs a panic hook that mirrors the panic message to the log before
///   running the previous hook.
///
/// Calling it again after a successful init is a no-op.
pub fn init(path: &Path) -> std::io::Result<()> {
    if LOG_PATH.get().is_some() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file: File = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;

    let installed = tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .is_ok();

    if !installed {
        // Another global subscriber is already in place; keep using it.
        warn!(path = %path.display(), "global subscriber already set, log file unused");
    }

    let _ = LOG_PATH.set(path.to_path_buf());
    info!(path = %path.display(), "paintcore session started");

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        error!("PANIC: {}", panic_info);
        prev(panic_info);
    }));

    Ok(())
}

/// `<data dir>/paintcore/paintcore.log`
pub fn default_log_path() -> PathBuf {
    data_dir().join("paintcore").join("paintcore.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    // Last resort: current working directory
    PathBuf::from(".")
}
