//! Path utilities for the per-user data, models, and runtime directories.

use std::io;
use std::path::PathBuf;

const APP_DIR: &str = "vm-scribe";

/// Get the per-user data directory (e.g. ~/.local/share/vm-scribe), creating
/// it if necessary.
pub fn data_dir() -> io::Result<PathBuf> {
    let base = dirs::data_dir().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "no per-user data directory on this platform",
        )
    })?;
    let dir = base.join(APP_DIR);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Get the models directory, creating it if necessary.
pub fn models_dir() -> io::Result<PathBuf> {
    let dir = data_dir()?.join("models");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// The isolated Python runtime the installer provisions for the generic
/// backend. Not created here; its absence means the installer never ran.
pub fn runtime_dir() -> io::Result<PathBuf> {
    Ok(data_dir()?.join("runtime"))
}

/// Get the path to the persisted backend choice (a single-line file).
pub fn backend_config_path() -> io::Result<PathBuf> {
    Ok(data_dir()?.join("backend.conf"))
}

/// Get the log file path (e.g. ~/.local/share/vm-scribe/logs/vm-scribe.log).
pub fn log_file_path() -> io::Result<PathBuf> {
    let dir = data_dir()?.join("logs");
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join("vm-scribe.log"))
}

/// Ensure all app directories exist.
pub fn ensure_directories() -> io::Result<()> {
    data_dir()?;
    models_dir()?;
    let _ = log_file_path();
    Ok(())
}
