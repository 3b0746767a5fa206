use std::path::{Path, PathBuf};

/// Get the base storage directory following XDG Base Directory Specification.
/// Returns `$XDG_DATA_HOME/stashcam`, else the platform data dir, else `./stashcam`.
pub fn get_storage_dir() -> PathBuf {
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg_data).join("stashcam");
    }

    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stashcam")
}

/// Get the logs directory path.
/// Returns `{storage_dir}/logs`.
pub fn get_log_dir() -> PathBuf {
    get_storage_dir().join("logs")
}

/// Default location of committed segments.
/// Returns `{storage_dir}/recordings`.
pub fn get_recordings_dir() -> PathBuf {
    get_storage_dir().join("recordings")
}

/// Directory holding targets that are still being written.
pub fn staging_dir(recordings_dir: &Path) -> PathBuf {
    recordings_dir.join(".staging")
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
