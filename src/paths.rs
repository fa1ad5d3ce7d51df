// ABOUTME: XDG Base Directory defaults for courier's data and config storage.
// ABOUTME: Environment overrides are resolved in config; these are the fallbacks.

use directories::ProjectDirs;
use std::path::PathBuf;

const QUALIFIER: &str = "dev";
const ORGANIZATION: &str = "courier";
const APPLICATION: &str = "courier";

/// XDG-compliant directories for the application.
pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// Default data directory (e.g. ~/.local/share/courier/).
/// Falls back to ./data when XDG directories are unavailable.
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Default project directory the agent runs in
/// (e.g. ~/.config/courier/project/).
pub fn default_project_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().join("project"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Session storage root inside a data directory.
pub fn sessions_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("sessions")
}

/// Runtime state (offset cursor) inside a data directory.
pub fn runtime_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("runtime")
}

/// Log directory inside a data directory.
pub fn log_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("logs")
}

/// The persisted inbound-stream offset file.
pub fn offset_file(data_dir: &std::path::Path) -> PathBuf {
    runtime_dir(data_dir).join("telegram.offset")
}

// =============================================================================
// Tests
// =============================================================================
