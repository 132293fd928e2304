//! Configuration module
//!
//! Session tunables, saved line profiles and where they live on disk

mod settings;

pub use settings::{Profile, SessionConfig};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "serline", "serline").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "serline", "serline").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Path of the named profile in the config directory
pub fn profile_path(name: &str) -> Option<PathBuf> {
    config_dir().map(|d| d.join("profiles").join(format!("{name}.toml")))
}

/// Get the log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}
