mod config;
pub mod local_store;
pub mod migrations;

pub use config::{AlertsConfig, Config, SyncConfig};
pub use local_store::{LocalStore, Snapshot, Tombstone};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/nudge[-dev]/` based on NUDGE_ENV.
///
/// Set NUDGE_ENV=dev to use the development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("NUDGE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("nudge-dev")
    } else {
        base_dir.join("nudge")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::LoadFailed {
        path: dir.clone(),
        message: e.to_string(),
    })?;
    Ok(dir)
}
