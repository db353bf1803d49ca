//! Configuration storage.

mod config;

pub use config::Config;

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/manifestos[-dev]/` based on MANIFESTOS_ENV.
///
/// Set MANIFESTOS_ENV=dev to use the development data directory.
///
/// # Errors
/// Returns an error if the home directory cannot be determined or if
/// creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .ok_or_else(|| ConfigError::DataDir("home directory not found".into()))?
        .join(".config");

    let env = std::env::var("MANIFESTOS_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("manifestos-dev")
    } else {
        base_dir.join("manifestos")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
