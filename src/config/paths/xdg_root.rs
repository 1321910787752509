//! XDG Base Directory locations of simloc's files.

use crate::error::ApiError;
use std::path::PathBuf;

/// `$XDG_DATA_HOME`, falling back to `$HOME/.local/share`.
pub fn data_home() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("share"))
}

/// `$XDG_CONFIG_HOME`, falling back to `$HOME/.config`.
pub fn config_home() -> Result<PathBuf, ApiError> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var_os("HOME").ok_or_else(|| {
        ApiError::ConfigError(
            "Could not determine XDG config home directory (HOME not set)".to_string(),
        )
    })?;
    Ok(PathBuf::from(home).join(".config"))
}

/// Default directory of the cache files: `$XDG_DATA_HOME/simloc`.
pub fn simloc_data_dir() -> Result<PathBuf, ApiError> {
    data_home().map(|d| d.join("simloc")).ok_or_else(|| {
        ApiError::ConfigError("Could not determine XDG data home directory (HOME not set)".to_string())
    })
}

/// Global configuration file: `$XDG_CONFIG_HOME/simloc/config.toml`.
pub fn global_config_path() -> Result<PathBuf, ApiError> {
    Ok(config_home()?.join("simloc").join("config.toml"))
}
