//! ConfigLoader facade delegating to merge service.

use super::merge::service::MergeService;
use super::SimlocConfig;
use crate::error::ApiError;
use std::path::{Path, PathBuf};

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Path of the global configuration file.
    pub fn global_config_path() -> Option<PathBuf> {
        super::xdg::global_config_path().ok()
    }

    /// Load configuration from files and environment, then validate it.
    pub fn load(explicit: Option<&Path>) -> Result<SimlocConfig, ApiError> {
        let config = MergeService::load(explicit)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<SimlocConfig, ApiError> {
        let config = MergeService::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Create default configuration.
    pub fn default() -> SimlocConfig {
        SimlocConfig::default()
    }
}
