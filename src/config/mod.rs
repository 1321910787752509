//! Configuration
//!
//! Layered with the `config` crate: defaults, the global file, an explicit
//! `--config` file, then `SIMLOC__*` environment variables.

mod facade;
mod storage;

mod merge {
    pub mod merge_policy;
    pub mod service;
}

mod paths {
    pub mod xdg_root;
}

mod sources {
    pub mod environment;
    pub mod global_file;
}

pub use facade::ConfigLoader;
pub use paths::xdg_root as xdg;
pub use storage::StorageConfig;

use crate::error::ApiError;
use crate::logging::LoggingConfig;
use crate::mount::MountConfig;
use crate::remote::SshConfig;
use crate::resolver::SearchConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete simloc configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimlocConfig {
    /// Directories scanned for local simulations
    #[serde(default)]
    pub root_dirs: Vec<PathBuf>,

    /// Remote hosts, probed in this order
    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub mount: MountConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimlocConfig {
    pub fn validate(&self) -> Result<(), ApiError> {
        let invalid = |message: String| Err(ApiError::ConfigError(message));

        for host in &self.hosts {
            if host.is_empty() || host.chars().any(char::is_whitespace) {
                return invalid(format!("Invalid host name: '{}'", host));
            }
        }
        if self.search.search_timeout_secs == 0 || self.search.validate_timeout_secs == 0 {
            return invalid("Search timeouts must be greater than zero".to_string());
        }
        if self.search.fanout_max_concurrency == 0 {
            return invalid("search.fanout_max_concurrency must be greater than zero".to_string());
        }
        if self.mount.poll_interval_secs == 0 {
            return invalid("mount.poll_interval_secs must be greater than zero".to_string());
        }
        if self.mount.poll_interval_secs > self.mount.grace_period_secs {
            return invalid(format!(
                "mount.poll_interval_secs ({}) exceeds mount.grace_period_secs ({})",
                self.mount.poll_interval_secs, self.mount.grace_period_secs
            ));
        }
        Ok(())
    }

    /// Render as TOML, for `config show`.
    pub fn to_toml(&self) -> Result<String, ApiError> {
        toml::to_string_pretty(self)
            .map_err(|e| ApiError::ConfigError(format!("Failed to render configuration: {}", e)))
    }
}
