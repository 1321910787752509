//! Lowest layer of every configuration: the built-in defaults.

use crate::config::SimlocConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let defaults = Config::try_from(&SimlocConfig::default())?;
    Ok(Config::builder().add_source(defaults))
}
