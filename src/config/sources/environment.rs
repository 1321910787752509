//! Environment variable source: SIMLOC__* with __ separator

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

/// Keys whose environment value is a comma separated list.
const LIST_KEYS: [&str; 2] = ["hosts", "root_dirs"];

/// Add environment variable overlay to builder.
///
/// `SIMLOC__SEARCH__SEARCH_TIMEOUT_SECS=5` sets `search.search_timeout_secs`,
/// `SIMLOC__HOSTS=a,b` sets the host list.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let environment = LIST_KEYS.iter().fold(
        Environment::with_prefix("SIMLOC")
            .separator("__")
            .list_separator(",")
            .try_parsing(true),
        |env, key| env.with_list_parse_key(key),
    );
    Ok(builder.add_source(environment))
}
