//! StorageConfig and resolution of the cache file locations.

use crate::config::xdg;
use crate::error::ApiError;
use crate::store::BackendKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_local_cache() -> PathBuf {
    PathBuf::from("local_simcache.json")
}

fn default_remote_cache() -> PathBuf {
    PathBuf::from("remote_simcache.json")
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of the cache files, `$XDG_DATA_HOME/simloc` when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Cache of this host's simulations (relative to `data_dir`)
    #[serde(default = "default_local_cache")]
    pub local_cache: PathBuf,

    /// Cache of simulations found on remote hosts (relative to `data_dir`)
    #[serde(default = "default_remote_cache")]
    pub remote_cache: PathBuf,

    #[serde(default)]
    pub backend: BackendKind,
}

impl StorageConfig {
    /// Resolve the (local, remote) cache locations.
    ///
    /// The sled backend keeps a directory per cache, named like the JSON file
    /// with a `.sled` extension.
    pub fn resolve_paths(&self) -> Result<(PathBuf, PathBuf), ApiError> {
        let data_dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => xdg::simloc_data_dir()?,
        };
        let resolve = |file: &PathBuf| {
            let path = data_dir.join(file);
            match self.backend {
                BackendKind::Json => path,
                BackendKind::Sled => path.with_extension("sled"),
            }
        };
        Ok((resolve(&self.local_cache), resolve(&self.remote_cache)))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            local_cache: default_local_cache(),
            remote_cache: default_remote_cache(),
            backend: BackendKind::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_paths() {
        let mut storage = StorageConfig {
            data_dir: Some(PathBuf::from("/var/simloc")),
            ..StorageConfig::default()
        };
        let (local, remote) = storage.resolve_paths().unwrap();
        assert_eq!(local, PathBuf::from("/var/simloc/local_simcache.json"));
        assert_eq!(remote, PathBuf::from("/var/simloc/remote_simcache.json"));

        storage.backend = BackendKind::Sled;
        storage.remote_cache = PathBuf::from("/abs/remote.json");
        let (local, remote) = storage.resolve_paths().unwrap();
        assert_eq!(local, PathBuf::from("/var/simloc/local_simcache.sled"));
        assert_eq!(remote, PathBuf::from("/abs/remote.sled"));
    }
}
