//! Remote hosts: the host directory and the probe transport used to query them.

pub mod ssh;

pub use ssh::{shell_quote, shell_split, SshConfig, SshProbe};

use crate::error::ProbeError;
use crate::store::SimulationRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What a probe asks of a remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeAction {
    /// Search the host's local cache
    Search,
    /// Check that a path exists on the host
    Verify,
}

/// Request of the fan-out protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub action: ProbeAction,
    pub patterns: Vec<String>,
    /// Ask the host to rebuild its cache before answering
    #[serde(default)]
    pub update: bool,
    #[serde(default)]
    pub exclusive: bool,
}

impl ProbeRequest {
    pub fn search(patterns: Vec<String>, exclusive: bool) -> Self {
        Self {
            action: ProbeAction::Search,
            patterns,
            update: false,
            exclusive,
        }
    }

    pub fn verify(path: &Path) -> Self {
        Self {
            action: ProbeAction::Verify,
            patterns: vec![path.to_string_lossy().into_owned()],
            update: false,
            exclusive: false,
        }
    }

    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }
}

/// Ordered list of known remote hosts.
pub trait HostDirectory: Send + Sync {
    fn hosts(&self) -> Vec<String>;
}

/// Host directory backed by a fixed list, usually the configured one.
#[derive(Debug, Clone, Default)]
pub struct StaticHosts {
    hosts: Vec<String>,
}

impl StaticHosts {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }
}

impl HostDirectory for StaticHosts {
    fn hosts(&self) -> Vec<String> {
        self.hosts.clone()
    }
}

/// Transport reaching a single remote host.
///
/// Implementations need not bound their own run time; callers wrap every
/// call in a timeout and drop the future on expiry.
#[async_trait]
pub trait HostProbe: Send + Sync {
    /// Run a `Search` request and return the host's matching records.
    async fn search(
        &self,
        host: &str,
        request: &ProbeRequest,
    ) -> Result<Vec<SimulationRecord>, ProbeError>;

    /// Whether `path` exists on `host`.
    async fn exists(&self, host: &str, path: &Path) -> Result<bool, ProbeError>;
}
