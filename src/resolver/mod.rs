//! Resolver
//!
//! Tiered lookup of simulations: local cache, remote cache, optional
//! existence validation, then a concurrent fan-out over every known host.
//! Fan-out answers are written back into the remote cache, so a global
//! search for the same simulation is not repeated.

mod fanout;

pub use fanout::FanoutOutcome;

use crate::error::CacheError;
use crate::remote::{HostDirectory, HostProbe};
use crate::store::{FingerprintStore, SearchQuery, SimulationRecord};
use crate::types::LOCALHOST;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

fn default_search_timeout_secs() -> u64 {
    10
}

fn default_validate_timeout_secs() -> u64 {
    5
}

fn default_fanout_max_concurrency() -> usize {
    32
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Deadline of a whole fan-out, in seconds
    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,

    /// Deadline of a single existence probe, in seconds
    #[serde(default = "default_validate_timeout_secs")]
    pub validate_timeout_secs: u64,

    /// Upper bound of concurrently probed hosts
    #[serde(default = "default_fanout_max_concurrency")]
    pub fanout_max_concurrency: usize,
}

impl SearchConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn validate_timeout(&self) -> Duration {
        Duration::from_secs(self.validate_timeout_secs)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            search_timeout_secs: default_search_timeout_secs(),
            validate_timeout_secs: default_validate_timeout_secs(),
            fanout_max_concurrency: default_fanout_max_concurrency(),
        }
    }
}

/// How far a resolution may escalate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Consult the remote cache and, on a miss, the remote hosts
    pub search_remote: bool,
    /// Query every host even when the caches have an answer
    pub force_global: bool,
    /// Drop and evict candidates that no longer exist
    pub validate_existence: bool,
    /// Ask probed hosts to rebuild their cache before answering
    pub refresh_remote: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            search_remote: true,
            force_global: false,
            validate_existence: false,
            refresh_remote: false,
        }
    }
}

impl ResolveOptions {
    pub fn local_only() -> Self {
        Self {
            search_remote: false,
            ..Self::default()
        }
    }
}

/// Resolver statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Resolutions served
    pub resolutions: usize,
    /// Fan-outs started
    pub fanouts: usize,
    /// Host probes issued, search and existence
    pub probes: usize,
    /// Probes that failed or timed out
    pub probe_failures: usize,
    /// Records written back into the remote cache
    pub write_backs: usize,
    /// Records evicted after failing validation
    pub evictions: usize,
}

/// Multi-tier simulation lookup.
pub struct Resolver {
    local: Arc<RwLock<FingerprintStore>>,
    remote: Arc<RwLock<FingerprintStore>>,
    hosts: Arc<dyn HostDirectory>,
    probe: Arc<dyn HostProbe>,
    config: SearchConfig,
    stats: Arc<RwLock<ResolverStats>>,
}

impl Resolver {
    pub fn new(
        local: Arc<RwLock<FingerprintStore>>,
        remote: Arc<RwLock<FingerprintStore>>,
        hosts: Arc<dyn HostDirectory>,
        probe: Arc<dyn HostProbe>,
        config: SearchConfig,
    ) -> Self {
        Self {
            local,
            remote,
            hosts,
            probe,
            config,
            stats: Arc::new(RwLock::new(ResolverStats::default())),
        }
    }

    pub fn local_store(&self) -> &Arc<RwLock<FingerprintStore>> {
        &self.local
    }

    pub fn remote_store(&self) -> &Arc<RwLock<FingerprintStore>> {
        &self.remote
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats.read().clone()
    }

    /// Resolve `query` to simulation records.
    ///
    /// Fails with `NoSimulationFound` when nothing is left at the end and,
    /// for unique queries, with `ResultNotUnique` on more than one record.
    pub async fn resolve(
        &self,
        query: &SearchQuery,
        options: ResolveOptions,
    ) -> Result<Vec<SimulationRecord>, CacheError> {
        self.stats.write().resolutions += 1;

        let mut hits = self.search_local(query)?;
        let satisfied = |hits: &[SimulationRecord]| {
            !query.unique && !hits.is_empty() && !options.force_global
        };

        if options.search_remote && !satisfied(&hits) {
            let cached = self.remote.read().search_lenient(query)?;
            merge_by_identity(&mut hits, cached);
        }
        debug!(count = hits.len(), patterns = ?query.patterns, "Cache lookup finished");

        if options.validate_existence {
            hits = self.validate(hits).await?;
        }

        if options.search_remote && (hits.is_empty() || options.force_global) {
            let outcome = self.fan_out(query, options.refresh_remote).await;
            if outcome.records.is_empty() {
                debug!("Fan-out found nothing, falling back to the local cache");
                hits = self.search_local(query)?;
            } else {
                self.write_back(&outcome.records);
                hits = outcome.records;
            }
        }

        query.finish(hits)
    }

    fn search_local(&self, query: &SearchQuery) -> Result<Vec<SimulationRecord>, CacheError> {
        let mut hits = self.local.read().search_lenient(query)?;
        for hit in &mut hits {
            hit.host = LOCALHOST.to_string();
        }
        Ok(hits)
    }

    /// Keep the candidates that still exist, evict the others.
    async fn validate(
        &self,
        candidates: Vec<SimulationRecord>,
    ) -> Result<Vec<SimulationRecord>, CacheError> {
        let timeout = self.config.validate_timeout();
        let pool = self.pool_size(candidates.len());

        let checked: Vec<(SimulationRecord, bool)> = stream::iter(candidates)
            .map(|record| {
                let probe = Arc::clone(&self.probe);
                let stats = Arc::clone(&self.stats);
                async move {
                    if record.is_local() {
                        let exists = record.path.exists();
                        return (record, exists);
                    }
                    stats.write().probes += 1;
                    let exists =
                        match tokio::time::timeout(timeout, probe.exists(&record.host, &record.path))
                            .await
                        {
                            Ok(Ok(exists)) => exists,
                            Ok(Err(e)) => {
                                warn!(host = %record.host, uuid = %record.uuid, error = %e, "Existence probe failed");
                                stats.write().probe_failures += 1;
                                false
                            }
                            Err(_) => {
                                warn!(host = %record.host, uuid = %record.uuid, timeout_secs = timeout.as_secs(), "Existence probe timed out");
                                stats.write().probe_failures += 1;
                                false
                            }
                        };
                    (record, exists)
                }
            })
            .buffered(pool)
            .collect()
            .await;

        let mut kept = Vec::with_capacity(checked.len());
        for (record, exists) in checked {
            if exists {
                kept.push(record);
                continue;
            }
            let store = if record.is_local() { &self.local } else { &self.remote };
            store.write().remove(&record.uuid)?;
            self.stats.write().evictions += 1;
            info!(host = %record.host, uuid = %record.uuid, path = %record.path.display(), "Evicted vanished simulation");
        }
        Ok(kept)
    }

    fn write_back(&self, records: &[SimulationRecord]) {
        let mut remote = self.remote.write();
        for record in records {
            match remote.insert(&record.uuid, record.clone()) {
                Ok(()) => self.stats.write().write_backs += 1,
                Err(e) => {
                    warn!(host = %record.host, uuid = %record.uuid, error = %e, "Could not cache remote simulation");
                }
            }
        }
    }

    fn pool_size(&self, tasks: usize) -> usize {
        tasks.min(self.config.fanout_max_concurrency).max(1)
    }
}

/// Append `extra` to `hits`, skipping identities already present.
fn merge_by_identity(hits: &mut Vec<SimulationRecord>, extra: Vec<SimulationRecord>) {
    let mut seen: HashSet<String> = hits.iter().map(|r| r.uuid.clone()).collect();
    for record in extra {
        if seen.insert(record.uuid.clone()) {
            hits.push(record);
        }
    }
}
