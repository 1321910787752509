//! Concurrent fan-out of a search over every known host.
//!
//! Every host is probed independently under one shared deadline. A host that
//! errors or misses the deadline contributes nothing, the others are not
//! affected.

use super::Resolver;
use crate::error::ProbeError;
use crate::remote::ProbeRequest;
use crate::store::{SearchQuery, SimulationRecord};
use crate::types::SearchField;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of one fan-out.
#[derive(Debug, Clone, Default)]
pub struct FanoutOutcome {
    /// Records tagged with their origin host, in host directory order
    pub records: Vec<SimulationRecord>,
    /// Hosts that answered
    pub answered: Vec<String>,
    /// Hosts that failed or timed out
    pub failed: Vec<String>,
}

impl Resolver {
    pub(super) async fn fan_out(&self, query: &SearchQuery, refresh: bool) -> FanoutOutcome {
        let hosts = self.hosts.hosts();
        if hosts.is_empty() {
            debug!("No remote hosts configured, skipping fan-out");
            return FanoutOutcome::default();
        }

        self.stats.write().fanouts += 1;
        let started = Instant::now();
        let timeout = self.config.search_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        let request = ProbeRequest::search(query.patterns.clone(), query.exclusive).with_update(refresh);
        let pool = self.pool_size(hosts.len());
        let host_count = hosts.len();

        let mut answers: Vec<(usize, String, Result<Vec<SimulationRecord>, ProbeError>)> =
            stream::iter(hosts.into_iter().enumerate())
                .map(|(position, host)| {
                    let probe = Arc::clone(&self.probe);
                    let request = request.clone();
                    async move {
                        let outcome =
                            match tokio::time::timeout_at(deadline, probe.search(&host, &request))
                                .await
                            {
                                Ok(outcome) => outcome,
                                Err(_) => Err(ProbeError::Timeout {
                                    host: host.clone(),
                                    timeout_secs: timeout.as_secs(),
                                }),
                            };
                        (position, host, outcome)
                    }
                })
                .buffer_unordered(pool)
                .collect()
                .await;
        answers.sort_by_key(|(position, _, _)| *position);

        {
            let mut stats = self.stats.write();
            stats.probes += host_count;
            stats.probe_failures += answers.iter().filter(|(_, _, r)| r.is_err()).count();
        }

        // Remote hosts match on all fields; narrow down when the query does not.
        let refilter = if query.fields.len() < SearchField::ALL.len() {
            query.compile().ok()
        } else {
            None
        };

        let mut outcome = FanoutOutcome::default();
        let mut seen = HashSet::new();
        for (_, host, result) in answers {
            match result {
                Ok(records) => {
                    debug!(host = %host, count = records.len(), "Host answered");
                    for mut record in records {
                        record.host = host.clone();
                        if let Some(compiled) = &refilter {
                            if !compiled.matches(&record) {
                                continue;
                            }
                        }
                        if seen.insert(record.uuid.clone()) {
                            outcome.records.push(record);
                        }
                    }
                    outcome.answered.push(host);
                }
                Err(e) => {
                    warn!(host = %host, error = %e, "Host probe failed, ignoring host");
                    outcome.failed.push(host);
                }
            }
        }

        info!(
            hosts = host_count,
            answered = outcome.answered.len(),
            failed = outcome.failed.len(),
            count = outcome.records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fan-out finished"
        );
        outcome
    }
}
