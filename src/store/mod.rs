//! Fingerprint Store
//!
//! Persistent cache mapping simulation identities to records, with a
//! secondary index on shortened identities. One store holds simulations of
//! this host, a second one holds what was learned about remote hosts.

pub mod index;
pub mod persistence;
pub mod record;
pub mod search;

pub use index::ShortIdIndex;
pub use persistence::{open_backend, BackendKind, JsonFileBackend, MemoryBackend, RecordMap, SledBackend, StoreBackend};
pub use record::SimulationRecord;
pub use search::{CompiledQuery, SearchQuery};

use crate::error::CacheError;
use crate::extract::RecordExtractor;
use crate::types::{is_valid_identity, short_identity, SimId, LOCALHOST};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Which of the two caches a store is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Local,
    Remote,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Remote => "remote",
        }
    }
}

/// Counters returned by a rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub scrubbed: usize,
    pub directories_visited: usize,
    pub ingested: usize,
}

/// Key/value cache of simulation records.
pub struct FingerprintStore {
    tier: Tier,
    records: RecordMap,
    short_ids: ShortIdIndex,
    backend: Box<dyn StoreBackend>,
    extractor: Option<Arc<dyn RecordExtractor>>,
    root_dirs: Vec<PathBuf>,
}

impl FingerprintStore {
    /// Open the cache of this host. Scans use `extractor` over `root_dirs`.
    pub fn open_local(
        backend: Box<dyn StoreBackend>,
        extractor: Arc<dyn RecordExtractor>,
        root_dirs: Vec<PathBuf>,
    ) -> Result<Self, CacheError> {
        let mut store = Self::open(Tier::Local, backend)?;
        store.extractor = Some(extractor);
        store.root_dirs = root_dirs;
        Ok(store)
    }

    /// Open the cache of remote simulations.
    pub fn open_remote(backend: Box<dyn StoreBackend>) -> Result<Self, CacheError> {
        Self::open(Tier::Remote, backend)
    }

    fn open(tier: Tier, backend: Box<dyn StoreBackend>) -> Result<Self, CacheError> {
        let mut records = backend.load()?;
        records.retain(|identity, _| {
            let valid = is_valid_identity(identity);
            if !valid {
                warn!(tier = tier.as_str(), uuid = %identity, "Dropping cache entry with malformed identity");
            }
            valid
        });
        let short_ids = ShortIdIndex::from_identities(records.keys());
        debug!(tier = tier.as_str(), count = records.len(), "Opened fingerprint store");
        Ok(Self {
            tier,
            records,
            short_ids,
            backend,
            extractor: None,
            root_dirs: Vec::new(),
        })
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn location(&self) -> Option<&Path> {
        self.backend.location()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, ordered by identity.
    pub fn records(&self) -> impl Iterator<Item = &SimulationRecord> {
        self.records.values()
    }

    /// Insert a record under its identity and write through.
    pub fn insert(&mut self, identity: &str, record: SimulationRecord) -> Result<(), CacheError> {
        if !is_valid_identity(identity) {
            return Err(CacheError::InvalidIdentity(format!("'{}' is not a uuid", identity)));
        }
        if record.uuid != identity {
            return Err(CacheError::InvalidIdentity(format!(
                "'{}' does not match the record uuid '{}'",
                identity, record.uuid
            )));
        }

        let collisions = self.short_ids.insert(identity);
        if !collisions.is_empty() {
            warn!(
                tier = self.tier.as_str(),
                uuid = %identity,
                short = short_identity(identity),
                others = ?collisions,
                "Short id collision, short key is ambiguous until resolved"
            );
        }
        self.records.insert(identity.to_string(), record);
        self.backend.put(&self.records, &self.records[identity])?;
        Ok(())
    }

    /// Map a full or shortened key to the stored identity.
    fn resolve_key(&self, key: &str) -> Result<Option<SimId>, CacheError> {
        if self.records.contains_key(key) {
            return Ok(Some(key.to_string()));
        }
        Ok(self.short_ids.resolve(key)?.cloned())
    }

    /// Exact lookup by full or shortened identity.
    pub fn request(&self, key: &str) -> Result<&SimulationRecord, CacheError> {
        self.resolve_key(key)?
            .and_then(|identity| self.records.get(&identity))
            .ok_or_else(|| CacheError::CacheMiss(key.to_string()))
    }

    /// First record whose full identity matches the regular expression `key`.
    pub fn pattern_lookup(&self, key: &str) -> Result<&SimulationRecord, CacheError> {
        let pattern = Regex::new(key)?;
        self.records
            .iter()
            .find(|(identity, _)| pattern.is_match(identity))
            .map(|(_, record)| record)
            .ok_or_else(|| CacheError::CacheMiss(key.to_string()))
    }

    /// Remove by full or shortened identity. Absent keys are not an error.
    pub fn remove(&mut self, key: &str) -> Result<Option<SimulationRecord>, CacheError> {
        let Some(identity) = self.resolve_key(key)? else {
            return Ok(None);
        };
        let removed = self.records.remove(&identity);
        self.short_ids.remove(&identity);
        if removed.is_some() {
            self.backend.delete(&self.records, &identity)?;
            debug!(tier = self.tier.as_str(), uuid = %identity, "Removed cache entry");
        }
        Ok(removed)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key) || self.short_ids.contains(key)
    }

    /// Records matching `query`, ordered by identity.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SimulationRecord>, CacheError> {
        let compiled = query.compile()?;
        let matches = self
            .records
            .values()
            .filter(|record| compiled.matches(record))
            .cloned()
            .collect();
        query.finish(matches)
    }

    /// Like `search`, but an empty result is an empty list.
    pub fn search_lenient(&self, query: &SearchQuery) -> Result<Vec<SimulationRecord>, CacheError> {
        let query = query.clone().unique(false);
        match self.search(&query) {
            Ok(matches) => Ok(matches),
            Err(CacheError::NoSimulationFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn require_local(&self, operation: &'static str) -> Result<&Arc<dyn RecordExtractor>, CacheError> {
        match (&self.tier, &self.extractor) {
            (Tier::Local, Some(extractor)) => Ok(extractor),
            _ => Err(CacheError::UnsupportedOnTier {
                operation,
                tier: self.tier.as_str(),
            }),
        }
    }

    /// Insert the simulation found at `path`.
    pub fn notify(&mut self, path: &Path) -> Result<SimId, CacheError> {
        let extractor = Arc::clone(self.require_local("notify")?);
        let resolved = expand_path(path)?;
        let record = extractor
            .extract(&resolved)
            .map_err(crate::error::StorageError::from)?
            .ok_or_else(|| CacheError::NotASimulation(resolved.clone()))?;
        let identity = record.uuid.clone();
        self.insert(&identity, SimulationRecord { host: LOCALHOST.to_string(), ..record })?;
        info!(uuid = %identity, path = %resolved.display(), "Added simulation to cache");
        Ok(identity)
    }

    /// Drop entries whose directory is gone. Returns how many were removed.
    pub fn scrub(&mut self) -> Result<usize, CacheError> {
        self.require_local("scrub")?;
        let stale: Vec<SimId> = self
            .records
            .iter()
            .filter(|(_, record)| !record.path.exists())
            .map(|(identity, _)| identity.clone())
            .collect();
        for identity in &stale {
            self.remove(identity)?;
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "Scrubbed vanished simulations");
        }
        Ok(stale.len())
    }

    /// Scrub, then scan `base` or every configured root directory.
    pub fn rebuild(&mut self, base: Option<&Path>) -> Result<RebuildReport, CacheError> {
        let extractor = Arc::clone(self.require_local("rebuild")?);
        let mut report = RebuildReport {
            scrubbed: self.scrub()?,
            ..Default::default()
        };

        let bases: Vec<PathBuf> = match base {
            Some(base) => vec![base.to_path_buf()],
            None => self.root_dirs.clone(),
        };
        if bases.is_empty() {
            warn!("No root directories configured, nothing to scan");
        }

        for base in &bases {
            let walker = WalkDir::new(base)
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| {
                    entry.file_type().is_dir() && !extractor.is_metadata_dir(entry.path())
                });
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(base = %base.display(), error = %e, "Skipping unreadable directory");
                        continue;
                    }
                };
                report.directories_visited += 1;
                match extractor.extract(entry.path()) {
                    Ok(Some(record)) => {
                        let identity = record.uuid.clone();
                        match self.insert(&identity, record) {
                            Ok(()) => report.ingested += 1,
                            Err(CacheError::InvalidIdentity(reason)) => {
                                warn!(path = %entry.path().display(), uuid = %identity, reason = %reason, "Ignoring simulation with malformed uuid");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "Failed to read simulation metadata");
                    }
                }
            }
        }

        info!(
            scrubbed = report.scrubbed,
            visited = report.directories_visited,
            ingested = report.ingested,
            "Rebuilt local cache"
        );
        Ok(report)
    }
}

/// Expand a leading `~` and make the path absolute. The path must exist.
pub fn expand_path(path: &Path) -> Result<PathBuf, CacheError> {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var("HOME").map_err(|_| {
                crate::error::StorageError::InvalidPath("HOME is not set".to_string())
            })?;
            PathBuf::from(home).join(rest)
        }
        Err(_) => path.to_path_buf(),
    };
    dunce::canonicalize(&expanded).map_err(|e| {
        crate::error::StorageError::InvalidPath(format!(
            "No such directory: {} ({})",
            path.display(),
            e
        ))
        .into()
    })
}
