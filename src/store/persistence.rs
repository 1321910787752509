//! Durable backends for a fingerprint store.
//!
//! The JSON backend keeps the flat `identity -> record` file format and
//! replaces the file atomically on every mutation. The sled backend writes
//! single keys and is meant for hosts where several processes touch the cache.

use crate::error::StorageError;
use crate::store::record::SimulationRecord;
use crate::types::SimId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub type RecordMap = BTreeMap<SimId, SimulationRecord>;

/// Backend kind selected in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Json,
    Sled,
}

/// Persistence port of a fingerprint store.
///
/// `put` and `delete` receive the full map after the mutation was applied in
/// memory, so whole-file backends can rewrite and key-value backends can
/// apply the single change.
pub trait StoreBackend: Send + Sync {
    fn load(&self) -> Result<RecordMap, StorageError>;
    fn put(&self, records: &RecordMap, record: &SimulationRecord) -> Result<(), StorageError>;
    fn delete(&self, records: &RecordMap, identity: &str) -> Result<(), StorageError>;
    /// Where the data lives, for display.
    fn location(&self) -> Option<&Path>;
}

/// Open the backend of the given kind at `path`.
pub fn open_backend(kind: BackendKind, path: &Path) -> Result<Box<dyn StoreBackend>, StorageError> {
    match kind {
        BackendKind::Json => Ok(Box::new(JsonFileBackend::new(path))),
        BackendKind::Sled => Ok(Box::new(SledBackend::open(path)?)),
    }
}

/// Flat JSON file, rewritten through a temporary file and a rename.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn write_atomic(&self, records: &RecordMap) -> Result<(), StorageError> {
        let dir = self.path.parent().ok_or_else(|| {
            StorageError::InvalidPath(format!(
                "Cache file has no parent directory: {}",
                self.path.display()
            ))
        })?;
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, records)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StorageError::IoError(e.error))?;

        debug!(path = %self.path.display(), count = records.len(), "Wrote cache file");
        Ok(())
    }
}

impl StoreBackend for JsonFileBackend {
    fn load(&self) -> Result<RecordMap, StorageError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RecordMap::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(RecordMap::new());
        }

        match serde_json::from_str::<RecordMap>(&content) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Cache file is unreadable, starting with an empty cache"
                );
                Ok(RecordMap::new())
            }
        }
    }

    fn put(&self, records: &RecordMap, _record: &SimulationRecord) -> Result<(), StorageError> {
        self.write_atomic(records)
    }

    fn delete(&self, records: &RecordMap, _identity: &str) -> Result<(), StorageError> {
        self.write_atomic(records)
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Embedded key-value store, one key per identity.
pub struct SledBackend {
    db: sled::Db,
    path: PathBuf,
}

impl SledBackend {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let db = sled::open(&path)?;
        Ok(Self { db, path })
    }
}

impl StoreBackend for SledBackend {
    fn load(&self) -> Result<RecordMap, StorageError> {
        let mut records = RecordMap::new();
        for entry in self.db.iter() {
            let (key, value) = entry?;
            let identity = String::from_utf8_lossy(&key).into_owned();
            match serde_json::from_slice::<SimulationRecord>(&value) {
                Ok(record) => {
                    records.insert(identity, record);
                }
                Err(e) => {
                    warn!(uuid = %identity, error = %e, "Skipping undecodable cache entry");
                }
            }
        }
        Ok(records)
    }

    fn put(&self, _records: &RecordMap, record: &SimulationRecord) -> Result<(), StorageError> {
        let value = serde_json::to_vec(record)?;
        self.db.insert(record.uuid.as_bytes(), value)?;
        self.db.flush()?;
        Ok(())
    }

    fn delete(&self, _records: &RecordMap, identity: &str) -> Result<(), StorageError> {
        self.db.remove(identity.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Non-durable backend, used by tests and dry runs.
#[derive(Default)]
pub struct MemoryBackend {
    snapshot: Mutex<RecordMap>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: RecordMap) -> Self {
        Self {
            snapshot: Mutex::new(records),
        }
    }
}

impl StoreBackend for MemoryBackend {
    fn load(&self) -> Result<RecordMap, StorageError> {
        Ok(self.snapshot.lock().clone())
    }

    fn put(&self, records: &RecordMap, _record: &SimulationRecord) -> Result<(), StorageError> {
        *self.snapshot.lock() = records.clone();
        Ok(())
    }

    fn delete(&self, records: &RecordMap, _identity: &str) -> Result<(), StorageError> {
        *self.snapshot.lock() = records.clone();
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        None
    }
}
