//! Fakes and fixtures shared by the integration tests.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use simloc::error::{MountError, ProbeError};
use simloc::extract::MetaDirExtractor;
use simloc::mount::{MountEntry, MountTable, RemoteFs};
use simloc::remote::{HostProbe, ProbeRequest, StaticHosts};
use simloc::resolver::{Resolver, SearchConfig};
use simloc::store::{FingerprintStore, MemoryBackend, SimulationRecord};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const SIM_A: &str = "0f8e5d2a-3c4b-4a1e-9b7d-2e6f1a0c9d88";
pub const SIM_B: &str = "7a1b2c3d-4e5f-4a6b-8c7d-9e0f1a2b3c4d";
pub const SIM_C: &str = "c3d4e5f6-a7b8-4c9d-8e0f-1a2b3c4d5e6f";

pub fn record(uuid: &str, name: &str, path: impl Into<PathBuf>) -> SimulationRecord {
    SimulationRecord::new(uuid, name, path)
}

/// How a scripted host behaves when searched.
#[derive(Clone)]
pub enum HostScript {
    Answer(Vec<SimulationRecord>),
    Hang,
    Fail,
}

/// Host probe answering from a script instead of ssh.
#[derive(Default)]
pub struct ScriptedProbe {
    scripts: HashMap<String, HostScript>,
    existing: HashSet<(String, PathBuf)>,
    pub search_calls: AtomicUsize,
    pub exists_calls: AtomicUsize,
    pub requests: Mutex<Vec<ProbeRequest>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: &str, script: HostScript) -> Self {
        self.scripts.insert(host.to_string(), script);
        self
    }

    pub fn existing(mut self, host: &str, path: &str) -> Self {
        self.existing.insert((host.to_string(), PathBuf::from(path)));
        self
    }

    pub fn searches(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostProbe for ScriptedProbe {
    async fn search(
        &self,
        host: &str,
        request: &ProbeRequest,
    ) -> Result<Vec<SimulationRecord>, ProbeError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        match self.scripts.get(host).cloned() {
            Some(HostScript::Answer(records)) => Ok(records),
            Some(HostScript::Hang) => std::future::pending().await,
            Some(HostScript::Fail) | None => Err(ProbeError::Transport {
                host: host.to_string(),
                message: "connection refused".to_string(),
            }),
        }
    }

    async fn exists(&self, host: &str, path: &Path) -> Result<bool, ProbeError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .existing
            .contains(&(host.to_string(), path.to_path_buf())))
    }
}

pub fn local_store(records: &[SimulationRecord]) -> Arc<RwLock<FingerprintStore>> {
    let mut store = FingerprintStore::open_local(
        Box::new(MemoryBackend::new()),
        Arc::new(MetaDirExtractor::new()),
        Vec::new(),
    )
    .unwrap();
    for record in records {
        store.insert(&record.uuid, record.clone()).unwrap();
    }
    Arc::new(RwLock::new(store))
}

pub fn remote_store(records: &[SimulationRecord]) -> Arc<RwLock<FingerprintStore>> {
    let mut store = FingerprintStore::open_remote(Box::new(MemoryBackend::new())).unwrap();
    for record in records {
        store.insert(&record.uuid, record.clone()).unwrap();
    }
    Arc::new(RwLock::new(store))
}

pub fn resolver(
    local: Arc<RwLock<FingerprintStore>>,
    remote: Arc<RwLock<FingerprintStore>>,
    hosts: &[&str],
    probe: Arc<ScriptedProbe>,
) -> Resolver {
    let config = SearchConfig {
        search_timeout_secs: 2,
        validate_timeout_secs: 1,
        ..SearchConfig::default()
    };
    Resolver::new(
        local,
        remote,
        Arc::new(StaticHosts::new(hosts.iter().copied())),
        probe,
        config,
    )
}

/// Remote filesystem that only counts mounts and unmounts.
#[derive(Default)]
pub struct CountingFs {
    pub mounts: Mutex<Vec<String>>,
    pub unmounts: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl RemoteFs for CountingFs {
    async fn mount(&self, endpoint: &str, _target: &Path) -> Result<(), MountError> {
        self.mounts.lock().push(endpoint.to_string());
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<(), MountError> {
        self.unmounts.lock().push(target.to_path_buf());
        Ok(())
    }
}

/// Mount table without any entries.
pub struct EmptyTable;

#[async_trait]
impl MountTable for EmptyTable {
    async fn entries(&self) -> Result<Vec<MountEntry>, MountError> {
        Ok(Vec::new())
    }
}

/// Lay out a simulation directory with a `meta/` metadata directory.
pub fn write_simulation(dir: &Path, uuid: &str, name: &str, tags: &[&str]) {
    let meta = dir.join("meta");
    fs::create_dir_all(&meta).unwrap();
    fs::write(meta.join("uuid.txt"), format!("{}\n", uuid)).unwrap();
    fs::write(meta.join("name.txt"), format!("{}\n", name)).unwrap();
    fs::write(meta.join("tags.txt"), tags.join("\n")).unwrap();
}
