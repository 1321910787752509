//! Mount lifecycle
//!
//! Remote simulation directories are made available locally through sshfs.
//! A `MountManager` owns every mount of this process: clients hold a
//! `MountLease`, and one watcher task per mount unmounts it once no client
//! has used it for the grace period. Bookkeeping directories mirror the
//! client set on disk so other processes can share a mount.

pub mod bookkeeping;
pub mod remote_fs;
pub mod table;

pub use bookkeeping::MountDir;
pub use remote_fs::{RemoteFs, Sshfs};
pub use table::{MountEntry, MountTable, SystemMountTable};

use crate::concurrency::EndpointLocks;
use crate::error::MountError;
use crate::types::{new_identity, Location};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

fn default_grace_period_secs() -> u64 {
    120
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_cache_timeout_secs() -> u64 {
    900
}

fn default_read_only() -> bool {
    true
}

/// Mount configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Parent of the bookkeeping directories, the system temp dir when unset
    #[serde(default)]
    pub mount_root: Option<PathBuf>,

    /// Idle time after which a mount is torn down, in seconds
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    /// Watcher polling interval, in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// sshfs attribute and directory cache timeout, in seconds
    #[serde(default = "default_cache_timeout_secs")]
    pub cache_timeout_secs: u64,

    #[serde(default = "default_read_only")]
    pub read_only: bool,
}

impl MountConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn effective_mount_root(&self) -> PathBuf {
        self.mount_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mount_root: None,
            grace_period_secs: default_grace_period_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            cache_timeout_secs: default_cache_timeout_secs(),
            read_only: default_read_only(),
        }
    }
}

/// Lifecycle state of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounting,
    Mounted,
    Idle,
    Unmounting,
}

struct MountHandle {
    dir: MountDir,
    active: HashSet<String>,
    /// When the client set last became empty
    finished: Option<Instant>,
    state: MountState,
    cancel: watch::Sender<bool>,
    watcher: Option<JoinHandle<()>>,
}

struct Inner {
    /// Registered mounts by endpoint
    handles: Mutex<HashMap<String, MountHandle>>,
    /// Client token to endpoint
    tokens: Mutex<HashMap<String, String>>,
    locks: EndpointLocks,
    remote_fs: Arc<dyn RemoteFs>,
    table: Arc<dyn MountTable>,
    config: MountConfig,
    /// Number of live watcher tasks
    watching: watch::Sender<usize>,
}

/// Supervisor of this process' mounts.
#[derive(Clone)]
pub struct MountManager {
    inner: Arc<Inner>,
}

/// A client's claim on a mounted (or local) directory.
///
/// Released when dropped.
pub struct MountLease {
    path: PathBuf,
    token: Option<String>,
    manager: Option<MountManager>,
}

impl MountLease {
    fn local(path: PathBuf) -> Self {
        Self {
            path,
            token: None,
            manager: None,
        }
    }

    /// Where the simulation is reachable locally.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Whether the lease holds a mount, as opposed to a plain local path.
    pub fn is_mounted(&self) -> bool {
        self.token.is_some()
    }
}

impl Drop for MountLease {
    fn drop(&mut self) {
        if let (Some(token), Some(manager)) = (self.token.take(), self.manager.take()) {
            if let Err(e) = manager.release(&token) {
                warn!(token = %token, error = %e, "Failed to release mount lease");
            }
        }
    }
}

impl MountManager {
    pub fn new(config: MountConfig, remote_fs: Arc<dyn RemoteFs>, table: Arc<dyn MountTable>) -> Self {
        let (watching, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                handles: Mutex::new(HashMap::new()),
                tokens: Mutex::new(HashMap::new()),
                locks: EndpointLocks::new(),
                remote_fs,
                table,
                config,
                watching,
            }),
        }
    }

    /// Manager mounting through sshfs and reading the system mount table.
    pub fn sshfs(config: MountConfig) -> Self {
        let remote_fs = Arc::new(Sshfs::new(config.cache_timeout_secs, config.read_only));
        Self::new(config, remote_fs, Arc::new(SystemMountTable))
    }

    pub fn config(&self) -> &MountConfig {
        &self.inner.config
    }

    /// Make `location` available locally.
    ///
    /// Local locations are returned unchanged without mounting anything.
    /// A remote path is always mounted, even if the same path exists here.
    pub async fn acquire(&self, location: &Location) -> Result<MountLease, MountError> {
        if location.is_local() {
            return Ok(MountLease::local(location.path.clone()));
        }
        self.acquire_endpoint(&location.to_string()).await
    }

    /// Attach a new client to the mount of `endpoint` (`host:/path`),
    /// mounting it first if necessary.
    pub async fn acquire_endpoint(&self, endpoint: &str) -> Result<MountLease, MountError> {
        let _guard = self.inner.locks.lock(endpoint).await;

        let registered = self.inner.handles.lock().get(endpoint).map(|h| {
            let watched = h.watcher.as_ref().is_some_and(|w| !w.is_finished());
            (h.dir.clone(), watched)
        });
        let dir = match registered {
            Some((dir, watched)) => {
                debug!(endpoint, "Reusing registered mount");
                if !watched {
                    info!(endpoint, "Mount has no watcher, starting a new one");
                    if let Some(handle) = self.inner.handles.lock().get_mut(endpoint) {
                        handle.cancel.send_replace(false);
                    }
                    self.spawn_watcher(endpoint);
                }
                dir
            }
            None => self.mount_or_adopt(endpoint).await?,
        };

        let token = new_identity();
        dir.add_token(&token)?;
        if let Some(handle) = self.inner.handles.lock().get_mut(endpoint) {
            handle.active.insert(token.clone());
            handle.finished = None;
            handle.state = MountState::Mounted;
        }
        self.inner
            .tokens
            .lock()
            .insert(token.clone(), endpoint.to_string());
        debug!(endpoint, token = %token, "Attached mount client");

        Ok(MountLease {
            path: dir.mount_point(),
            token: Some(token),
            manager: Some(self.clone()),
        })
    }

    /// Register a mount for `endpoint`, adopting one from the mount table
    /// when another process already mounted it. Caller holds the endpoint lock.
    async fn mount_or_adopt(&self, endpoint: &str) -> Result<MountDir, MountError> {
        let entries = self.inner.table.entries().await?;
        if let Some(dir) = table::find_endpoint(&entries, endpoint).and_then(|e| MountDir::adopt(&e.target)) {
            info!(endpoint, mount_dir = %dir.root().display(), "Adopting existing mount");
            self.register(endpoint, dir.clone(), MountState::Mounted);
            self.spawn_watcher(endpoint);
            return Ok(dir);
        }

        let dir = MountDir::create(&self.inner.config.effective_mount_root())?;
        self.register(endpoint, dir.clone(), MountState::Mounting);
        let started = std::time::Instant::now();
        if let Err(e) = self.inner.remote_fs.mount(endpoint, &dir.mount_point()).await {
            self.inner.handles.lock().remove(endpoint);
            if let Err(cleanup) = dir.remove_all() {
                warn!(endpoint, error = %cleanup, "Could not remove bookkeeping of failed mount");
            }
            return Err(e);
        }
        if let Some(handle) = self.inner.handles.lock().get_mut(endpoint) {
            handle.state = MountState::Mounted;
        }
        info!(
            endpoint,
            mount_dir = %dir.root().display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Mounted"
        );
        self.spawn_watcher(endpoint);
        Ok(dir)
    }

    fn register(&self, endpoint: &str, dir: MountDir, state: MountState) {
        let (cancel, _) = watch::channel(false);
        self.inner.handles.lock().insert(
            endpoint.to_string(),
            MountHandle {
                dir,
                active: HashSet::new(),
                finished: None,
                state,
                cancel,
                watcher: None,
            },
        );
    }

    /// Detach a client. The mount itself stays until its watcher decides.
    pub fn release(&self, token: &str) -> Result<(), MountError> {
        let endpoint = self
            .inner
            .tokens
            .lock()
            .remove(token)
            .ok_or_else(|| MountError::UnknownToken(token.to_string()))?;

        let released = {
            let mut handles = self.inner.handles.lock();
            handles.get_mut(&endpoint).map(|handle| {
                handle.active.remove(token);
                let now_idle = handle.active.is_empty();
                if now_idle {
                    handle.finished = Some(Instant::now());
                    handle.state = MountState::Idle;
                }
                (handle.dir.clone(), now_idle)
            })
        };

        if let Some((dir, now_idle)) = released {
            dir.remove_token(token)?;
            if now_idle {
                dir.touch_finished()?;
            }
            debug!(endpoint = %endpoint, token, idle = now_idle, "Released mount client");
        }
        Ok(())
    }

    /// State of the mount of `endpoint`, `Unmounted` when none is registered.
    pub fn state(&self, endpoint: &str) -> MountState {
        self.inner
            .handles
            .lock()
            .get(endpoint)
            .map(|h| h.state)
            .unwrap_or(MountState::Unmounted)
    }

    pub fn client_count(&self, endpoint: &str) -> usize {
        self.inner
            .handles
            .lock()
            .get(endpoint)
            .map(|h| h.active.len())
            .unwrap_or(0)
    }

    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self.inner.handles.lock().keys().cloned().collect();
        endpoints.sort();
        endpoints
    }

    fn spawn_watcher(&self, endpoint: &str) {
        let Some(cancel) = self
            .inner
            .handles
            .lock()
            .get(endpoint)
            .map(|h| h.cancel.subscribe())
        else {
            return;
        };

        self.inner.watching.send_modify(|n| *n += 1);
        let manager = self.clone();
        let owned = endpoint.to_string();
        let handle = tokio::spawn(async move {
            manager.watch_loop(&owned, cancel).await;
            manager.inner.watching.send_modify(|n| *n = n.saturating_sub(1));
        });

        if let Some(registered) = self.inner.handles.lock().get_mut(endpoint) {
            registered.watcher = Some(handle);
        }
    }

    /// Poll until the mount has been idle for the grace period, then tear it down.
    async fn watch_loop(&self, endpoint: &str, mut cancel: watch::Receiver<bool>) {
        let poll = self.inner.config.poll_interval();
        let grace = self.inner.config.grace_period();
        let mut last_busy = Instant::now();
        debug!(endpoint, "Watcher started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        debug!(endpoint, "Watcher cancelled");
                        return;
                    }
                    continue;
                }
            }

            let _guard = self.inner.locks.lock(endpoint).await;
            let Some((dir, in_memory, finished)) = self.snapshot(endpoint) else {
                return;
            };
            let on_disk = match dir.active_count() {
                Ok(count) => count > 0,
                Err(e) => {
                    warn!(endpoint, error = %e, "Cannot read mount clients, assuming busy");
                    true
                }
            };

            let now = Instant::now();
            if in_memory || on_disk {
                last_busy = now;
                continue;
            }
            let idle_since = finished.map_or(last_busy, |f| f.max(last_busy));
            if now.duration_since(idle_since) <= grace {
                continue;
            }

            match self.teardown(endpoint, &dir).await {
                Ok(()) => return,
                Err(e) => {
                    error!(endpoint, error = %e, "Teardown failed, keeping mount and retrying");
                }
            }
        }
    }

    fn snapshot(&self, endpoint: &str) -> Option<(MountDir, bool, Option<Instant>)> {
        self.inner
            .handles
            .lock()
            .get(endpoint)
            .map(|h| (h.dir.clone(), !h.active.is_empty(), h.finished))
    }

    /// Unmount and forget `endpoint`. Caller holds the endpoint lock.
    async fn teardown(&self, endpoint: &str, dir: &MountDir) -> Result<(), MountError> {
        self.set_state(endpoint, MountState::Unmounting);
        if let Err(e) = self.inner.remote_fs.unmount(&dir.mount_point()).await {
            self.set_state(endpoint, MountState::Idle);
            return Err(e);
        }
        if let Err(e) = dir.remove_all() {
            warn!(endpoint, error = %e, "Could not remove mount bookkeeping");
        }
        self.inner.handles.lock().remove(endpoint);
        info!(endpoint, mount_dir = %dir.root().display(), "Unmounted");
        Ok(())
    }

    fn set_state(&self, endpoint: &str, state: MountState) {
        if let Some(handle) = self.inner.handles.lock().get_mut(endpoint) {
            handle.state = state;
        }
    }

    /// Stop the watcher of `endpoint` without unmounting.
    pub async fn cancel(&self, endpoint: &str) -> bool {
        let watcher = self.inner.handles.lock().get_mut(endpoint).and_then(|h| {
            let _ = h.cancel.send(true);
            h.watcher.take()
        });
        match watcher {
            Some(watcher) => {
                let _ = watcher.await;
                true
            }
            None => false,
        }
    }

    /// Cancel every watcher, then unmount whatever is idle right away.
    /// Mounts still in use are left mounted.
    pub async fn shutdown(&self) {
        for endpoint in self.endpoints() {
            self.cancel(&endpoint).await;

            let _guard = self.inner.locks.lock(&endpoint).await;
            let Some((dir, in_memory, _)) = self.snapshot(&endpoint) else {
                continue;
            };
            let on_disk = dir.active_count().map(|n| n > 0).unwrap_or(true);
            if in_memory || on_disk {
                info!(endpoint = %endpoint, "Mount still in use, leaving it mounted");
                continue;
            }
            if let Err(e) = self.teardown(&endpoint, &dir).await {
                error!(endpoint = %endpoint, error = %e, "Teardown on shutdown failed");
            }
        }
        self.inner.locks.prune();
    }

    /// Wait until every watcher has terminated.
    pub async fn wait_idle(&self) {
        let mut watching = self.inner.watching.subscribe();
        while *watching.borrow_and_update() > 0 {
            if watching.changed().await.is_err() {
                return;
            }
        }
    }

    /// simloc sshfs mounts of the live mount table, any process.
    pub async fn list_mounts(&self) -> Result<Vec<MountEntry>, MountError> {
        Ok(self
            .inner
            .table
            .entries()
            .await?
            .into_iter()
            .filter(MountEntry::is_simloc_sshfs)
            .collect())
    }

    async fn entry_at(&self, index: usize) -> Result<MountEntry, MountError> {
        let mounts = self.list_mounts().await?;
        let available = mounts.len();
        mounts
            .into_iter()
            .nth(index)
            .ok_or(MountError::IndexOutOfRange { index, available })
    }

    /// Unmount the `index`-th entry of `list_mounts` and drop its bookkeeping.
    pub async fn unmount_index(&self, index: usize) -> Result<MountEntry, MountError> {
        let entry = self.entry_at(index).await?;
        self.cancel(&entry.source).await;
        let _guard = self.inner.locks.lock(&entry.source).await;

        self.inner.remote_fs.unmount(&entry.target).await?;
        if let Some(dir) = MountDir::adopt(&entry.target) {
            dir.remove_all()?;
        }
        let removed = self.inner.handles.lock().remove(&entry.source);
        if let Some(handle) = removed {
            self.inner
                .tokens
                .lock()
                .retain(|token, _| !handle.active.contains(token));
        }
        info!(endpoint = %entry.source, index, "Unmounted by request");
        Ok(entry)
    }

    /// Unmount and mount again the `index`-th entry of `list_mounts`, in place.
    pub async fn remount_index(&self, index: usize) -> Result<MountEntry, MountError> {
        let entry = self.entry_at(index).await?;
        let _guard = self.inner.locks.lock(&entry.source).await;

        self.inner.remote_fs.unmount(&entry.target).await?;
        std::fs::create_dir_all(&entry.target)?;
        self.inner.remote_fs.mount(&entry.source, &entry.target).await?;
        info!(endpoint = %entry.source, index, "Remounted by request");
        Ok(entry)
    }
}
