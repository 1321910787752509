//! Per-endpoint locking for mount lifecycle operations
//!
//! Acquiring a mount and tearing it down both hold the endpoint's lock, so two
//! clients asking for the same endpoint never race into two mounts, and a
//! watcher never unmounts underneath a client that is just attaching.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock registry keyed by endpoint descriptor (`host:/path`).
///
/// Different endpoints never block each other.
pub struct EndpointLocks {
    /// Map from endpoint to its async lock
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl EndpointLocks {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the lock of an endpoint
    fn get_lock(&self, endpoint: &str) -> Arc<Mutex<()>> {
        {
            let map = self.locks.read();
            if let Some(lock) = map.get(endpoint) {
                return lock.clone();
            }
        }

        let mut map = self.locks.write();
        // Another task may have created it between the two guards
        map.entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `endpoint`.
    pub async fn lock(&self, endpoint: &str) -> OwnedMutexGuard<()> {
        self.get_lock(endpoint).lock_owned().await
    }

    /// Drop locks nobody holds or waits for.
    pub fn prune(&self) {
        self.locks
            .write()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.read().is_empty()
    }
}

impl Default for EndpointLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_endpoint_is_serialized() {
        let locks = Arc::new(EndpointLocks::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..5 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("hostA:/data/sim1").await;
                let current = counter.load(Ordering::SeqCst);
                tokio::task::yield_now().await;
                counter.store(current + 1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // No lost updates
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_different_endpoints_dont_block() {
        let locks = EndpointLocks::new();
        let _a = locks.lock("hostA:/data/sim1").await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock("hostB:/data/sim1")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = EndpointLocks::new();
        let held = locks.lock("hostA:/x").await;
        drop(locks.lock("hostB:/y").await);
        locks.prune();
        assert_eq!(locks.len(), 1);
        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }
}
