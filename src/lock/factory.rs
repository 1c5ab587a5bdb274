// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Builds [`DistributedLock`]s that share one store and one set of defaults.

use super::lease::{DistributedLock, LockError};
use crate::config::LockConfig;
use crate::store::SharedStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct LockFactory {
    store: Arc<dyn SharedStore>,
    config: LockConfig,
}

impl LockFactory {
    pub fn new(store: Arc<dyn SharedStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// A fresh lock instance with the configured defaults.
    #[must_use]
    pub fn create(&self, name: &str) -> DistributedLock {
        DistributedLock::new(name, Arc::clone(&self.store), &self.config)
    }

    #[must_use]
    pub fn create_with_ttl(&self, name: &str, ttl: Duration) -> DistributedLock {
        self.create(name).with_ttl(ttl)
    }

    /// Run `f` under the lock `name` with a throwaway instance.
    pub async fn with_lock<F, Fut, T>(&self, name: &str, timeout: Option<Duration>, f: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.create(name).with_lock(timeout, f).await
    }
}

impl std::fmt::Debug for LockFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockFactory").field("config", &self.config).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn test_factory_locks_share_store() {
        let factory = LockFactory::new(Arc::new(MemoryStore::new()), LockConfig::default());
        let a = factory.create("nightly");
        let b = factory.create("nightly");

        assert!(a.acquire(None).await.unwrap());
        assert!(!b.acquire(Some(Duration::ZERO)).await.unwrap());
        assert_eq!(a.ttl(), Duration::from_secs(30));

        let short = factory.create_with_ttl("other", Duration::from_secs(5));
        assert_eq!(short.ttl(), Duration::from_secs(5));
        assert_eq!(short.key(), "distributed_lock:other");
    }

    #[tokio::test(start_paused = true)]
    async fn test_factory_with_lock() {
        let factory = LockFactory::new(Arc::new(MemoryStore::new()), LockConfig::default());
        let holder = factory.create("busy");
        holder.acquire(None).await.unwrap();

        let err = factory
            .with_lock("busy", Some(Duration::from_millis(200)), || async { 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::AcquisitionTimeout { .. }));

        let value = factory.with_lock("free", None, || async { 2 }).await.unwrap();
        assert_eq!(value, 2);
    }
}
