// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Application context: one set of coordination primitives per process.
//!
//! Everything that would otherwise be a process-wide singleton (the rate
//! limiter per platform, the lock defaults, the two-tier cache) is owned
//! here and handed out by reference. Two contexts over the same store
//! still coordinate, because every piece of shared state lives in the
//! store rather than in the context.
//!
//! ```rust,no_run
//! use marketplace_sync::{AdapterConfig, AdapterFactory, JobOutcome, OrderFilter, Platform, SyncConfig, SyncContext};
//! use std::time::Duration;
//!
//! # async fn run() -> marketplace_sync::Result<()> {
//! let ctx = SyncContext::connect(SyncConfig::from_json_file("sync.json")?).await?;
//! let adapter = AdapterFactory::create_shared(
//!     &AdapterConfig::new(Platform::TikTok).with_app_credentials("key", "secret").with_access_token("token"),
//! )?;
//!
//! let filter = OrderFilter::default();
//! let outcome = ctx
//!     .run_exclusive("order_sync:tiktok", Some(Duration::from_secs(5)), || async {
//!         ctx.call_adapter(adapter.platform(), "get_orders", || adapter.get_orders(&filter)).await
//!     })
//!     .await?;
//! if let JobOutcome::Completed(orders) = outcome {
//!     println!("fetched {} orders", orders?.len());
//! }
//! ctx.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::adapter::{AdapterError, Platform, PlatformAdapter};
use crate::batching::BatchOperationOptimizer;
use crate::cache::CacheManager;
use crate::config::{ConfigError, SyncConfig};
use crate::error::{CallError, Result};
use crate::lock::{DistributedLock, LockError, LockFactory};
use crate::monitor::{self, ApiCallMonitor};
use crate::rate_limit::{RateLimitStatus, RateLimiter, RateLimiterRegistry};
use crate::resilience::{RetryError, RetryManager, RetryPolicy};
use crate::store::{RedisStore, SharedStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Result of [`SyncContext::run_exclusive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome<T> {
    Completed(T),
    /// Another holder had the job's lock for the whole wait.
    Skipped,
}

impl<T> JobOutcome<T> {
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Skipped => None,
        }
    }
}

pub struct SyncContext {
    store: Arc<dyn SharedStore>,
    config: SyncConfig,
    limiters: RateLimiterRegistry,
    locks: LockFactory,
    cache: Arc<CacheManager>,
    retry: RetryManager,
    monitor: ApiCallMonitor,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("limiters", &self.limiters.platforms())
            .field("locks", &self.locks)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    /// Validate `config` and connect to the Redis store it names.
    #[tracing::instrument(skip(config), fields(prefix = config.key_prefix.as_deref().unwrap_or("")))]
    pub async fn connect(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let url = config
            .redis_url
            .clone()
            .ok_or_else(|| ConfigError::Invalid("redis_url is required to connect".into()))?;
        let store = RedisStore::with_prefix(&url, config.key_prefix.as_deref()).await?;
        info!("Connected to shared store");
        Ok(Self::with_store(Arc::new(store), config))
    }

    /// Build over an existing store. Must run inside a Tokio runtime for
    /// the cache's write-back worker to start.
    pub fn with_store(store: Arc<dyn SharedStore>, config: SyncConfig) -> Self {
        let limiters = RateLimiterRegistry::new(
            Arc::clone(&store),
            config.rate_limits.clone(),
            config.default_rate_limit,
        );
        let locks = LockFactory::new(Arc::clone(&store), config.lock.clone());
        let cache = Arc::new(CacheManager::new(Arc::clone(&store), config.cache.clone()));
        let retry = RetryManager::new(RetryPolicy::from_config(&config.retry));
        let monitor = ApiCallMonitor::new(Arc::clone(&store), config.monitor.clone());
        debug!(rate_limits = config.rate_limits.len(), "Sync context ready");
        Self { store, config, limiters, locks, cache, retry, monitor }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }

    pub fn rate_limiter(&self, platform: &str) -> Arc<RateLimiter> {
        self.limiters.get(platform)
    }

    #[must_use]
    pub fn rate_limiters(&self) -> &RateLimiterRegistry {
        &self.limiters
    }

    pub async fn rate_limit_status(&self) -> Vec<RateLimitStatus> {
        self.limiters.all_status().await
    }

    #[must_use]
    pub fn lock(&self, name: &str) -> DistributedLock {
        self.locks.create(name)
    }

    #[must_use]
    pub fn locks(&self) -> &LockFactory {
        &self.locks
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    #[must_use]
    pub fn retry(&self) -> &RetryManager {
        &self.retry
    }

    #[must_use]
    pub fn monitor(&self) -> &ApiCallMonitor {
        &self.monitor
    }

    /// Optimizer for `adapter`, sharing this context's limiter, cache and
    /// monitor.
    pub fn optimizer(&self, adapter: Arc<dyn PlatformAdapter>) -> BatchOperationOptimizer {
        let limiter = self.limiters.get(adapter.platform().as_str());
        BatchOperationOptimizer::new(adapter, limiter, self.retry.policy(), self.config.batch.clone())
            .with_cache(Arc::clone(&self.cache))
            .with_monitor(self.monitor.clone())
    }

    /// One adapter call with the platform's rate limit, the retry policy and
    /// call monitoring applied. Every attempt waits for its own token, up to
    /// the batch token timeout.
    pub async fn call_adapter<T, F, Fut>(
        &self,
        platform: Platform,
        endpoint: &str,
        mut call: F,
    ) -> std::result::Result<T, RetryError<CallError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, AdapterError>>,
    {
        let limiter = self.limiters.get(platform.as_str());
        let timeout = self.config.batch.token_timeout();
        let operation = format!("{platform}:{endpoint}");
        self.retry
            .execute_with_retry(&operation, || {
                let attempt = call();
                let limiter = Arc::clone(&limiter);
                async move {
                    limiter.acquire_or_timeout(1, timeout).await?;
                    monitor::observe_call(Some(&self.monitor), platform, endpoint, attempt)
                        .await
                        .map_err(CallError::from)
                }
            })
            .await
    }

    /// Run `job` under the lock of the same name. If the lock stays held
    /// elsewhere for the whole `timeout`, the job is skipped for this cycle
    /// instead of failing. A store failure while locking is still an error.
    pub async fn run_exclusive<F, Fut, T>(
        &self,
        job: &str,
        timeout: Option<Duration>,
        f: F,
    ) -> std::result::Result<JobOutcome<T>, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self.locks.with_lock(job, timeout, f).await {
            Ok(value) => Ok(JobOutcome::Completed(value)),
            Err(LockError::AcquisitionTimeout { waited, .. }) => {
                info!(job, waited_ms = waited.as_millis() as u64, "Job held elsewhere, skipping this cycle");
                crate::metrics::record_lock_event("skipped");
                Ok(JobOutcome::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    /// Flush pending cache write-backs.
    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
        info!("Sync context shut down");
    }
}
