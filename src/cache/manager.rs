// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Two-tier cache: process-local L1 in front of the shared store (L2).
//!
//! # Read path
//!
//! ```text
//! get(key, type) ──► L1 fresh? ──yes──► hit (l1)
//!                        │ no
//!                        ▼
//!                    L2 get ──some──► backfill L1 ──► hit (l2)
//!                        │ none / error / circuit open
//!                        ▼
//!                      miss
//! ```
//!
//! # Write path
//!
//! The cache type selects the strategy and L2 TTL (see [`CacheStrategy`]).
//! Types with `enable_local_cache = false` never touch L1.
//!
//! # Degradation
//!
//! Every L2 call goes through a circuit breaker. A failing or open L2 turns
//! reads into misses and writes into skipped writes, logged and counted but
//! never returned to the caller, unless strict writes were requested.

use super::invalidation::patterns_for_event;
use super::local::LocalCache;
use super::stats::{CacheCounters, CacheStats, Tier};
use super::strategy::{cache_type_for_scenario, CacheStrategy};
use super::write_back::{PendingWrite, WriteBackQueue};
use crate::config::{CacheConfig, CacheTypeConfig};
use crate::resilience::{CircuitBreaker, CircuitConfig, CircuitError};
use crate::store::{SharedStore, StoreError};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache value for '{key}' could not be serialized: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache backend unavailable: {0}")]
    Backend(String),
}

/// Outcome of [`CacheManager::warm_up`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmUpReport {
    pub requested: usize,
    pub already_cached: usize,
    pub loaded: usize,
    pub failed: usize,
}

pub struct CacheManager {
    store: Arc<dyn SharedStore>,
    config: CacheConfig,
    local: LocalCache,
    counters: CacheCounters,
    circuit: CircuitBreaker,
    write_back: Option<WriteBackQueue>,
    strict_writes: bool,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("local", &self.local)
            .field("circuit", &self.circuit)
            .field("write_back", &self.write_back)
            .field("strict_writes", &self.strict_writes)
            .finish()
    }
}

impl CacheManager {
    /// Build the manager and start its write-back worker. If no runtime is
    /// available for the worker, `write_back` types write L2 directly.
    pub fn new(store: Arc<dyn SharedStore>, config: CacheConfig) -> Self {
        Self::with_circuit(store, config, CircuitConfig::lenient())
    }

    pub fn with_circuit(store: Arc<dyn SharedStore>, config: CacheConfig, circuit: CircuitConfig) -> Self {
        let write_back = match WriteBackQueue::start(Arc::clone(&store), config.write_back.clone()) {
            Ok(queue) => Some(queue),
            Err(e) => {
                warn!(error = %e, "Write-back worker not started; write_back types will write through");
                None
            }
        };
        info!(
            l1_max_size = config.local.max_size,
            l1_ttl_secs = config.local.ttl_secs,
            compression = config.local.compression,
            cache_types = config.strategies.len(),
            "Cache manager initialized"
        );
        Self {
            local: LocalCache::new(&config.local),
            store,
            config,
            counters: CacheCounters::default(),
            circuit: CircuitBreaker::new("cache_l2", circuit),
            write_back,
            strict_writes: false,
        }
    }

    /// Surface L2 write/delete failures as [`CacheError::Backend`] instead
    /// of logging them. Reads always degrade to a miss.
    #[must_use]
    pub fn with_strict_writes(mut self, strict: bool) -> Self {
        self.strict_writes = strict;
        self
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[must_use]
    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    /// Strategy, TTL and L1 switch for `cache_type` (table default when
    /// the type is unknown).
    #[must_use]
    pub fn type_config(&self, cache_type: &str) -> CacheTypeConfig {
        self.config.for_type(cache_type)
    }

    /// Settings for a business scenario such as `product_detail` or
    /// `order_list`; unknown scenarios get cache-aside with a 300 s TTL.
    #[must_use]
    pub fn strategy_for_scenario(&self, scenario: &str) -> CacheTypeConfig {
        match cache_type_for_scenario(scenario) {
            Some(cache_type) => self.config.for_type(cache_type),
            None => CacheTypeConfig::default(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // L2 access (circuit breaker + degradation)
    // ═══════════════════════════════════════════════════════════════════════

    fn degraded(&self, operation: &str, key: &str, err: &CircuitError<StoreError>) {
        match err {
            CircuitError::Rejected => debug!(operation, key, "L2 circuit open, skipping"),
            CircuitError::Inner(e) => warn!(operation, key, error = %e, "L2 unavailable, degrading"),
        }
        crate::metrics::record_cache_degraded(operation);
    }

    async fn l2_get(&self, key: &str) -> Option<Vec<u8>> {
        let _timer = crate::metrics::LatencyTimer::new("l2", "get");
        match self.circuit.call(|| self.store.get(key)).await {
            Ok(value) => value,
            Err(e) => {
                self.degraded("get", key, &e);
                None
            }
        }
    }

    async fn l2_set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let _timer = crate::metrics::LatencyTimer::new("l2", "set");
        match self.circuit.call(|| self.store.set_ex(key, value, ttl)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.degraded("set", key, &e);
                self.backend_error(e)
            }
        }
    }

    async fn l2_delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        match self.circuit.call(|| self.store.delete_many(keys)).await {
            Ok(removed) => Ok(removed),
            Err(e) => {
                self.degraded("delete", keys.first().map_or("", String::as_str), &e);
                self.backend_error(e).map(|()| 0)
            }
        }
    }

    fn backend_error(&self, err: CircuitError<StoreError>) -> Result<(), CacheError> {
        if self.strict_writes {
            Err(CacheError::Backend(err.to_string()))
        } else {
            Ok(())
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════

    /// Raw payload for `key`: L1, then L2 with backfill. Never fails; an
    /// unreachable L2 is a miss.
    pub async fn get_raw(&self, key: &str, cache_type: &str) -> Option<Vec<u8>> {
        let type_config = self.config.for_type(cache_type);

        if type_config.enable_local_cache {
            if let Some(value) = self.local.get(key) {
                self.counters.hit(Tier::L1);
                debug!(key, cache_type, "L1 hit");
                return Some(value);
            }
        }

        if let Some(value) = self.l2_get(key).await {
            if type_config.enable_local_cache {
                self.local.insert(key, &value);
            }
            self.counters.hit(Tier::L2);
            debug!(key, cache_type, "L2 hit");
            return Some(value);
        }

        self.counters.miss();
        debug!(key, cache_type, "Cache miss");
        None
    }

    /// Typed read. A payload that no longer deserializes as `T` is logged,
    /// evicted from L1 and reported as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, cache_type: &str) -> Option<T> {
        let raw = self.get_raw(key, cache_type).await?;
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, cache_type, error = %e, "Cached payload does not match requested type");
                self.local.remove(key);
                None
            }
        }
    }

    /// Read-through helper: return the cached value or load, cache and
    /// return it. A failed cache write does not fail the load.
    pub async fn get_or_load<T, E, F, Fut>(&self, key: &str, cache_type: &str, loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key, cache_type).await {
            return Ok(value);
        }
        let value = loader().await?;
        if let Err(e) = self.set(key, &value, cache_type).await {
            warn!(key, cache_type, error = %e, "Loaded value not cached");
        }
        Ok(value)
    }

    /// Whether `key` is cached in either tier. Does not touch the stats.
    pub async fn exists(&self, key: &str, cache_type: &str) -> bool {
        if self.config.for_type(cache_type).enable_local_cache && self.local.contains(key) {
            return true;
        }
        self.l2_get(key).await.is_some()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Writes
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn set_raw(&self, key: &str, value: &[u8], cache_type: &str) -> Result<(), CacheError> {
        let type_config = self.config.for_type(cache_type);
        let strategy = type_config.strategy;
        let ttl = type_config.ttl();

        match strategy {
            CacheStrategy::WriteThrough => {
                if type_config.enable_local_cache {
                    self.local.insert(key, value);
                }
                self.l2_set(key, value, ttl).await?;
            }
            CacheStrategy::WriteBack => {
                if type_config.enable_local_cache {
                    self.local.insert(key, value);
                }
                self.schedule_write_back(key, value, ttl).await?;
            }
            CacheStrategy::CacheAside => {
                // An older L1 copy would shadow the new L2 value
                self.local.remove(key);
                self.l2_set(key, value, ttl).await?;
            }
        }

        self.counters.set();
        crate::metrics::record_cache_write("set", strategy.as_str());
        debug!(key, cache_type, strategy = %strategy, "Cache set");
        Ok(())
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, cache_type: &str) -> Result<(), CacheError> {
        let raw = serde_json::to_vec(value).map_err(|source| CacheError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.set_raw(key, &raw, cache_type).await
    }

    async fn schedule_write_back(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let write = PendingWrite::new(key.to_string(), value.to_vec(), ttl);
        let refused = match &self.write_back {
            Some(queue) => match queue.enqueue(write).await {
                Ok(()) => return Ok(()),
                Err(refused) => refused,
            },
            None => write,
        };
        debug!(key, "Write-back worker unavailable, writing L2 directly");
        self.l2_set(&refused.key, &refused.value, refused.ttl).await
    }

    /// Remove `key` from both tiers, dropping any queued write-back for it
    /// first. Returns whether L2 held it.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let keys = [key.to_string()];
        self.discard_write_backs(&keys).await;
        self.local.remove(key);
        let removed = self.l2_delete(&keys).await?;
        self.counters.delete(1);
        crate::metrics::record_cache_write("delete", "all");
        debug!(key, "Cache delete");
        Ok(removed > 0)
    }

    /// Remove several keys; returns how many L2 held.
    pub async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.discard_write_backs(keys).await;
        for key in keys {
            self.local.remove(key);
        }
        let removed = self.l2_delete(keys).await?;
        self.counters.delete(keys.len() as u64);
        crate::metrics::record_cache_write("delete", "all");
        Ok(removed)
    }

    async fn discard_write_backs(&self, keys: &[String]) {
        if let Some(queue) = &self.write_back {
            let dropped = queue.discard(keys).await;
            if dropped > 0 {
                debug!(dropped, "Pending write-backs dropped by delete");
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Invalidation
    // ═══════════════════════════════════════════════════════════════════════

    /// Clear all of L1 and delete every L2 key matching `pattern`. Pending
    /// write-backs are applied first so they cannot resurrect a deleted
    /// key. Returns the number of L2 keys removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        if let Some(queue) = &self.write_back {
            queue.flush().await;
        }
        let cleared = self.local.clear();

        let keys = match self.circuit.call(|| self.store.keys(pattern)).await {
            Ok(keys) => keys,
            Err(e) => {
                self.degraded("invalidate", pattern, &e);
                return 0;
            }
        };
        if keys.is_empty() {
            debug!(pattern, l1_cleared = cleared, "No L2 keys matched pattern");
            return 0;
        }

        let removed = match self.circuit.call(|| self.store.delete_many(&keys)).await {
            Ok(removed) => removed,
            Err(e) => {
                self.degraded("invalidate", pattern, &e);
                0
            }
        };
        crate::metrics::record_cache_invalidated(removed as usize);
        info!(pattern, matched = keys.len(), removed, l1_cleared = cleared, "Cache pattern invalidated");
        removed
    }

    /// Invalidate every pattern mapped to `event`, parameterized by ids in
    /// `payload`. Unknown events do nothing. Returns L2 keys removed.
    pub async fn invalidate_by_event(&self, event: &str, payload: &serde_json::Value) -> u64 {
        let patterns = patterns_for_event(event, payload);
        if patterns.is_empty() {
            debug!(event, "No invalidation rule for event");
            return 0;
        }

        let mut removed = 0;
        for pattern in &patterns {
            removed += self.invalidate_pattern(pattern).await;
        }
        info!(event, patterns = patterns.len(), removed, "Cache invalidated by event");
        removed
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Warm-up
    // ═══════════════════════════════════════════════════════════════════════

    /// Load every key that is not cached yet, `batch_size` loads at a time
    /// (config default when `None`), and cache the results. A failing load
    /// is logged and counted; it never stops the warm-up.
    pub async fn warm_up<T, E, F, Fut>(
        &self,
        loader: F,
        keys: &[String],
        cache_type: &str,
        batch_size: Option<usize>,
    ) -> WarmUpReport
    where
        T: Serialize,
        E: std::fmt::Display,
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut report = WarmUpReport {
            requested: keys.len(),
            ..WarmUpReport::default()
        };
        info!(cache_type, keys = keys.len(), "Cache warm-up started");

        let mut missing = Vec::new();
        for key in keys {
            if self.exists(key, cache_type).await {
                report.already_cached += 1;
            } else {
                missing.push(key.clone());
            }
        }

        let batch_size = batch_size.unwrap_or(self.config.warm_up_batch_size).max(1);
        for chunk in missing.chunks(batch_size) {
            let loads = chunk.iter().map(|key| {
                let load = loader(key.clone());
                async move { (key, load.await) }
            });
            for (key, result) in join_all(loads).await {
                match result {
                    Ok(value) => match self.set(key, &value, cache_type).await {
                        Ok(()) => report.loaded += 1,
                        Err(e) => {
                            warn!(key = %key, error = %e, "Warm-up value not cached");
                            report.failed += 1;
                        }
                    },
                    Err(e) => {
                        warn!(key = %key, error = %e, "Warm-up load failed");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            cache_type,
            loaded = report.loaded,
            already_cached = report.already_cached,
            failed = report.failed,
            "Cache warm-up finished"
        );
        report
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Stats and lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(
            self.local.len(),
            self.local.compression_ratio(),
            self.write_back.as_ref().map_or(0, WriteBackQueue::pending),
        )
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
        info!("Cache stats reset");
    }

    /// Drop every L1 entry; L2 is untouched.
    pub fn clear_local(&self) -> usize {
        self.local.clear()
    }

    /// Drop expired L1 entries now instead of on next read.
    pub fn purge_expired_local(&self) -> usize {
        self.local.purge_expired()
    }

    /// Wait for queued write-backs to reach L2.
    pub async fn flush(&self) {
        if let Some(queue) = &self.write_back {
            queue.flush().await;
        }
    }

    /// Apply queued write-backs and stop the worker.
    pub async fn shutdown(&self) {
        if let Some(queue) = &self.write_back {
            queue.shutdown().await;
        }
        info!("Cache manager shut down");
    }
}
