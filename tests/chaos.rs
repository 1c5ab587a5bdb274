// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chaos tests for the coordination layer.
//!
//! The shared store is wrapped in a hand-written [`FailingStore`] that
//! injects outages on demand, to check each primitive's failure policy:
//!
//! - rate limiter: fails **open** (the call goes ahead)
//! - lock: fails **closed** (the job does not run)
//! - cache: degrades to a **miss**
//! - monitor: never fails the call being recorded
//!
//! and that one bad item in a batch never fails its siblings.
//!
//! # Running
//! ```bash
//! cargo test --test chaos
//! ```

use async_trait::async_trait;
use marketplace_sync::config::{BatchConfig, LockConfig, RateLimitConfig, RetryPolicyConfig};
use marketplace_sync::store::{BucketOutcome, BucketRequest};
use marketplace_sync::{
    BatchOperationOptimizer, CacheManager, DistributedLock, InventoryUpdate, JobOutcome, LockError, MemoryAdapter,
    MemoryStore, NormalizedOrder, NormalizedProduct, Platform, PlatformAdapter, ProductDraft, ProductStatus,
    RateLimiter, RetryPolicy, SharedStore, StoreError, SyncConfig, SyncContext,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Failing Store Wrapper
// =============================================================================

/// Wraps a [`MemoryStore`]; while `down`, every call fails as an
/// unreachable store.
#[derive(Default)]
struct FailingStore {
    inner: MemoryStore,
    down: AtomicBool,
    calls: AtomicU64,
}

impl FailingStore {
    fn healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn down() -> Arc<Self> {
        let store = Self::healthy();
        store.set_down(true);
        store
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set_ex(key, value, ttl).await
    }

    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.set_nx_ex(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.check()?;
        self.inner.ttl(key).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        self.inner.keys(pattern).await
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        self.check()?;
        self.inner.hincr_by(key, field, delta).await
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        self.check()?;
        self.inner.hmget(key, fields).await
    }

    async fn lpush_trim(&self, key: &str, value: &[u8], max_len: usize) -> Result<(), StoreError> {
        self.check()?;
        self.inner.lpush_trim(key, value, max_len).await
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Vec<u8>>, StoreError> {
        self.check()?;
        self.inner.lrange(key, start, stop).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()?;
        self.inner.ping().await
    }

    async fn token_bucket_take(&self, key: &str, req: BucketRequest, now: f64) -> Result<BucketOutcome, StoreError> {
        self.check()?;
        self.inner.token_bucket_take(key, req, now).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.compare_and_delete(key, expected).await
    }

    async fn compare_and_expire(&self, key: &str, expected: &[u8], ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.compare_and_expire(key, expected, ttl).await
    }
}

fn fast_retry() -> RetryPolicyConfig {
    RetryPolicyConfig {
        max_retries: 2,
        base_delay_secs: 0.001,
        max_delay_secs: 0.01,
        jitter: false,
        ..RetryPolicyConfig::default()
    }
}

fn config() -> SyncConfig {
    SyncConfig { retry: fast_retry(), ..SyncConfig::default() }
}

fn product(sku: &str) -> NormalizedProduct {
    NormalizedProduct {
        id: format!("P-{sku}"),
        sku: sku.into(),
        name: sku.into(),
        description: String::new(),
        price: 10.0,
        currency: "USD".into(),
        stock: 1,
        status: ProductStatus::OnSale,
        images: Vec::new(),
    }
}

// =============================================================================
// Failure policy asymmetry
// =============================================================================

#[tokio::test]
async fn chaos_rate_limiter_fails_open() {
    let store = FailingStore::down();
    let limiter = RateLimiter::new("amazon", RateLimitConfig::new(1.0, 1), store.clone());

    // far more than the bucket holds, all granted while the store is gone
    for _ in 0..10 {
        assert!(limiter.acquire(1, None).await);
    }
    assert!(limiter.acquire_or_timeout(1, Duration::from_millis(10)).await.is_ok());
    assert!(limiter.status().await.is_err());
    assert!(store.calls() >= 11);
}

#[tokio::test]
async fn chaos_rate_limiter_enforces_again_after_recovery() {
    let store = FailingStore::down();
    let limiter = RateLimiter::new("aliexpress", RateLimitConfig::new(0.01, 2), store.clone());
    assert!(limiter.acquire(1, None).await);

    store.set_down(false);
    assert!(limiter.acquire(1, None).await);
    assert!(limiter.acquire(1, None).await);
    assert!(!limiter.acquire(1, None).await);
}

#[tokio::test]
async fn chaos_lock_fails_closed() {
    let store = FailingStore::down();
    let lock = DistributedLock::new("inventory_sync", store, &LockConfig::default());

    let err = lock.acquire(Some(Duration::from_millis(20))).await.unwrap_err();
    assert!(matches!(err, LockError::Store(StoreError::Unavailable(_))));
    assert!(!lock.is_held());

    let ran = AtomicBool::new(false);
    let flag = &ran;
    let result = lock.with_lock(None, move || async move { flag.store(true, Ordering::SeqCst) }).await;
    assert!(result.is_err());
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn chaos_lock_outage_mid_hold_keeps_other_holders_out() {
    let store = FailingStore::healthy();
    let config = LockConfig { auto_renewal: false, ..LockConfig::default() };
    let first = DistributedLock::new("order_sync", store.clone(), &config);
    let second = DistributedLock::new("order_sync", store.clone(), &config);

    assert!(first.acquire(None).await.unwrap());
    store.set_down(true);
    assert!(second.acquire(Some(Duration::from_millis(20))).await.is_err());

    store.set_down(false);
    assert!(!second.acquire(Some(Duration::ZERO)).await.unwrap());
    assert!(first.release().await.unwrap());
    assert!(second.acquire(None).await.unwrap());
}

#[tokio::test]
async fn chaos_cache_degrades_to_miss() {
    let store = FailingStore::down();
    let cache = CacheManager::new(store, SyncConfig::default().cache);

    // order_list skips L1, so every read has to reach the dead store
    cache.set("order:lazada:1", &"pending", "order_list").await.unwrap();
    let hit: Option<String> = cache.get("order:lazada:1", "order_list").await;
    assert_eq!(hit, None);
    assert!(!cache.exists("order:lazada:1", "order_list").await);
    assert!(cache.stats().misses >= 1);
}

#[tokio::test]
async fn chaos_cache_l1_serves_during_outage() {
    let store = FailingStore::healthy();
    let cache = CacheManager::new(store.clone(), SyncConfig::default().cache);

    cache.set("product:tiktok:42", &"mug", "product_info").await.unwrap();
    store.set_down(true);
    let hit: Option<String> = cache.get("product:tiktok:42", "product_info").await;
    assert_eq!(hit.as_deref(), Some("mug"));
}

#[tokio::test]
async fn chaos_adapter_calls_survive_full_store_outage() {
    let store = FailingStore::down();
    let ctx = SyncContext::with_store(store, config());
    let adapter = MemoryAdapter::new(Platform::Wish);
    adapter.insert_order(NormalizedOrder { order_id: "W1".into(), ..NormalizedOrder::default() });

    let order = ctx.call_adapter(Platform::Wish, "get_order", || adapter.get_order("W1")).await.unwrap();
    assert_eq!(order.order_id, "W1");
    assert!(ctx.monitor().metrics("wish", Some("get_order"), 1).await.is_err());
}

#[tokio::test]
async fn chaos_exclusive_job_does_not_run_without_store() {
    let ctx = SyncContext::with_store(FailingStore::down(), config());
    let ran = AtomicBool::new(false);
    let flag = &ran;
    let result = ctx
        .run_exclusive("product_sync:temu", Some(Duration::from_millis(20)), move || async move {
            flag.store(true, Ordering::SeqCst);
        })
        .await;
    assert!(matches!(result, Err(LockError::Store(_))));
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn chaos_exclusive_job_is_skipped_not_failed_when_held() {
    let store = FailingStore::healthy();
    let worker_a = SyncContext::with_store(store.clone(), config());
    let worker_b = SyncContext::with_store(store, config());

    let held = worker_a.lock("order_sync:jumia");
    assert!(held.acquire(None).await.unwrap());

    let outcome = worker_b
        .run_exclusive("order_sync:jumia", Some(Duration::from_millis(30)), || async { "ran" })
        .await
        .unwrap();
    assert_eq!(outcome, JobOutcome::Skipped);
}

// =============================================================================
// Per-item batch isolation
// =============================================================================

fn optimizer(adapter: Arc<MemoryAdapter>, store: Arc<FailingStore>) -> BatchOperationOptimizer {
    let limiter = Arc::new(RateLimiter::new("lazada", RateLimitConfig::new(1000.0, 1000), store));
    let policy = RetryPolicy::from_config(&fast_retry());
    BatchOperationOptimizer::new(adapter, limiter, &policy, BatchConfig { max_retries_per_item: 2, ..BatchConfig::default() })
}

#[tokio::test]
async fn chaos_bad_item_does_not_fail_siblings() {
    let adapter = Arc::new(MemoryAdapter::new(Platform::Lazada));
    for sku in ["A", "B", "C", "D"] {
        adapter.insert_product(product(sku));
    }
    adapter.fail_always("B");
    adapter.fail_times("C", 1);

    let updates: Vec<InventoryUpdate> = ["A", "B", "C", "D"].iter().map(|s| InventoryUpdate::new(*s, 9)).collect();
    let report = optimizer(adapter.clone(), FailingStore::healthy()).batch_update_inventory(&updates, Some(2)).await;

    let keys: Vec<&str> = report.results.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["A", "B", "C", "D"]);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 1);
    assert!(!report.results[1].success);
    assert_eq!(adapter.stock("A"), Some(9));
    assert_eq!(adapter.stock("C"), Some(9));
    assert_eq!(adapter.stock("B"), Some(1));
}

#[tokio::test]
async fn chaos_native_batch_outage_degrades_to_per_item() {
    let adapter = Arc::new(MemoryAdapter::new(Platform::TikTok).with_native_batch(true));
    adapter.set_online(false);

    let drafts = vec![ProductDraft::named("Mug").with_sku("MUG"), ProductDraft::named("Cup").with_sku("CUP")];
    let report = optimizer(adapter.clone(), FailingStore::healthy()).batch_create_products(&drafts, None).await;

    // one native attempt, then every item tries 1 + 2 retries
    assert_eq!(report.failed, 2);
    assert_eq!(adapter.calls(), 1 + 2 * 3);
    assert!(report.results.iter().all(|r| r.error.as_deref().is_some_and(|e| e.contains("unreachable"))));
}

#[tokio::test]
async fn chaos_batch_runs_with_rate_limit_store_down() {
    let adapter = Arc::new(MemoryAdapter::new(Platform::Lazada));
    adapter.insert_product(product("A"));
    let report = optimizer(adapter.clone(), FailingStore::down())
        .batch_update_inventory(&[InventoryUpdate::new("A", 3)], None)
        .await;
    assert!(report.all_succeeded());
    assert_eq!(adapter.stock("A"), Some(3));
}

#[tokio::test]
async fn chaos_adapter_failure_is_not_cached() {
    let store = FailingStore::healthy();
    let ctx = SyncContext::with_store(store, config());
    let adapter = Arc::new(MemoryAdapter::new(Platform::Temu));
    adapter.insert_product(product("X"));
    ctx.cache().set("product:temu:P-X", &product("X"), "product_info").await.unwrap();

    adapter.fail_always("P-X");
    let report = ctx
        .optimizer(adapter.clone())
        .batch_update_products(
            &[marketplace_sync::ProductUpdate { product_id: "P-X".into(), draft: ProductDraft::named("renamed") }],
            None,
        )
        .await;
    assert_eq!(report.failed, 1);

    // a failed write leaves the cached copy alone
    let cached: Option<NormalizedProduct> = ctx.cache().get("product:temu:P-X", "product_info").await;
    assert_eq!(cached.map(|p| p.name), Some("X".to_string()));
    assert_eq!(adapter.platform(), Platform::Temu);
}
