// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chunked bulk writes against one platform adapter.
//!
//! Input is split into fixed-size chunks which run concurrently (bounded by
//! `max_concurrent_batches`). Each chunk takes one rate-limit token and
//! tries the platform's native batch endpoint. A chunk whose native call
//! fails, or whose platform has no native endpoint, goes item by item; every
//! item then takes its own token per attempt and retries on its own, so one
//! bad item never fails its siblings.
//!
//! ```text
//!   items ──chunks(n)──► buffer_unordered(max_concurrent_batches)
//!                          │
//!            ┌─────────────┴──────────────┐
//!            ▼                            ▼
//!   native? ─yes─► token ─► batch call ──Err──► per-item (token + retry each)
//!            │                 │
//!            no ──────────────►┼──────────────► per-item
//!                              ▼
//!            reconcile by key ─► invalidate cache ─► BatchReport (input order)
//! ```
//!
//! Every input item appears exactly once in the report, in input order.

use crate::adapter::{
    AdapterError, BatchItemResult, BatchOperation, InventoryUpdate, NormalizedOrder, Platform, PlatformAdapter,
    ProductDraft, ProductUpdate,
};
use crate::cache::CacheManager;
use crate::config::BatchConfig;
use crate::error::CallError;
use crate::monitor::{self, ApiCallMonitor};
use crate::rate_limit::{RateLimitError, RateLimiter};
use crate::resilience::{RetryManager, RetryPolicy};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one optimizer call.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub operation: BatchOperation,
    pub platform: Platform,
    /// One entry per input item, in input order
    pub results: Vec<BatchItemResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl BatchReport {
    fn new(operation: BatchOperation, platform: Platform, results: Vec<BatchItemResult>, elapsed: Duration) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        Self { operation, platform, results, succeeded, failed, elapsed }
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchItemResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

/// Outcome of [`BatchOperationOptimizer::batch_sync_orders`].
#[derive(Debug, Clone)]
pub struct OrderSyncReport {
    pub platform: Platform,
    /// One entry per requested order id, in request order
    pub results: Vec<BatchItemResult>,
    pub orders: Vec<NormalizedOrder>,
    pub elapsed: Duration,
}

/// Per-operation glue between the generic chunk runner and the adapter.
#[async_trait]
trait BatchItem: Send + Sync + Sized {
    const OPERATION: BatchOperation;
    /// Monitor endpoint name for the single-item call
    const ITEM_ENDPOINT: &'static str;

    fn key(&self, position: usize) -> String;

    async fn send_native(adapter: &dyn PlatformAdapter, chunk: &[Self]) -> Result<Vec<BatchItemResult>, AdapterError>;

    async fn send_one(&self, key: &str, adapter: &dyn PlatformAdapter) -> Result<BatchItemResult, AdapterError>;

    /// Cache key made stale by a successful write.
    fn cache_key(&self, platform: Platform, result: &BatchItemResult) -> Option<String>;
}

fn product_cache_key(platform: Platform, id: &str) -> String {
    format!("product:{platform}:{id}")
}

fn inventory_cache_key(platform: Platform, sku: &str) -> String {
    format!("inventory:{platform}:{sku}")
}

#[async_trait]
impl BatchItem for ProductDraft {
    const OPERATION: BatchOperation = BatchOperation::ProductCreate;
    const ITEM_ENDPOINT: &'static str = "create_product";

    fn key(&self, position: usize) -> String {
        self.batch_key(position)
    }

    async fn send_native(adapter: &dyn PlatformAdapter, chunk: &[Self]) -> Result<Vec<BatchItemResult>, AdapterError> {
        adapter.batch_create_products(chunk).await
    }

    async fn send_one(&self, key: &str, adapter: &dyn PlatformAdapter) -> Result<BatchItemResult, AdapterError> {
        let product = adapter.create_product(self).await?;
        Ok(BatchItemResult::ok(key).with_product_id(product.id))
    }

    fn cache_key(&self, platform: Platform, result: &BatchItemResult) -> Option<String> {
        result.product_id.as_deref().map(|id| product_cache_key(platform, id))
    }
}

#[async_trait]
impl BatchItem for ProductUpdate {
    const OPERATION: BatchOperation = BatchOperation::ProductUpdate;
    const ITEM_ENDPOINT: &'static str = "update_product";

    fn key(&self, _position: usize) -> String {
        self.product_id.clone()
    }

    async fn send_native(adapter: &dyn PlatformAdapter, chunk: &[Self]) -> Result<Vec<BatchItemResult>, AdapterError> {
        adapter.batch_update_products(chunk).await
    }

    async fn send_one(&self, key: &str, adapter: &dyn PlatformAdapter) -> Result<BatchItemResult, AdapterError> {
        adapter.update_product(&self.product_id, &self.draft).await?;
        Ok(BatchItemResult::ok(key).with_product_id(self.product_id.clone()))
    }

    fn cache_key(&self, platform: Platform, _result: &BatchItemResult) -> Option<String> {
        Some(product_cache_key(platform, &self.product_id))
    }
}

#[async_trait]
impl BatchItem for InventoryUpdate {
    const OPERATION: BatchOperation = BatchOperation::InventoryUpdate;
    const ITEM_ENDPOINT: &'static str = "update_inventory";

    fn key(&self, _position: usize) -> String {
        self.sku.clone()
    }

    async fn send_native(adapter: &dyn PlatformAdapter, chunk: &[Self]) -> Result<Vec<BatchItemResult>, AdapterError> {
        adapter.batch_update_inventory(chunk).await
    }

    async fn send_one(&self, key: &str, adapter: &dyn PlatformAdapter) -> Result<BatchItemResult, AdapterError> {
        Ok(if adapter.update_inventory(&self.sku, self.quantity).await? {
            BatchItemResult::ok(key)
        } else {
            BatchItemResult::failed(key, "rejected by platform")
        })
    }

    fn cache_key(&self, platform: Platform, _result: &BatchItemResult) -> Option<String> {
        Some(inventory_cache_key(platform, &self.sku))
    }
}

/// Line `results` up with `keys`. Duplicate keys are matched in order;
/// keys the platform did not report on are marked failed.
fn reconcile(keys: &[String], results: Vec<BatchItemResult>) -> Vec<BatchItemResult> {
    let mut by_key: HashMap<String, VecDeque<BatchItemResult>> = HashMap::new();
    for result in results {
        by_key.entry(result.key.clone()).or_default().push_back(result);
    }
    keys.iter()
        .map(|key| {
            by_key
                .get_mut(key)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| BatchItemResult::failed(key.clone(), "missing from platform response"))
        })
        .collect()
}

/// Runs bulk writes for one adapter.
pub struct BatchOperationOptimizer {
    adapter: Arc<dyn PlatformAdapter>,
    limiter: Arc<RateLimiter>,
    retry: RetryManager,
    cache: Option<Arc<CacheManager>>,
    monitor: Option<ApiCallMonitor>,
    config: BatchConfig,
}

impl std::fmt::Debug for BatchOperationOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOperationOptimizer")
            .field("platform", &self.adapter.platform())
            .field("config", &self.config)
            .finish()
    }
}

impl BatchOperationOptimizer {
    /// `retry`'s backoff and classification are kept; its retry count is
    /// replaced with `config.max_retries_per_item`.
    pub fn new(
        adapter: Arc<dyn PlatformAdapter>,
        limiter: Arc<RateLimiter>,
        retry: &RetryPolicy,
        config: BatchConfig,
    ) -> Self {
        let policy = retry.clone().with_max_retries(config.max_retries_per_item);
        Self { adapter, limiter, retry: RetryManager::new(policy), cache: None, monitor: None, config }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_monitor(mut self, monitor: ApiCallMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    #[must_use]
    pub fn platform(&self) -> Platform {
        self.adapter.platform()
    }

    pub async fn batch_create_products(&self, drafts: &[ProductDraft], batch_size: Option<usize>) -> BatchReport {
        self.run(drafts, batch_size.unwrap_or(self.config.batch_sizes.product_create)).await
    }

    pub async fn batch_update_products(&self, updates: &[ProductUpdate], batch_size: Option<usize>) -> BatchReport {
        self.run(updates, batch_size.unwrap_or(self.config.batch_sizes.product_update)).await
    }

    pub async fn batch_update_inventory(&self, updates: &[InventoryUpdate], batch_size: Option<usize>) -> BatchReport {
        self.run(updates, batch_size.unwrap_or(self.config.batch_sizes.inventory_update)).await
    }

    /// Fetch `order_ids` in chunks; orders in a chunk are fetched
    /// concurrently, each with its own token and retries.
    pub async fn batch_sync_orders(&self, order_ids: &[String], batch_size: Option<usize>) -> OrderSyncReport {
        let started = Instant::now();
        let platform = self.platform();
        let size = batch_size.unwrap_or(self.config.batch_sizes.order_sync).max(1);

        let mut chunks: Vec<(usize, Vec<(BatchItemResult, Option<NormalizedOrder>)>)> =
            stream::iter(order_ids.chunks(size).enumerate())
                .map(|(index, chunk)| async move {
                    let fetched =
                        futures::future::join_all(chunk.iter().map(|order_id| self.fetch_order(order_id))).await;
                    (index, fetched)
                })
                .buffer_unordered(self.config.max_concurrent_batches.max(1))
                .collect()
                .await;
        chunks.sort_by_key(|(index, _)| *index);

        let mut results = Vec::with_capacity(order_ids.len());
        let mut orders = Vec::new();
        for (result, order) in chunks.into_iter().flat_map(|(_, fetched)| fetched) {
            results.push(result);
            orders.extend(order);
        }

        let elapsed = started.elapsed();
        info!(
            platform = %platform,
            requested = order_ids.len(),
            fetched = orders.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Order sync finished"
        );
        OrderSyncReport { platform, results, orders, elapsed }
    }

    async fn fetch_order(&self, order_id: &str) -> (BatchItemResult, Option<NormalizedOrder>) {
        let operation = format!("{}:get_order", self.platform());
        let outcome = self
            .retry
            .execute_with_retry(&operation, || async move {
                self.take_token().await?;
                self.observe("get_order", self.adapter.get_order(order_id)).await.map_err(CallError::from)
            })
            .await;
        match outcome {
            Ok(order) => (BatchItemResult::ok(order_id), Some(order)),
            Err(err) => (BatchItemResult::failed(order_id, err.into_inner().to_string()), None),
        }
    }

    async fn run<T: BatchItem>(&self, items: &[T], batch_size: usize) -> BatchReport {
        let started = Instant::now();
        let platform = self.platform();
        let operation = T::OPERATION;
        let size = batch_size.max(1);
        let native = self.adapter.supports_native_batch(operation);

        let keys: Vec<String> = items.iter().enumerate().map(|(i, item)| item.key(i)).collect();
        debug!(
            platform = %platform,
            operation = operation.as_str(),
            items = items.len(),
            batch_size = size,
            native,
            "Starting batch operation"
        );

        let mut chunks: Vec<(usize, Vec<BatchItemResult>)> =
            stream::iter(items.chunks(size).zip(keys.chunks(size)).enumerate())
                .map(|(index, (chunk, chunk_keys))| async move {
                    (index, self.process_chunk(chunk, chunk_keys, native).await)
                })
                .buffer_unordered(self.config.max_concurrent_batches.max(1))
                .collect()
                .await;
        chunks.sort_by_key(|(index, _)| *index);
        let results: Vec<BatchItemResult> = chunks.into_iter().flat_map(|(_, results)| results).collect();

        let report = BatchReport::new(operation, platform, results, started.elapsed());
        crate::metrics::record_batch_items(platform.as_str(), operation.as_str(), "success", report.succeeded);
        crate::metrics::record_batch_items(platform.as_str(), operation.as_str(), "failure", report.failed);
        crate::metrics::record_batch_duration(platform.as_str(), operation.as_str(), report.elapsed);
        info!(
            platform = %platform,
            operation = operation.as_str(),
            total = items.len(),
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Batch operation finished"
        );
        report
    }

    /// Results for `chunk`, one per item in chunk order.
    async fn process_chunk<T: BatchItem>(&self, chunk: &[T], keys: &[String], native: bool) -> Vec<BatchItemResult> {
        let platform = self.platform();
        let native_results = if native { self.send_native_chunk(chunk, keys).await } else { None };
        let results = match native_results {
            Some(results) => results,
            None => self.per_item(chunk, keys).await,
        };
        self.invalidate(platform, chunk, &results).await;
        results
    }

    /// `None` when the chunk must fall back to per-item calls.
    async fn send_native_chunk<T: BatchItem>(&self, chunk: &[T], keys: &[String]) -> Option<Vec<BatchItemResult>> {
        let platform = self.platform();
        let operation = T::OPERATION;
        if let Err(e) = self.take_token().await {
            warn!(platform = %platform, operation = operation.as_str(), error = %e, "No token for batch call, going per item");
            return None;
        }

        match self.observe(operation.endpoint(), T::send_native(self.adapter.as_ref(), chunk)).await {
            Ok(results) => {
                crate::metrics::record_batch_chunk(platform.as_str(), "native");
                Some(reconcile(keys, results))
            }
            Err(e) if e.is_unsupported() => {
                debug!(platform = %platform, operation = operation.as_str(), "Native batch unsupported, going per item");
                None
            }
            Err(e) => {
                warn!(
                    platform = %platform,
                    operation = operation.as_str(),
                    items = chunk.len(),
                    error = %e,
                    "Batch call failed, retrying items individually"
                );
                None
            }
        }
    }

    async fn per_item<T: BatchItem>(&self, chunk: &[T], keys: &[String]) -> Vec<BatchItemResult> {
        crate::metrics::record_batch_chunk(self.platform().as_str(), "per_item");
        let operation = format!("{}:{}", self.platform(), T::ITEM_ENDPOINT);
        let mut results = Vec::with_capacity(chunk.len());
        for (item, key) in chunk.iter().zip(keys) {
            let outcome = self
                .retry
                .execute_with_retry(&operation, || async move {
                    self.take_token().await?;
                    self.observe(T::ITEM_ENDPOINT, item.send_one(key, self.adapter.as_ref()))
                        .await
                        .map_err(CallError::from)
                })
                .await;
            results.push(match outcome {
                Ok(result) => result,
                Err(err) => BatchItemResult::failed(key.clone(), err.into_inner().to_string()),
            });
        }
        results
    }

    async fn take_token(&self) -> Result<(), RateLimitError> {
        self.limiter.acquire_or_timeout(1, self.config.token_timeout()).await
    }

    /// Run an adapter call, recording it with the monitor and metrics.
    async fn observe<T, F>(&self, endpoint: &str, call: F) -> Result<T, AdapterError>
    where
        F: Future<Output = Result<T, AdapterError>>,
    {
        monitor::observe_call(self.monitor.as_ref(), self.platform(), endpoint, call).await
    }

    async fn invalidate<T: BatchItem>(&self, platform: Platform, chunk: &[T], results: &[BatchItemResult]) {
        let Some(cache) = &self.cache else {
            return;
        };
        let stale: Vec<String> = chunk
            .iter()
            .zip(results)
            .filter(|(_, result)| result.success)
            .filter_map(|(item, result)| item.cache_key(platform, result))
            .collect();
        if stale.is_empty() {
            return;
        }
        if let Err(e) = cache.delete_many(&stale).await {
            warn!(platform = %platform, keys = stale.len(), error = %e, "Cache invalidation after batch failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{NormalizedProduct, OrderFilter, OrderStatus, ProductFilter, ProductStatus};
    use crate::config::{CacheConfig, MonitorConfig, RateLimitConfig};
    use crate::store::{MemoryStore, SharedStore};
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Adapter whose behaviour is scripted per test.
    #[derive(Default)]
    struct Scripted {
        native_inventory: bool,
        native_fails: bool,
        /// Keys that fail on every attempt
        bad: HashSet<String>,
        /// Keys that fail once with a retryable error
        flaky: Mutex<HashSet<String>>,
        /// Keys the native call leaves out of its response
        dropped: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn attempt(&self, key: &str) -> Result<(), AdapterError> {
            self.calls.lock().push(format!("item:{key}"));
            if self.bad.contains(key) {
                return Err(AdapterError::Api { code: "400".into(), message: "invalid sku".into() });
            }
            if self.flaky.lock().remove(key) {
                return Err(AdapterError::Timeout("read timed out".into()));
            }
            Ok(())
        }
    }

    fn product(id: &str) -> NormalizedProduct {
        NormalizedProduct {
            id: id.into(),
            sku: id.into(),
            name: id.into(),
            description: String::new(),
            price: 1.0,
            currency: "USD".into(),
            stock: 1,
            status: ProductStatus::OnSale,
            images: Vec::new(),
        }
    }

    #[async_trait]
    impl PlatformAdapter for Scripted {
        fn platform(&self) -> Platform {
            Platform::Temu
        }

        async fn test_connection(&self) -> bool {
            true
        }

        async fn get_orders(&self, _filter: &OrderFilter) -> Result<Vec<NormalizedOrder>, AdapterError> {
            Ok(Vec::new())
        }

        async fn get_order(&self, order_id: &str) -> Result<NormalizedOrder, AdapterError> {
            self.attempt(order_id)?;
            Ok(NormalizedOrder { order_id: order_id.into(), status: OrderStatus::Paid, ..NormalizedOrder::default() })
        }

        async fn update_order_status(&self, _: &str, _: OrderStatus, _: Option<&str>) -> Result<bool, AdapterError> {
            Ok(true)
        }

        async fn get_products(&self, _filter: &ProductFilter) -> Result<Vec<NormalizedProduct>, AdapterError> {
            Ok(Vec::new())
        }

        async fn get_product(&self, product_id: &str) -> Result<NormalizedProduct, AdapterError> {
            Ok(product(product_id))
        }

        async fn create_product(&self, draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
            let key = draft.batch_key(0);
            self.attempt(&key)?;
            Ok(product(&format!("P-{key}")))
        }

        async fn update_product(&self, product_id: &str, _draft: &ProductDraft) -> Result<NormalizedProduct, AdapterError> {
            self.attempt(product_id)?;
            Ok(product(product_id))
        }

        async fn delete_product(&self, _product_id: &str) -> Result<bool, AdapterError> {
            Ok(true)
        }

        async fn update_inventory(&self, sku: &str, _quantity: u32) -> Result<bool, AdapterError> {
            self.attempt(sku)?;
            Ok(true)
        }

        async fn batch_update_inventory(&self, updates: &[InventoryUpdate]) -> Result<Vec<BatchItemResult>, AdapterError> {
            if !self.native_inventory {
                return Err(AdapterError::unsupported(Platform::Temu, "batch_update_inventory"));
            }
            self.calls.lock().push(format!("native:{}", updates.len()));
            if self.native_fails {
                return Err(AdapterError::Http { status: 500, body: "internal".into() });
            }
            Ok(updates
                .iter()
                .filter(|u| !self.dropped.contains(&u.sku))
                .map(|u| BatchItemResult::ok(u.sku.clone()))
                .collect())
        }

        fn supports_native_batch(&self, operation: BatchOperation) -> bool {
            self.native_inventory && operation == BatchOperation::InventoryUpdate
        }
    }

    fn config() -> BatchConfig {
        BatchConfig { max_retries_per_item: 2, ..BatchConfig::default() }
    }

    fn optimizer(adapter: Scripted, store: Arc<MemoryStore>) -> (BatchOperationOptimizer, Arc<Scripted>) {
        let adapter = Arc::new(adapter);
        let limiter = Arc::new(RateLimiter::new("temu", RateLimitConfig::new(1000.0, 1000), store));
        let optimizer = BatchOperationOptimizer::new(adapter.clone(), limiter, &RetryPolicy::test(), config());
        (optimizer, adapter)
    }

    fn inventory(skus: &[&str]) -> Vec<InventoryUpdate> {
        skus.iter().map(|sku| InventoryUpdate::new(*sku, 5)).collect()
    }

    #[test]
    fn test_reconcile_matches_duplicates_in_order_and_fills_gaps() {
        let keys: Vec<String> = ["a", "b", "a", "c"].iter().map(|k| k.to_string()).collect();
        let results = vec![
            BatchItemResult::ok("a").with_product_id("1"),
            BatchItemResult::failed("a", "dup"),
            BatchItemResult::ok("b"),
            BatchItemResult::ok("zzz"),
        ];
        let reconciled = reconcile(&keys, results);
        assert_eq!(reconciled.len(), 4);
        assert_eq!(reconciled[0].product_id.as_deref(), Some("1"));
        assert!(!reconciled[2].success);
        assert_eq!(reconciled[3].key, "c");
        assert_eq!(reconciled[3].error.as_deref(), Some("missing from platform response"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_chunks_one_call_per_chunk() {
        let store = Arc::new(MemoryStore::new());
        let (optimizer, adapter) = optimizer(Scripted { native_inventory: true, ..Scripted::default() }, store);

        let report = optimizer.batch_update_inventory(&inventory(&["a", "b", "c", "d", "e"]), Some(2)).await;
        assert_eq!(report.results.len(), 5);
        assert!(report.all_succeeded());
        let mut calls = adapter.calls();
        calls.sort();
        assert_eq!(calls, vec!["native:1", "native:2", "native:2"]);
        let keys: Vec<&str> = report.results.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_native_chunk_degrades_to_per_item() {
        let store = Arc::new(MemoryStore::new());
        let scripted = Scripted {
            native_inventory: true,
            native_fails: true,
            bad: HashSet::from(["b".to_string()]),
            ..Scripted::default()
        };
        let (optimizer, adapter) = optimizer(scripted, store);

        let report = optimizer.batch_update_inventory(&inventory(&["a", "b", "c"]), None).await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.results[1].key, "b");
        assert!(report.results[1].error.as_deref().unwrap().contains("invalid sku"));
        // the Api 400 error is not retried
        assert_eq!(adapter.calls().iter().filter(|c| *c == "item:b").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_native_goes_per_item_from_start() {
        let store = Arc::new(MemoryStore::new());
        let (optimizer, adapter) = optimizer(Scripted::default(), store);

        let report = optimizer.batch_update_inventory(&inventory(&["a", "b"]), None).await;
        assert!(report.all_succeeded());
        assert!(adapter.calls().iter().all(|c| c.starts_with("item:")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_item_is_retried_alone() {
        let store = Arc::new(MemoryStore::new());
        let scripted = Scripted { flaky: Mutex::new(HashSet::from(["b".to_string()])), ..Scripted::default() };
        let (optimizer, adapter) = optimizer(scripted, store);

        let report = optimizer.batch_update_inventory(&inventory(&["a", "b", "c"]), None).await;
        assert!(report.all_succeeded());
        let calls = adapter.calls();
        assert_eq!(calls.iter().filter(|c| *c == "item:b").count(), 2);
        assert_eq!(calls.iter().filter(|c| *c == "item:a").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_native_result_marked_failed() {
        let store = Arc::new(MemoryStore::new());
        let scripted = Scripted {
            native_inventory: true,
            dropped: HashSet::from(["b".to_string()]),
            ..Scripted::default()
        };
        let (optimizer, _) = optimizer(scripted, store);

        let report = optimizer.batch_update_inventory(&inventory(&["a", "b"]), None).await;
        assert_eq!(report.results.len(), 2);
        assert!(!report.results[1].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_results_carry_product_ids_and_invalidate_cache() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheManager::new(store.clone(), CacheConfig::default()));
        cache.set("product:temu:P-x", &"stale", "product_info").await.unwrap();
        cache.set("product:temu:P-y", &"kept", "product_info").await.unwrap();

        let scripted = Scripted { bad: HashSet::from(["y".to_string()]), ..Scripted::default() };
        let (optimizer, _) = optimizer(scripted, store.clone());
        let optimizer = optimizer.with_cache(cache.clone());

        let drafts = vec![ProductDraft::named("x").with_sku("x"), ProductDraft::named("y").with_sku("y")];
        let report = optimizer.batch_create_products(&drafts, None).await;
        assert_eq!(report.results[0].product_id.as_deref(), Some("P-x"));
        assert!(cache.get::<String>("product:temu:P-x", "product_info").await.is_none());
        assert_eq!(cache.get::<String>("product:temu:P-y", "product_info").await.as_deref(), Some("kept"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_records_each_call() {
        let store = Arc::new(MemoryStore::new());
        let monitor = ApiCallMonitor::new(store.clone(), MonitorConfig::default());
        let (optimizer, _) = optimizer(Scripted::default(), store);
        let optimizer = optimizer.with_monitor(monitor.clone());

        optimizer.batch_update_inventory(&inventory(&["a", "b", "c"]), None).await;
        let stats = monitor.metrics("temu", Some("update_inventory"), 1).await.unwrap();
        assert_eq!(stats.count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_sync_keeps_request_order() {
        let store = Arc::new(MemoryStore::new());
        let scripted = Scripted { bad: HashSet::from(["o3".to_string()]), ..Scripted::default() };
        let (optimizer, _) = optimizer(scripted, store);

        let ids: Vec<String> = (1..=5).map(|i| format!("o{i}")).collect();
        let report = optimizer.batch_sync_orders(&ids, Some(2)).await;
        let keys: Vec<&str> = report.results.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["o1", "o2", "o3", "o4", "o5"]);
        assert!(!report.results[2].success);
        assert_eq!(report.orders.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_input() {
        let store = Arc::new(MemoryStore::new());
        let (optimizer, adapter) = optimizer(Scripted::default(), store);
        let report = optimizer.batch_update_products(&[], None).await;
        assert!(report.results.is_empty());
        assert!(adapter.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_items_fail_individually() {
        let store = Arc::new(MemoryStore::new());
        let adapter = Arc::new(Scripted::default());
        let limiter = Arc::new(RateLimiter::new("temu", RateLimitConfig::new(0.001, 1), store.clone()));
        let config = BatchConfig { max_retries_per_item: 0, token_timeout_secs: 1, ..BatchConfig::default() };
        let optimizer = BatchOperationOptimizer::new(adapter.clone(), limiter, &RetryPolicy::test(), config);

        let report = optimizer.batch_update_inventory(&inventory(&["a", "b"]), None).await;
        assert_eq!(report.results.len(), 2);
        assert!(report.results[0].success);
        assert!(!report.results[1].success);
        assert!(store.keys("*").await.unwrap().iter().any(|k| k.contains("temu")));
    }
}
