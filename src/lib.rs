// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Marketplace Sync
//!
//! Coordination layer for keeping products, inventory and orders in step
//! across several rate-limited e-commerce marketplaces.
//!
//! ## Architecture
//!
//! Several worker processes share one Redis instance. Every piece of
//! cross-process state (token buckets, lock leases, L2 cache entries, call
//! statistics) lives there; everything else is process-local.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SyncContext                         │
//! │  • owns one of each primitive, built from SyncConfig        │
//! │  • run_exclusive(job): lock or skip this cycle              │
//! │  • call_adapter: token → retry → monitor around one call    │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//! ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────┐
//! │  RateLimiter    │  │ DistributedLock │  │    CacheManager     │
//! │  token bucket   │  │ lease + renewal │  │ L1 memory → L2 store│
//! │  (fails open)   │  │ (fails closed)  │  │ (degrades to miss)  │
//! └─────────────────┘  └─────────────────┘  └─────────────────────┘
//!          │                    │                     │
//!          └────────────────────┼─────────────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                SharedStore (Redis / memory)                 │
//! │  • atomic token-bucket, compare-and-delete, compare-and-    │
//! │    expire scripts                                           │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │  BatchOperationOptimizer ──► PlatformAdapter (8 platforms)  │
//! │  chunk → native batch or per-item retry → invalidate cache  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use marketplace_sync::{
//!     AdapterConfig, AdapterFactory, InventoryUpdate, JobOutcome, Platform, SyncConfig, SyncContext,
//! };
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> marketplace_sync::Result<()> {
//!     let config = SyncConfig {
//!         redis_url: Some("redis://localhost:6379".into()),
//!         ..Default::default()
//!     };
//!     let ctx = SyncContext::connect(config).await?;
//!
//!     let adapter = AdapterFactory::create_shared(
//!         &AdapterConfig::new(Platform::Temu).with_app_credentials("key", "secret").with_access_token("token"),
//!     )?;
//!     let optimizer = ctx.optimizer(adapter);
//!
//!     let updates = vec![InventoryUpdate::new("SKU-1", 5), InventoryUpdate::new("SKU-2", 0)];
//!     let outcome = ctx
//!         .run_exclusive("inventory_sync:temu", Some(Duration::from_secs(5)), || {
//!             optimizer.batch_update_inventory(&updates, None)
//!         })
//!         .await?;
//!
//!     match outcome {
//!         JobOutcome::Completed(report) => println!("{} ok, {} failed", report.succeeded, report.failed),
//!         JobOutcome::Skipped => println!("another worker is syncing temu inventory"),
//!     }
//!
//!     ctx.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Failure policy
//!
//! - **Rate limiter**: a store outage grants the token (logged at `warn`)
//! - **Lock**: a store outage is an error; the job does not run
//! - **Cache**: a store outage reads as a miss; writes are logged
//! - **Monitor**: recording never fails the call being recorded
//!
//! ## Modules
//!
//! - [`context`]: [`SyncContext`] owning every primitive
//! - [`store`]: [`SharedStore`] trait, Redis and in-memory stores
//! - [`rate_limit`]: token-bucket [`RateLimiter`] and per-platform registry
//! - [`lock`]: [`DistributedLock`] leases with background renewal
//! - [`resilience`]: error classification, [`RetryManager`], circuit breaker
//! - [`cache`]: two-tier [`CacheManager`] with per-type strategies
//! - [`adapter`]: [`PlatformAdapter`] and the marketplace implementations
//! - [`batching`]: [`BatchOperationOptimizer`]
//! - [`monitor`]: per-endpoint [`ApiCallMonitor`] statistics
//! - [`config`]: [`SyncConfig`] and its tables

pub mod adapter;
pub mod batching;
pub mod blocking;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod monitor;
pub mod rate_limit;
pub mod resilience;
pub mod store;

pub use adapter::{
    AdapterConfig, AdapterError, AdapterFactory, BatchItemResult, BatchOperation, InventoryUpdate, MemoryAdapter,
    NormalizedOrder, NormalizedProduct, OrderFilter, OrderStatus, Platform, PlatformAdapter, ProductDraft,
    ProductFilter, ProductStatus, ProductUpdate,
};
pub use batching::{BatchOperationOptimizer, BatchReport, OrderSyncReport};
pub use cache::{CacheError, CacheManager, CacheStrategy};
pub use config::{ConfigError, SyncConfig};
pub use context::{JobOutcome, SyncContext};
pub use error::{CallError, Error, Result};
pub use lock::{DistributedLock, LockError, LockFactory};
pub use monitor::{Alert, ApiCallMonitor, ApiCallStats};
pub use rate_limit::{RateLimitError, RateLimiter, RateLimiterRegistry};
pub use resilience::{Classify, ErrorKind, RetryError, RetryManager, RetryPolicy};
pub use store::{MemoryStore, RedisStore, SharedStore, StoreError};
