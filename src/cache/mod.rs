//! Two-tier cache for marketplace data.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  manager.rs      - CacheManager: read/write paths, warm-up   │
//! │  local.rs        - L1 tier (bounded, TTL, oldest eviction)   │
//! │  strategy.rs     - write strategies, scenario lookup         │
//! │  write_back.rs   - background L2 writer                      │
//! │  invalidation.rs - event -> key pattern table                │
//! │  compression.rs  - optional zstd for L1 payloads             │
//! │  stats.rs        - hit/miss counters                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod compression;
pub mod invalidation;
pub mod local;
pub mod manager;
pub mod stats;
pub mod strategy;
pub mod write_back;

pub use local::LocalCache;
pub use manager::{CacheError, CacheManager, WarmUpReport};
pub use stats::CacheStats;
pub use strategy::{cache_type_for_scenario, CacheStrategy};
pub use write_back::{FlushReason, WriteBackQueue};
