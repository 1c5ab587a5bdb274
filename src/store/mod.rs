//! The shared key-value store behind every coordination primitive.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  traits.rs  - SharedStore trait, StoreError, bucket maths    │
//! │  redis.rs   - RedisStore (ConnectionManager + Lua scripts)   │
//! │  memory.rs  - MemoryStore (DashMap, lazy expiry)             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! This is the only source of cross-process state. Everything else in the
//! crate that is process-local (L1 cache, registries) must not be assumed
//! to be shared between instances.

#[cfg(test)]
pub(crate) mod faulty;
pub mod memory;
pub mod redis;
pub mod traits;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub use self::traits::{BucketOutcome, BucketRequest, BucketState, SharedStore, StoreError};
