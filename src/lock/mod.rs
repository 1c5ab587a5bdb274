//! Distributed locks with lease renewal.

pub mod factory;
pub mod lease;

pub use factory::LockFactory;
pub use lease::{DistributedLock, LockError, LockGuard, LockInfo};
