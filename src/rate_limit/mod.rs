//! Per-platform distributed rate limiting.

pub mod bucket;
pub mod registry;

pub use bucket::{Acquire, RateLimitError, RateLimitStatus, RateLimiter};
pub use registry::RateLimiterRegistry;
