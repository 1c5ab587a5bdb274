//! Failure handling shared by every primitive.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Resilience Module                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  classify.rs        - ErrorKind taxonomy + Classify trait    │
//! │  retry.rs           - RetryPolicy / RetryManager             │
//! │  circuit_breaker.rs - recloser wrapper for store calls       │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod circuit_breaker;
pub mod classify;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, CircuitState};
pub use classify::{classify_message, classify_status, Classify, ErrorKind};
pub use retry::{RetryError, RetryManager, RetryPolicy, DEFAULT_NON_RETRYABLE, DEFAULT_RETRYABLE};
