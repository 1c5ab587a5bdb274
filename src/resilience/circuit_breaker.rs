// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Guard in front of the shared store, used by the cache's L2 tier.
//!
//! ```text
//!   closed ──(store keeps failing)──▶ open ──(recovery_timeout)──▶ trial
//!     ▲                                 ▲                            │
//!     └────────(trial call succeeds)────┼────────────────────────────┘
//!                                       └──(trial call fails)
//! ```
//!
//! While open, L2 calls are refused without touching the network, so a
//! dead Redis costs the caller a miss instead of a connect timeout per
//! lookup. Trip and recovery decisions come from `recloser`; this wrapper
//! only mirrors them into logs, counters and a state gauge.

use recloser::{AsyncRecloser, Error as RecloserError, Recloser};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Store calls go through.
    Closed = 0,
    /// The last trial call after an open period failed.
    HalfOpen = 1,
    /// Store calls are refused locally.
    Open = 2,
}

impl CircuitState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::HalfOpen,
            2 => Self::Open,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::HalfOpen => "half_open",
            Self::Open => "open",
        })
    }
}

/// Outcome of a guarded store call that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// Refused locally; the store was not contacted.
    #[error("shared store bypassed while circuit is open")]
    Rejected,

    #[error("shared store call failed: {0}")]
    Inner(#[source] E),
}

impl<E> From<RecloserError<E>> for CircuitError<E> {
    fn from(err: RecloserError<E>) -> Self {
        match err {
            RecloserError::Rejected => Self::Rejected,
            RecloserError::Inner(e) => Self::Inner(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Size of the closed-state window; half of it failing trips the breaker
    pub failure_threshold: u32,
    /// Trial calls let through once the recovery timeout passes
    pub success_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitConfig {
    /// Settings for the L2 tier. A bypassed L2 only costs misses, so the
    /// window is wide and one good trial call is enough to resume.
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            failure_threshold: 10,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(15),
        }
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            success_threshold: 1,
            recovery_timeout: Duration::from_millis(50),
        }
    }
}

/// Snapshot of a breaker's call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitCounts {
    pub passed: u64,
    pub failed: u64,
    pub rejected: u64,
}

impl CircuitCounts {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.passed + self.failed + self.rejected
    }

    /// Share of calls that reached the store and failed there.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.failed as f64 / total as f64,
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    inner: AsyncRecloser,
    state: AtomicU8,
    passed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("counts", &self.counts())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let inner = Recloser::custom()
            .error_rate(0.5)
            .closed_len(config.failure_threshold.max(1) as usize)
            .half_open_len(config.success_threshold.max(1) as usize)
            .open_wait(config.recovery_timeout)
            .build()
            .into();
        let name = name.into();
        crate::metrics::set_circuit_state(&name, CircuitState::Closed as u8);

        Self {
            name,
            inner,
            state: AtomicU8::new(CircuitState::Closed as u8),
            passed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inferred from call outcomes, since recloser does not expose its own.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn counts(&self) -> CircuitCounts {
        CircuitCounts {
            passed: self.passed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Failed store calls so far.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Runs `f` unless the circuit is open.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.inner.call(f()).await {
            Ok(value) => {
                self.passed.fetch_add(1, Ordering::Relaxed);
                self.transition(CircuitState::Closed);
                crate::metrics::record_circuit_breaker_call(&self.name, "success");
                Ok(value)
            }
            Err(RecloserError::Rejected) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                self.transition(CircuitState::Open);
                crate::metrics::record_circuit_breaker_call(&self.name, "rejected");
                Err(CircuitError::Rejected)
            }
            Err(RecloserError::Inner(e)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                // only a trial call can fail while we believe the circuit open
                if self.state() == CircuitState::Open {
                    self.transition(CircuitState::HalfOpen);
                }
                crate::metrics::record_circuit_breaker_call(&self.name, "failure");
                Err(CircuitError::Inner(e))
            }
        }
    }

    fn transition(&self, to: CircuitState) {
        let from = CircuitState::from_u8(self.state.swap(to as u8, Ordering::Relaxed));
        if from == to {
            return;
        }
        crate::metrics::set_circuit_state(&self.name, to as u8);
        match to {
            CircuitState::Open => warn!(circuit = %self.name, %from, "Shared store failing, bypassing it"),
            CircuitState::HalfOpen => debug!(circuit = %self.name, "Trial call to shared store failed"),
            CircuitState::Closed => info!(circuit = %self.name, %from, "Shared store answering again"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    fn down() -> StoreError {
        StoreError::Unavailable("connection refused".into())
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), CircuitError<StoreError>> {
        cb.call(|| async { Err::<(), _>(down()) }).await
    }

    #[tokio::test]
    async fn test_store_value_passes_through_closed_circuit() {
        let cb = CircuitBreaker::new("cache_l2", CircuitConfig::test());

        let value = cb.call(|| async { Ok::<_, StoreError>(Some("cached".to_string())) }).await;

        assert_eq!(value.unwrap().as_deref(), Some("cached"));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts(), CircuitCounts { passed: 1, failed: 0, rejected: 0 });
    }

    #[tokio::test]
    async fn test_store_error_is_returned_unchanged() {
        let cb = CircuitBreaker::new("cache_l2", CircuitConfig::test());

        let err = fail(&cb).await.unwrap_err();

        assert!(matches!(err, CircuitError::Inner(StoreError::Unavailable(_))));
        assert!(err.to_string().ends_with("connection refused"));
        assert_eq!(cb.failures(), 1);
    }

    #[tokio::test]
    async fn test_failing_store_is_bypassed() {
        let config = CircuitConfig { recovery_timeout: Duration::from_secs(60), ..CircuitConfig::test() };
        let cb = CircuitBreaker::new("cache_l2", config);

        for _ in 0..4 {
            let _ = fail(&cb).await;
        }
        let polled = std::sync::atomic::AtomicBool::new(false);
        let result = cb
            .call(|| async {
                polled.store(true, Ordering::Relaxed);
                Ok::<_, StoreError>(())
            })
            .await;

        assert!(!polled.load(Ordering::Relaxed));
        assert!(matches!(result, Err(CircuitError::Rejected)));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.counts().rejected >= 1);
    }

    #[tokio::test]
    async fn test_recovered_store_closes_circuit() {
        let cb = CircuitBreaker::new("cache_l2", CircuitConfig::test());
        for _ in 0..4 {
            let _ = fail(&cb).await;
        }
        assert!(matches!(fail(&cb).await, Err(CircuitError::Rejected)));

        tokio::time::sleep(Duration::from_millis(80)).await;
        let value = cb.call(|| async { Ok::<_, StoreError>(7) }).await;

        assert_eq!(value.unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_failure_rate_counts_only_store_failures() {
        let counts = CircuitCounts { passed: 2, failed: 1, rejected: 1 };
        assert_eq!(counts.total(), 4);
        assert!((counts.failure_rate() - 0.25).abs() < f64::EPSILON);
        assert!(CircuitCounts::default().failure_rate().abs() < f64::EPSILON);
    }
}
