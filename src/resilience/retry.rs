// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Classified retry with exponential backoff.
//!
//! A [`RetryPolicy`] decides *whether* a failure is worth another attempt
//! (by its [`ErrorKind`]) and *how long* to wait before it. A
//! [`RetryManager`] applies a shared policy to plain callables, in either
//! async or blocking form, with identical semantics.
//!
//! # Example
//!
//! ```
//! use marketplace_sync::resilience::{RetryPolicy, ErrorKind};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(60), false);
//! assert!(policy.should_retry(ErrorKind::Timeout, 0));
//! assert!(!policy.should_retry(ErrorKind::NotFound, 0));
//! assert!(!policy.should_retry(ErrorKind::Timeout, 3)); // cutoff
//! assert_eq!(policy.calculate_backoff(2), Duration::from_secs(4));
//! ```

use super::classify::{Classify, ErrorKind};
use crate::config::RetryPolicyConfig;
use rand::Rng;
use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Kinds retried by default.
pub const DEFAULT_RETRYABLE: [ErrorKind; 5] = [
    ErrorKind::Timeout,
    ErrorKind::ConnectionError,
    ErrorKind::NetworkUnreachable,
    ErrorKind::RateLimit,
    ErrorKind::ServerError5xx,
];

/// Kinds never retried by default.
pub const DEFAULT_NON_RETRYABLE: [ErrorKind; 4] = [
    ErrorKind::AuthenticationFailed,
    ErrorKind::PermissionDenied,
    ErrorKind::InvalidRequest,
    ErrorKind::NotFound,
];

/// Immutable retry policy. Share it behind an `Arc` or clone it per call site.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
    retryable: HashSet<ErrorKind>,
    non_retryable: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryPolicyConfig::default())
    }
}

impl RetryPolicy {
    /// Policy with the default retryable / non-retryable sets.
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration, jitter: bool) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter,
            retryable: DEFAULT_RETRYABLE.into_iter().collect(),
            non_retryable: DEFAULT_NON_RETRYABLE.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn from_config(config: &RetryPolicyConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs_f64(config.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs_f64(config.max_delay_secs.max(0.0)),
            jitter: config.jitter,
            retryable: config.retryable.iter().copied().collect(),
            non_retryable: config.non_retryable.iter().copied().collect(),
        }
    }

    /// Replace the retryable set. The deny-list still wins on overlap.
    #[must_use]
    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }

    /// Same policy with a different attempt budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Fast-fail policy for initial connections: 5 attempts, ~3s worst case.
    #[must_use]
    pub fn startup() -> Self {
        Self::new(4, Duration::from_millis(200), Duration::from_secs(2), false)
    }

    /// Minimal delays for tests.
    #[cfg(test)]
    pub fn test() -> Self {
        Self::new(3, Duration::from_millis(1), Duration::from_millis(10), false)
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    #[must_use]
    pub fn jitter_enabled(&self) -> bool {
        self.jitter
    }

    /// Whether `kind` is retryable at all, ignoring the attempt cutoff.
    #[must_use]
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        !self.non_retryable.contains(&kind) && self.retryable.contains(&kind)
    }

    /// Whether a failure of `kind` on attempt `attempt` (0-based) should be
    /// followed by another attempt.
    #[must_use]
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        attempt < self.max_retries && self.is_retryable(kind)
    }

    /// `min(base * 2^attempt, max)`, then uniformly jittered into
    /// `[0.5x, 1.5x]` when enabled. Never exceeds `max_delay`.
    #[must_use]
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exp = 2f64.powi(attempt.min(1023) as i32);
        let max = self.max_delay.as_secs_f64();
        let delay = (self.base_delay.as_secs_f64() * exp).min(max);

        let delay = if self.jitter && delay > 0.0 {
            let factor = rand::thread_rng().gen_range(0.5..=1.5);
            (delay * factor).clamp(0.0, max)
        } else {
            delay
        };

        Duration::from_secs_f64(delay)
    }
}

/// Failure returned once retrying stops.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The error's kind is not retryable; no further attempts were made.
    #[error("non-retryable {kind} error: {source}")]
    NonRetryable {
        kind: ErrorKind,
        #[source]
        source: E,
    },

    /// Every allowed attempt failed; `source` is the last error observed.
    #[error("retries exhausted after {attempts} attempts ({kind}): {source}")]
    Exhausted {
        attempts: u32,
        kind: ErrorKind,
        #[source]
        source: E,
    },
}

impl<E> RetryError<E> {
    /// The underlying error of the final attempt.
    pub fn into_inner(self) -> E {
        match self {
            Self::NonRetryable { source, .. } | Self::Exhausted { source, .. } => source,
        }
    }

    pub fn inner(&self) -> &E {
        match self {
            Self::NonRetryable { source, .. } | Self::Exhausted { source, .. } => source,
        }
    }

    #[must_use]
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::NonRetryable { kind, .. } | Self::Exhausted { kind, .. } => *kind,
        }
    }
}

impl<E> Classify for RetryError<E> {
    fn kind(&self) -> ErrorKind {
        self.error_kind()
    }
}

enum Next {
    Retry(Duration),
    Stop,
}

/// Applies a [`RetryPolicy`] to operations.
#[derive(Debug, Clone, Default)]
pub struct RetryManager {
    policy: Arc<RetryPolicy>,
}

impl RetryManager {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy: Arc::new(policy) }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        self.policy.should_retry(kind, attempt)
    }

    #[must_use]
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        self.policy.calculate_backoff(attempt)
    }

    fn next_step<E: Display>(&self, operation_name: &str, kind: ErrorKind, attempt: u32, err: &E) -> Next {
        crate::metrics::record_retry_attempt(operation_name, kind.as_str());

        if !self.policy.should_retry(kind, attempt) {
            return Next::Stop;
        }

        let delay = self.policy.calculate_backoff(attempt);
        warn!(
            operation = operation_name,
            attempt = attempt + 1,
            max_attempts = self.policy.max_retries + 1,
            kind = %kind,
            delay_ms = delay.as_millis() as u64,
            "Operation failed, retrying: {}",
            err
        );
        Next::Retry(delay)
    }

    fn give_up<E: Display>(&self, operation_name: &str, kind: ErrorKind, attempt: u32, err: E) -> RetryError<E> {
        if self.policy.is_retryable(kind) {
            error!(
                operation = operation_name,
                attempts = attempt + 1,
                kind = %kind,
                "Retries exhausted: {}",
                err
            );
            crate::metrics::record_retry_outcome(operation_name, "exhausted");
            RetryError::Exhausted { attempts: attempt + 1, kind, source: err }
        } else {
            debug!(operation = operation_name, kind = %kind, "Not retrying: {}", err);
            crate::metrics::record_retry_outcome(operation_name, "non_retryable");
            RetryError::NonRetryable { kind, source: err }
        }
    }

    fn succeeded(&self, operation_name: &str, attempt: u32) {
        if attempt > 0 {
            info!(operation = operation_name, retries = attempt, "Operation succeeded after retries");
            crate::metrics::record_retry_outcome(operation_name, "recovered");
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable kind,
    /// or `max_retries + 1` attempts have been made.
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => {
                    self.succeeded(operation_name, attempt);
                    return Ok(value);
                }
                Err(err) => {
                    let kind = err.kind();
                    match self.next_step(operation_name, kind, attempt, &err) {
                        Next::Retry(delay) => {
                            sleep(delay).await;
                            attempt += 1;
                        }
                        Next::Stop => return Err(self.give_up(operation_name, kind, attempt, err)),
                    }
                }
            }
        }
    }

    /// Blocking twin of [`execute_with_retry`](Self::execute_with_retry).
    /// Sleeps the calling thread between attempts; do not call it from an
    /// async task.
    pub fn execute_with_retry_blocking<F, T, E>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: Classify + Display,
    {
        let mut attempt = 0u32;
        loop {
            match operation() {
                Ok(value) => {
                    self.succeeded(operation_name, attempt);
                    return Ok(value);
                }
                Err(err) => {
                    let kind = err.kind();
                    match self.next_step(operation_name, kind, attempt, &err) {
                        Next::Retry(delay) => {
                            std::thread::sleep(delay);
                            attempt += 1;
                        }
                        Next::Stop => return Err(self.give_up(operation_name, kind, attempt, err)),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError(ErrorKind);

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error ({})", self.0)
        }
    }

    impl Classify for TestError {
        fn kind(&self) -> ErrorKind {
            self.0
        }
    }

    fn no_jitter(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_secs(1), Duration::from_secs(60), false)
    }

    #[test]
    fn test_backoff_without_jitter_is_exact() {
        let policy = no_jitter(10);
        assert_eq!(policy.calculate_backoff(0), Duration::from_secs(1));
        assert_eq!(policy.calculate_backoff(1), Duration::from_secs(2));
        assert_eq!(policy.calculate_backoff(2), Duration::from_secs(4));
        assert_eq!(policy.calculate_backoff(5), Duration::from_secs(32));
        assert_eq!(policy.calculate_backoff(6), Duration::from_secs(60));
        assert_eq!(policy.calculate_backoff(500), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_with_jitter_stays_in_band() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(60), true);
        for _ in 0..200 {
            let d = policy.calculate_backoff(2).as_secs_f64();
            assert!((2.0..=6.0).contains(&d), "jittered delay {d} out of band");
        }
        for _ in 0..200 {
            assert!(policy.calculate_backoff(10) <= Duration::from_secs(60));
        }
    }

    #[test]
    fn test_should_retry_per_kind() {
        let policy = no_jitter(3);
        for kind in DEFAULT_RETRYABLE {
            assert!(policy.should_retry(kind, 0), "{kind} should retry");
            assert!(policy.should_retry(kind, 2), "{kind} should retry");
            assert!(!policy.should_retry(kind, 3), "{kind} past cutoff");
        }
        for kind in DEFAULT_NON_RETRYABLE {
            assert!(!policy.should_retry(kind, 0), "{kind} must not retry");
        }
        assert!(!policy.should_retry(ErrorKind::Unknown, 0));
    }

    #[test]
    fn test_deny_list_wins_over_allow_list() {
        let policy = no_jitter(3).with_retryable([ErrorKind::NotFound, ErrorKind::Timeout]);
        assert!(!policy.should_retry(ErrorKind::NotFound, 0));
        assert!(policy.should_retry(ErrorKind::Timeout, 0));
        assert!(!policy.should_retry(ErrorKind::RateLimit, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_retried_four_attempts_with_1_2_4_sleeps() {
        let manager = RetryManager::new(no_jitter(3));
        let started = tokio::time::Instant::now();
        let stamps = parking_lot::Mutex::new(Vec::new());

        let result: Result<(), _> = manager
            .execute_with_retry("always_timeout", || {
                stamps.lock().push(started.elapsed());
                async { Err(TestError(ErrorKind::Timeout)) }
            })
            .await;

        let stamps = stamps.into_inner();
        assert_eq!(stamps.len(), 4);
        let gaps: Vec<u64> = stamps.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(gaps, vec![1, 2, 4]);

        match result {
            Err(RetryError::Exhausted { attempts, kind, .. }) => {
                assert_eq!(attempts, 4);
                assert_eq!(kind, ErrorKind::Timeout);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_propagates_immediately() {
        let manager = RetryManager::new(no_jitter(3));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = manager
            .execute_with_retry("auth", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError(ErrorKind::AuthenticationFailed)) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(RetryError::NonRetryable { kind: ErrorKind::AuthenticationFailed, .. })
        ));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let manager = RetryManager::new(RetryPolicy::test());
        let calls = AtomicU32::new(0);

        let result = manager
            .execute_with_retry("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError(ErrorKind::ServerError5xx))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_blocking_path_has_same_semantics() {
        let manager = RetryManager::new(RetryPolicy::test());
        let mut calls = 0;

        let result: Result<(), _> = manager.execute_with_retry_blocking("blocking", || {
            calls += 1;
            Err(TestError(ErrorKind::ConnectionError))
        });

        assert_eq!(calls, 4);
        let err = result.unwrap_err();
        assert_eq!(err.error_kind(), ErrorKind::ConnectionError);
        assert!(matches!(err.into_inner(), TestError(ErrorKind::ConnectionError)));
    }

    #[test]
    fn test_unknown_is_not_retried() {
        let manager = RetryManager::new(RetryPolicy::test());
        let mut calls = 0;
        let result: Result<(), _> = manager.execute_with_retry_blocking("unknown", || {
            calls += 1;
            Err(TestError(ErrorKind::Unknown))
        });
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(RetryError::NonRetryable { kind: ErrorKind::Unknown, .. })));
    }

    #[test]
    fn test_startup_preset() {
        let policy = RetryPolicy::startup();
        assert_eq!(policy.max_retries(), 4);
        assert!(!policy.jitter_enabled());
        assert!(policy.calculate_backoff(10) <= Duration::from_secs(2));
    }
}
