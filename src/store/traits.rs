// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use crate::resilience::classify::{classify_message, Classify, ErrorKind};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (connection refused, dropped, timed out)
    #[error("shared store unavailable: {0}")]
    Unavailable(String),
    #[error("shared store backend error: {0}")]
    Backend(String),
    #[error("malformed value at '{key}': {reason}")]
    Malformed { key: String, reason: String },
}

impl Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(msg) => match classify_message(msg) {
                ErrorKind::Timeout => ErrorKind::Timeout,
                _ => ErrorKind::ConnectionError,
            },
            Self::Backend(msg) => classify_message(msg),
            Self::Malformed { .. } => ErrorKind::InvalidRequest,
        }
    }
}

/// Parameters of one token-bucket acquisition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketRequest {
    /// Tokens per second
    pub rate: f64,
    /// Capacity
    pub burst: f64,
    /// Tokens wanted
    pub tokens: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketOutcome {
    pub granted: bool,
    /// Tokens left after the call (after refill, after any deduction)
    pub remaining: f64,
    /// Suggested wait before the request could succeed; zero when granted
    pub wait: Duration,
}

/// Persisted bucket fields, `tokens` and `last_refill` (unix seconds).
///
/// This is the reference semantics of [`SharedStore::token_bucket_take`];
/// the Redis implementation runs the same arithmetic inside a Lua script.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill: f64,
}

impl BucketState {
    /// A missing bucket starts full.
    #[must_use]
    pub fn full(burst: f64, now: f64) -> Self {
        Self { tokens: burst, last_refill: now }
    }

    /// Refill in whole tokens, then try to take `req.tokens`.
    ///
    /// Only the time that produced whole tokens is consumed from the refill
    /// clock, so frequent callers do not lose fractional progress. A full
    /// bucket pins `last_refill` to `now`. A denied request writes nothing.
    #[must_use]
    pub fn take(self, req: BucketRequest, now: f64) -> (Option<BucketState>, BucketOutcome) {
        let elapsed = (now - self.last_refill).max(0.0);
        let refill = (elapsed * req.rate).floor();
        let current = (self.tokens + refill).min(req.burst).max(0.0);

        if current >= req.tokens {
            let tokens = current - req.tokens;
            let last_refill = if self.tokens + refill >= req.burst {
                now
            } else {
                self.last_refill + refill / req.rate
            };
            let state = BucketState { tokens, last_refill };
            (
                Some(state),
                BucketOutcome { granted: true, remaining: tokens, wait: Duration::ZERO },
            )
        } else {
            let wait = (req.tokens - current) / req.rate;
            (
                None,
                BucketOutcome {
                    granted: false,
                    remaining: current,
                    wait: Duration::from_secs_f64(wait.max(0.0)),
                },
            )
        }
    }
}

/// Expiry for a bucket key: a little longer than a full refill.
#[must_use]
pub fn bucket_expiry(req: &BucketRequest) -> Duration {
    Duration::from_secs((req.burst / req.rate).ceil() as u64 + 1)
}

/// The networked key-value store every coordination primitive is built on.
///
/// Any read-modify-write on shared state goes through one of the atomic
/// operations at the bottom of this trait; there is deliberately no
/// generic "get then set" helper.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// `SETEX`
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    /// `SET key value NX EX ttl`; true when the key was set.
    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, StoreError>;

    /// True when a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Number of keys removed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// True when the key exists and its expiry was set.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remaining lifetime; `None` for a missing key or one without expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Keys matching a glob pattern (`*`, `?`), without any store prefix.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>, StoreError>;

    /// `LPUSH` then `LTRIM 0 max_len-1`.
    async fn lpush_trim(&self, key: &str, value: &[u8], max_len: usize) -> Result<(), StoreError>;

    /// `LRANGE` with Redis index semantics (negative = from the end).
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Vec<u8>>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Atomically refill and consume from the hash bucket at `key`
    /// (fields `tokens`, `last_refill`). See [`BucketState::take`].
    async fn token_bucket_take(
        &self,
        key: &str,
        req: BucketRequest,
        now: f64,
    ) -> Result<BucketOutcome, StoreError>;

    /// Delete `key` only if it currently holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError>;

    /// Reset the expiry of `key` only if it currently holds `expected`.
    async fn compare_and_expire(&self, key: &str, expected: &[u8], ttl: Duration) -> Result<bool, StoreError>;
}
