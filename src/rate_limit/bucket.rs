// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Distributed token bucket, one per platform.
//!
//! The bucket lives in the shared store as a hash
//! (`rate_limiter:{platform}:bucket`, fields `tokens` / `last_refill`) and is
//! refilled and consumed in one atomic store operation, so every process
//! sharing the store draws from the same quota.
//!
//! Waiters poll; there is no queue and no fairness between them. Under
//! contention a later caller can take tokens an earlier one was waiting
//! for, and a caller can starve if the platform stays saturated.
//!
//! When the store is unreachable the limiter **fails open**: the request
//! is granted and a warning logged. Losing the limiter must not stop all
//! marketplace traffic.

use crate::blocking;
use crate::config::RateLimitConfig;
use crate::store::{BucketRequest, SharedStore, StoreError};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Floor on the polling sleep so a tiny suggested wait cannot spin.
const MIN_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit for '{platform}' not acquired within {waited:?}")]
    Timeout { platform: String, waited: Duration },
    #[error("invalid rate limit config for '{platform}': {reason}")]
    InvalidConfig { platform: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a single non-blocking attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Acquire {
    pub granted: bool,
    /// Suggested wait before retrying; zero when granted
    pub wait: Duration,
    /// Tokens left in the bucket as observed by this attempt
    pub remaining: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitStatus {
    pub platform: String,
    pub rate: f64,
    pub burst: u32,
    /// Fill level including refill accrued since the last write
    pub current_tokens: f64,
    /// Unix seconds of the last refill; `None` before first use / after reset
    pub last_refill: Option<f64>,
    /// `(burst - current) / burst` as a percentage
    pub usage_rate: f64,
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

pub struct RateLimiter {
    platform: String,
    key: String,
    store: Arc<dyn SharedStore>,
    config: RwLock<RateLimitConfig>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("platform", &self.platform)
            .field("config", &*self.config.read())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(platform: impl Into<String>, config: RateLimitConfig, store: Arc<dyn SharedStore>) -> Self {
        let platform = platform.into();
        Self {
            key: format!("rate_limiter:{platform}:bucket"),
            platform,
            store,
            config: RwLock::new(config),
        }
    }

    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn config(&self) -> RateLimitConfig {
        *self.config.read()
    }

    /// One atomic refill-and-take against the store. Never blocks.
    pub async fn try_acquire(&self, tokens: u32) -> Acquire {
        let config = self.config();
        let tokens = tokens.max(1);

        if tokens > config.burst {
            warn!(
                platform = %self.platform,
                tokens,
                burst = config.burst,
                "Requested more tokens than the bucket can ever hold"
            );
            crate::metrics::record_rate_limit(&self.platform, "denied");
            return Acquire { granted: false, wait: Duration::MAX, remaining: 0.0 };
        }

        let req = BucketRequest {
            rate: config.rate,
            burst: f64::from(config.burst),
            tokens: f64::from(tokens),
        };

        match self.store.token_bucket_take(&self.key, req, unix_now()).await {
            Ok(outcome) => {
                crate::metrics::set_rate_limit_tokens(&self.platform, outcome.remaining);
                if outcome.granted {
                    debug!(platform = %self.platform, tokens, remaining = outcome.remaining, "Rate limit tokens granted");
                    crate::metrics::record_rate_limit(&self.platform, "granted");
                } else {
                    debug!(
                        platform = %self.platform,
                        tokens,
                        wait_ms = outcome.wait.as_millis() as u64,
                        "Rate limit bucket empty"
                    );
                    crate::metrics::record_rate_limit(&self.platform, "denied");
                }
                Acquire { granted: outcome.granted, wait: outcome.wait, remaining: outcome.remaining }
            }
            Err(e) => {
                warn!(platform = %self.platform, error = %e, "Rate limiter store unavailable, failing open");
                crate::metrics::record_rate_limit(&self.platform, "fail_open");
                Acquire { granted: true, wait: Duration::ZERO, remaining: f64::from(config.burst) }
            }
        }
    }

    /// `timeout = None`: a single non-blocking attempt.
    /// `timeout = Some(t)`: poll, sleeping the suggested wait, until granted
    /// or `t` has elapsed.
    pub async fn acquire(&self, tokens: u32, timeout: Option<Duration>) -> bool {
        let Some(timeout) = timeout else {
            return self.try_acquire(tokens).await.granted;
        };

        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            let attempt = self.try_acquire(tokens).await;
            if attempt.granted {
                crate::metrics::record_rate_limit_wait(&self.platform, started.elapsed());
                return true;
            }
            let now = Instant::now();
            if now >= deadline || attempt.wait == Duration::MAX {
                crate::metrics::record_rate_limit(&self.platform, "timeout");
                return false;
            }
            sleep(attempt.wait.min(deadline - now).max(MIN_POLL)).await;
        }
    }

    /// Like [`acquire`](Self::acquire) with a timeout, surfacing the timeout
    /// as [`RateLimitError::Timeout`].
    pub async fn acquire_or_timeout(&self, tokens: u32, timeout: Duration) -> Result<(), RateLimitError> {
        let started = Instant::now();
        if self.acquire(tokens, Some(timeout)).await {
            Ok(())
        } else {
            Err(RateLimitError::Timeout {
                platform: self.platform.clone(),
                waited: started.elapsed(),
            })
        }
    }

    /// Blocking twin of [`acquire`](Self::acquire). Fails open if no
    /// runtime can be found or built to talk to the store.
    pub fn acquire_blocking(&self, tokens: u32, timeout: Option<Duration>) -> bool {
        match blocking::block_on(self.acquire(tokens, timeout)) {
            Ok(granted) => granted,
            Err(e) => {
                warn!(platform = %self.platform, error = %e, "No runtime for blocking acquire, failing open");
                crate::metrics::record_rate_limit(&self.platform, "fail_open");
                true
            }
        }
    }

    /// Current fill level without consuming anything.
    pub async fn status(&self) -> Result<RateLimitStatus, StoreError> {
        let config = self.config();
        let burst = f64::from(config.burst);
        let fields = self.store.hmget(&self.key, &["tokens", "last_refill"]).await?;

        let parse = |idx: usize| fields.get(idx).cloned().flatten().and_then(|v| v.parse::<f64>().ok());
        let tokens = parse(0);
        let last_refill = parse(1);

        let current_tokens = match (tokens, last_refill) {
            (Some(tokens), Some(last)) => {
                let refill = ((unix_now() - last).max(0.0) * config.rate).floor();
                (tokens + refill).min(burst)
            }
            (Some(tokens), None) => tokens.min(burst),
            _ => burst,
        };

        Ok(RateLimitStatus {
            platform: self.platform.clone(),
            rate: config.rate,
            burst: config.burst,
            current_tokens,
            last_refill,
            usage_rate: (burst - current_tokens) / burst * 100.0,
        })
    }

    /// Drop the bucket; the next acquisition starts from a full bucket.
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.store.delete(&self.key).await?;
        info!(platform = %self.platform, "Rate limit bucket reset");
        Ok(())
    }

    /// Swap rate/burst and reset the bucket so the new capacity applies at once.
    pub async fn update_config(&self, rate: f64, burst: u32) -> Result<(), RateLimitError> {
        let config = RateLimitConfig::new(rate, burst);
        config.validate().map_err(|reason| RateLimitError::InvalidConfig {
            platform: self.platform.clone(),
            reason,
        })?;
        *self.config.write() = config;
        info!(platform = %self.platform, rate, burst, "Rate limit config updated");
        self.reset().await?;
        Ok(())
    }
}
