// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One [`RateLimiter`] per platform for the registry's lifetime.
//!
//! The registry is an explicit object owned by the application context,
//! not a process global; two registries over the same store still share
//! quota because the bucket itself lives in the store.

use super::bucket::{RateLimitStatus, RateLimiter};
use crate::config::RateLimitConfig;
use crate::store::{SharedStore, StoreError};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub struct RateLimiterRegistry {
    store: Arc<dyn SharedStore>,
    limits: HashMap<String, RateLimitConfig>,
    default_limit: RateLimitConfig,
    limiters: DashMap<String, Arc<RateLimiter>>,
}

impl RateLimiterRegistry {
    pub fn new(
        store: Arc<dyn SharedStore>,
        limits: HashMap<String, RateLimitConfig>,
        default_limit: RateLimitConfig,
    ) -> Self {
        Self {
            store,
            limits,
            default_limit,
            limiters: DashMap::new(),
        }
    }

    /// Limiter for `platform`, created on first use from the configured
    /// table (or the default bucket for unlisted platforms).
    pub fn get(&self, platform: &str) -> Arc<RateLimiter> {
        self.limiters
            .entry(platform.to_string())
            .or_insert_with(|| {
                let config = self.limits.get(platform).copied().unwrap_or(self.default_limit);
                Arc::new(RateLimiter::new(platform, config, self.store.clone()))
            })
            .clone()
    }

    /// Platforms with a live limiter, sorted.
    #[must_use]
    pub fn platforms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.limiters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Status of every live limiter. A limiter whose store read fails is
    /// skipped with a warning.
    pub async fn all_status(&self) -> Vec<RateLimitStatus> {
        let mut out = Vec::new();
        for platform in self.platforms() {
            match self.get(&platform).status().await {
                Ok(status) => out.push(status),
                Err(e) => warn!(platform = %platform, error = %e, "Could not read rate limit status"),
            }
        }
        out
    }

    /// Reset every live limiter's bucket; stops at the first store error.
    pub async fn reset_all(&self) -> Result<(), StoreError> {
        for platform in self.platforms() {
            self.get(&platform).reset().await?;
        }
        Ok(())
    }
}
