// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for marketplace-sync.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the embedding
//! process chooses the exporter (Prometheus, OTEL, ...).
//!
//! # Metric Naming Convention
//! - `marketplace_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `platform`: aliexpress, amazon, ... (never a per-item id)
//! - `tier`: l1, l2
//! - `operation`: product_create, inventory_update, get, set, ...
//! - `status` / `outcome`: success, failure, granted, denied, ...

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// RATE LIMITING
// ═══════════════════════════════════════════════════════════════════════════

/// `outcome`: granted, denied, fail_open, timeout
pub fn record_rate_limit(platform: &str, outcome: &str) {
    counter!(
        "marketplace_sync_rate_limit_total",
        "platform" => platform.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn set_rate_limit_tokens(platform: &str, tokens: f64) {
    gauge!(
        "marketplace_sync_rate_limit_tokens",
        "platform" => platform.to_string()
    )
    .set(tokens);
}

pub fn record_rate_limit_wait(platform: &str, waited: Duration) {
    histogram!(
        "marketplace_sync_rate_limit_wait_seconds",
        "platform" => platform.to_string()
    )
    .record(waited.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// LOCKS
// ═══════════════════════════════════════════════════════════════════════════

/// `event`: acquired, contended, timeout, store_error, released, not_owner,
/// renewed, renewal_lost
pub fn record_lock_event(event: &str) {
    counter!(
        "marketplace_sync_lock_events_total",
        "event" => event.to_string()
    )
    .increment(1);
}

pub fn record_lock_hold(duration: Duration) {
    histogram!("marketplace_sync_lock_hold_seconds").record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// RETRY
// ═══════════════════════════════════════════════════════════════════════════

/// One failed attempt, labelled by classified kind
pub fn record_retry_attempt(operation: &str, kind: &str) {
    counter!(
        "marketplace_sync_retry_failures_total",
        "operation" => operation.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// `outcome`: recovered, exhausted, non_retryable
pub fn record_retry_outcome(operation: &str, outcome: &str) {
    counter!(
        "marketplace_sync_retry_outcomes_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════

pub fn record_cache_hit(tier: &str) {
    counter!(
        "marketplace_sync_cache_hits_total",
        "tier" => tier.to_string()
    )
    .increment(1);
}

pub fn record_cache_miss() {
    counter!("marketplace_sync_cache_misses_total").increment(1);
}

/// `operation`: set, delete
pub fn record_cache_write(operation: &str, strategy: &str) {
    counter!(
        "marketplace_sync_cache_writes_total",
        "operation" => operation.to_string(),
        "strategy" => strategy.to_string()
    )
    .increment(1);
}

pub fn record_cache_invalidated(keys: usize) {
    counter!("marketplace_sync_cache_invalidated_keys_total").increment(keys as u64);
}

/// Swallowed L2 failure (degraded to miss / skipped write)
pub fn record_cache_degraded(operation: &str) {
    counter!(
        "marketplace_sync_cache_degraded_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

pub fn set_l1_cache_items(count: usize) {
    gauge!("marketplace_sync_l1_cache_items").set(count as f64);
}

/// `status`: written, retried, dropped
pub fn record_write_back(status: &str, count: usize) {
    counter!(
        "marketplace_sync_write_back_total",
        "status" => status.to_string()
    )
    .increment(count as u64);
}

pub fn set_write_back_pending(count: usize) {
    gauge!("marketplace_sync_write_back_pending").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// BATCHING / ADAPTER CALLS
// ═══════════════════════════════════════════════════════════════════════════

pub fn record_batch_items(platform: &str, operation: &str, status: &str, count: usize) {
    counter!(
        "marketplace_sync_batch_items_total",
        "platform" => platform.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(count as u64);
}

pub fn record_batch_duration(platform: &str, operation: &str, duration: Duration) {
    histogram!(
        "marketplace_sync_batch_seconds",
        "platform" => platform.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// `path`: native, per_item
pub fn record_batch_chunk(platform: &str, path: &str) {
    counter!(
        "marketplace_sync_batch_chunks_total",
        "platform" => platform.to_string(),
        "path" => path.to_string()
    )
    .increment(1);
}

pub fn record_api_call(platform: &str, status: &str, duration: Duration) {
    counter!(
        "marketplace_sync_api_calls_total",
        "platform" => platform.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "marketplace_sync_api_call_seconds",
        "platform" => platform.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER
// ═══════════════════════════════════════════════════════════════════════════

pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "marketplace_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 0 = closed, 1 = half open, 2 = open.
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "marketplace_sync_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(f64::from(state));
}

/// Records elapsed time into `marketplace_sync_operation_seconds` on drop.
pub struct LatencyTimer {
    tier: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(tier: &'static str, operation: &'static str) -> Self {
        Self {
            tier,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(
            "marketplace_sync_operation_seconds",
            "tier" => self.tier,
            "operation" => self.operation
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}
