//! Configuration for the sync coordination layer.
//!
//! Every table has a built-in default, so an empty JSON object is a valid
//! configuration.
//!
//! # Example
//!
//! ```
//! use marketplace_sync::SyncConfig;
//!
//! let config = SyncConfig::default();
//! assert_eq!(config.rate_limit_for("amazon").rate, 10.0);
//! assert_eq!(config.rate_limit_for("some-new-market").burst, 10);
//!
//! let config = SyncConfig::from_json_str(r#"{
//!     "redis_url": "redis://localhost:6379",
//!     "rate_limits": { "demo": { "rate": 2.0, "burst": 5 } },
//!     "batch": { "max_concurrent_batches": 2 }
//! }"#).unwrap();
//! assert_eq!(config.rate_limit_for("demo").burst, 5);
//! assert_eq!(config.batch.batch_sizes.product_update, 100);
//! ```

use crate::cache::strategy::CacheStrategy;
use crate::resilience::classify::ErrorKind;
use crate::resilience::retry::{DEFAULT_NON_RETRYABLE, DEFAULT_RETRYABLE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Redis connection string (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Optional namespace prepended to every shared-store key
    #[serde(default)]
    pub key_prefix: Option<String>,

    /// Per-platform token buckets
    #[serde(default = "default_rate_limits")]
    pub rate_limits: HashMap<String, RateLimitConfig>,

    /// Bucket used for platforms missing from `rate_limits`
    #[serde(default)]
    pub default_rate_limit: RateLimitConfig,

    #[serde(default)]
    pub retry: RetryPolicyConfig,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: None,
            rate_limits: default_rate_limits(),
            default_rate_limit: RateLimitConfig::default(),
            retry: RetryPolicyConfig::default(),
            lock: LockConfig::default(),
            cache: CacheConfig::default(),
            batch: BatchConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Bucket settings for `platform`, falling back to `default_rate_limit`.
    #[must_use]
    pub fn rate_limit_for(&self, platform: &str) -> RateLimitConfig {
        self.rate_limits
            .get(platform)
            .copied()
            .unwrap_or(self.default_rate_limit)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (platform, limit) in &self.rate_limits {
            limit
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("rate_limits.{platform}: {e}")))?;
        }
        self.default_rate_limit
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("default_rate_limit: {e}")))?;
        self.retry.validate()?;
        self.lock.validate()?;
        self.cache.validate()?;
        self.batch.validate()?;
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens added per second
    pub rate: f64,
    /// Bucket capacity
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { rate: 5.0, burst: 10 }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn new(rate: f64, burst: u32) -> Self {
        Self { rate, burst }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.rate.is_finite() && self.rate > 0.0) {
            return Err(format!("rate must be a positive number, got {}", self.rate));
        }
        if self.burst == 0 {
            return Err("burst must be at least 1".into());
        }
        Ok(())
    }
}

fn default_rate_limits() -> HashMap<String, RateLimitConfig> {
    [
        ("aliexpress", 3.0, 5),
        ("amazon", 10.0, 20),
        ("lazada", 8.0, 15),
        ("tiktok", 5.0, 10),
        ("temu", 5.0, 10),
        ("wish", 5.0, 10),
        ("mercadolibre", 5.0, 10),
        ("jumia", 5.0, 10),
    ]
    .into_iter()
    .map(|(platform, rate, burst)| (platform.to_string(), RateLimitConfig::new(rate, burst)))
    .collect()
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
    #[serde(default = "default_retryable")]
    pub retryable: Vec<ErrorKind>,
    #[serde(default = "default_non_retryable")]
    pub non_retryable: Vec<ErrorKind>,
}

fn default_max_retries() -> u32 { 3 }
fn default_base_delay_secs() -> f64 { 1.0 }
fn default_max_delay_secs() -> f64 { 60.0 }
fn default_true() -> bool { true }
fn default_retryable() -> Vec<ErrorKind> { DEFAULT_RETRYABLE.to_vec() }
fn default_non_retryable() -> Vec<ErrorKind> { DEFAULT_NON_RETRYABLE.to_vec() }

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            jitter: true,
            retryable: default_retryable(),
            non_retryable: default_non_retryable(),
        }
    }
}

impl RetryPolicyConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let finite_non_negative = |v: f64| v.is_finite() && v >= 0.0;
        if !finite_non_negative(self.base_delay_secs) || !finite_non_negative(self.max_delay_secs) {
            return Err(invalid("retry delays must be finite and non-negative"));
        }
        if self.base_delay_secs > self.max_delay_secs {
            return Err(invalid(format!(
                "retry.base_delay_secs ({}) exceeds max_delay_secs ({})",
                self.base_delay_secs, self.max_delay_secs
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_true")]
    pub auto_renewal: bool,
    #[serde(default = "default_renewal_interval_secs")]
    pub renewal_interval_secs: u64,
    /// Renewal stops after this long even if the holder never releases
    #[serde(default = "default_max_lock_time_secs")]
    pub max_lock_time_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_lock_ttl_secs() -> u64 { 30 }
fn default_renewal_interval_secs() -> u64 { 10 }
fn default_max_lock_time_secs() -> u64 { 300 }
fn default_poll_interval_ms() -> u64 { 100 }

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_lock_ttl_secs(),
            auto_renewal: true,
            renewal_interval_secs: default_renewal_interval_secs(),
            max_lock_time_secs: default_max_lock_time_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl LockConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    #[must_use]
    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs)
    }

    #[must_use]
    pub fn max_lock_time(&self) -> Duration {
        Duration::from_secs(self.max_lock_time_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl_secs == 0 {
            return Err(invalid("lock.default_ttl_secs must be at least 1"));
        }
        if self.auto_renewal && (self.renewal_interval_secs == 0 || self.renewal_interval_secs >= self.default_ttl_secs) {
            return Err(invalid(format!(
                "lock.renewal_interval_secs ({}) must be in 1..default_ttl_secs ({})",
                self.renewal_interval_secs, self.default_ttl_secs
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("lock.poll_interval_ms must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTypeConfig {
    pub strategy: CacheStrategy,
    pub ttl_secs: u64,
    #[serde(default = "default_true")]
    pub enable_local_cache: bool,
}

impl CacheTypeConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheTypeConfig {
    /// Applied to cache types missing from the strategy table.
    fn default() -> Self {
        Self {
            strategy: CacheStrategy::CacheAside,
            ttl_secs: 300,
            enable_local_cache: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalCacheConfig {
    #[serde(default = "default_local_max_size")]
    pub max_size: usize,
    #[serde(default = "default_local_ttl_secs")]
    pub ttl_secs: u64,
    /// zstd-compress L1 payloads
    #[serde(default)]
    pub compression: bool,
}

fn default_local_max_size() -> usize { 1000 }
fn default_local_ttl_secs() -> u64 { 300 }

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_local_max_size(),
            ttl_secs: default_local_ttl_secs(),
            compression: false,
        }
    }
}

impl LocalCacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteBackConfig {
    #[serde(default = "default_write_back_capacity")]
    pub queue_capacity: usize,
    /// Flush after this many queued writes
    #[serde(default = "default_write_back_flush_count")]
    pub flush_count: usize,
    /// Flush after this many milliseconds even if the batch is small
    #[serde(default = "default_write_back_flush_ms")]
    pub flush_ms: u64,
    /// Attempts per write before it is dropped and logged
    #[serde(default = "default_write_back_max_attempts")]
    pub max_attempts: u32,
}

fn default_write_back_capacity() -> usize { 10_000 }
fn default_write_back_flush_count() -> usize { 100 }
fn default_write_back_flush_ms() -> u64 { 50 }
fn default_write_back_max_attempts() -> u32 { 3 }

impl Default for WriteBackConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_write_back_capacity(),
            flush_count: default_write_back_flush_count(),
            flush_ms: default_write_back_flush_ms(),
            max_attempts: default_write_back_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_strategies")]
    pub strategies: HashMap<String, CacheTypeConfig>,
    #[serde(default)]
    pub local: LocalCacheConfig,
    #[serde(default)]
    pub write_back: WriteBackConfig,
    /// Concurrent loads per warm-up batch
    #[serde(default = "default_warm_up_batch_size")]
    pub warm_up_batch_size: usize,
}

fn default_warm_up_batch_size() -> usize { 10 }

fn default_cache_strategies() -> HashMap<String, CacheTypeConfig> {
    use CacheStrategy::*;
    [
        ("product_info", WriteThrough, 3600, true),
        ("inventory", WriteBack, 300, true),
        ("category_list", CacheAside, 86_400, true),
        ("order_list", CacheAside, 180, false),
        ("shop_info", WriteThrough, 7200, true),
    ]
    .into_iter()
    .map(|(name, strategy, ttl_secs, enable_local_cache)| {
        (name.to_string(), CacheTypeConfig { strategy, ttl_secs, enable_local_cache })
    })
    .collect()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            strategies: default_cache_strategies(),
            local: LocalCacheConfig::default(),
            write_back: WriteBackConfig::default(),
            warm_up_batch_size: default_warm_up_batch_size(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn for_type(&self, cache_type: &str) -> CacheTypeConfig {
        self.strategies.get(cache_type).copied().unwrap_or_default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.local.max_size == 0 {
            return Err(invalid("cache.local.max_size must be at least 1"));
        }
        if self.write_back.queue_capacity == 0 || self.write_back.flush_count == 0 {
            return Err(invalid("cache.write_back queue_capacity and flush_count must be at least 1"));
        }
        if self.warm_up_batch_size == 0 {
            return Err(invalid("cache.warm_up_batch_size must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Batching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSizes {
    #[serde(default = "default_product_create")]
    pub product_create: usize,
    #[serde(default = "default_product_update")]
    pub product_update: usize,
    #[serde(default = "default_inventory_update")]
    pub inventory_update: usize,
    #[serde(default = "default_order_sync")]
    pub order_sync: usize,
}

fn default_product_create() -> usize { 50 }
fn default_product_update() -> usize { 100 }
fn default_inventory_update() -> usize { 200 }
fn default_order_sync() -> usize { 100 }

impl Default for BatchSizes {
    fn default() -> Self {
        Self {
            product_create: default_product_create(),
            product_update: default_product_update(),
            inventory_update: default_inventory_update(),
            order_sync: default_order_sync(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub batch_sizes: BatchSizes,
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    /// Retries per item on the per-item fallback path
    #[serde(default = "default_max_retries")]
    pub max_retries_per_item: u32,
    /// How long a chunk may wait for a rate-limit token
    #[serde(default = "default_token_timeout_secs")]
    pub token_timeout_secs: u64,
}

fn default_max_concurrent_batches() -> usize { 5 }
fn default_token_timeout_secs() -> u64 { 30 }

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_sizes: BatchSizes::default(),
            max_concurrent_batches: default_max_concurrent_batches(),
            max_retries_per_item: default_max_retries(),
            token_timeout_secs: default_token_timeout_secs(),
        }
    }
}

impl BatchConfig {
    #[must_use]
    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let sizes = &self.batch_sizes;
        if [sizes.product_create, sizes.product_update, sizes.inventory_update, sizes.order_sync].contains(&0) {
            return Err(invalid("batch.batch_sizes entries must be at least 1"));
        }
        if self.max_concurrent_batches == 0 {
            return Err(invalid("batch.max_concurrent_batches must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// API call monitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Durations kept per endpoint per day
    #[serde(default = "default_max_durations")]
    pub max_durations: usize,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default)]
    pub alerts: AlertThresholds,
}

fn default_max_durations() -> usize { 1000 }
fn default_retention_days() -> u64 { 30 }

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_durations: default_max_durations(),
            retention_days: default_retention_days(),
            alerts: AlertThresholds::default(),
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 3600)
    }
}

/// Levels at which [`ApiCallMonitor::alerts`](crate::monitor::ApiCallMonitor::alerts) reports a platform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Alert above this error rate
    #[serde(default = "default_alert_error_rate")]
    pub error_rate: f64,
    /// Alert above this p95 latency
    #[serde(default = "default_alert_p95_ms")]
    pub p95_latency_ms: u64,
    /// Alert below this success rate
    #[serde(default = "default_alert_success_rate")]
    pub success_rate: f64,
}

fn default_alert_error_rate() -> f64 { 0.1 }
fn default_alert_p95_ms() -> u64 { 5000 }
fn default_alert_success_rate() -> f64 { 0.9 }

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            error_rate: default_alert_error_rate(),
            p95_latency_ms: default_alert_p95_ms(),
            success_rate: default_alert_success_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_platform_table() {
        let config = SyncConfig::default();
        assert_eq!(config.rate_limit_for("aliexpress"), RateLimitConfig::new(3.0, 5));
        assert_eq!(config.rate_limit_for("amazon"), RateLimitConfig::new(10.0, 20));
        assert_eq!(config.rate_limit_for("lazada"), RateLimitConfig::new(8.0, 15));
        assert_eq!(config.rate_limit_for("unknown"), RateLimitConfig::new(5.0, 10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_type_lookup_and_fallback() {
        let cache = CacheConfig::default();
        let inventory = cache.for_type("inventory");
        assert_eq!(inventory.strategy, CacheStrategy::WriteBack);
        assert_eq!(inventory.ttl_secs, 300);

        assert!(!cache.for_type("order_list").enable_local_cache);

        let fallback = cache.for_type("made_up");
        assert_eq!(fallback.strategy, CacheStrategy::CacheAside);
        assert_eq!(fallback.ttl_secs, 300);
    }

    #[test]
    fn test_empty_json_is_all_defaults() {
        let config = SyncConfig::from_json_str("{}").unwrap();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.lock.default_ttl_secs, 30);
        assert_eq!(config.cache.local.max_size, 1000);
        assert_eq!(config.batch.batch_sizes.inventory_update, 200);
        assert_eq!(config.retry.retryable.len(), DEFAULT_RETRYABLE.len());
    }

    #[test]
    fn test_partial_override() {
        let config = SyncConfig::from_json_str(
            r#"{"retry": {"max_retries": 5, "jitter": false, "retryable": ["timeout"]},
                "cache": {"strategies": {"inventory": {"strategy": "write_through", "ttl_secs": 60}}}}"#,
        )
        .unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert!(!config.retry.jitter);
        assert_eq!(config.retry.retryable, vec![ErrorKind::Timeout]);
        assert_eq!(config.retry.base_delay_secs, 1.0);
        let inventory = config.cache.for_type("inventory");
        assert_eq!(inventory.strategy, CacheStrategy::WriteThrough);
        assert!(inventory.enable_local_cache);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let bad_rate = r#"{"rate_limits": {"x": {"rate": 0.0, "burst": 1}}}"#;
        assert!(matches!(SyncConfig::from_json_str(bad_rate), Err(ConfigError::Invalid(_))));

        let bad_lock = r#"{"lock": {"default_ttl_secs": 5, "renewal_interval_secs": 5}}"#;
        assert!(matches!(SyncConfig::from_json_str(bad_lock), Err(ConfigError::Invalid(_))));

        let bad_retry = r#"{"retry": {"base_delay_secs": 10.0, "max_delay_secs": 1.0}}"#;
        assert!(matches!(SyncConfig::from_json_str(bad_retry), Err(ConfigError::Invalid(_))));

        let bad_batch = r#"{"batch": {"batch_sizes": {"product_create": 0}}}"#;
        assert!(matches!(SyncConfig::from_json_str(bad_batch), Err(ConfigError::Invalid(_))));

        assert!(matches!(SyncConfig::from_json_str("{"), Err(ConfigError::Parse(_))));
    }
}
