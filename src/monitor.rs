// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-endpoint API call statistics kept in the shared store.
//!
//! Layout, one set of keys per platform, endpoint and UTC day:
//!
//! ```text
//! metrics:{platform}:{endpoint}:{date}            hash: count, success_count,
//!                                                       error_count, total_duration (ms)
//! metrics:{platform}:{endpoint}:{date}:durations  list: most recent durations (ms)
//! ```
//!
//! Both keys expire after the retention period. Recording is best-effort:
//! a store failure is logged and never reaches the API call being recorded.

use crate::adapter::{AdapterError, Platform};
use crate::config::{AlertThresholds, MonitorConfig};
use crate::store::{SharedStore, StoreError};
use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const FIELDS: [&str; 4] = ["count", "success_count", "error_count", "total_duration"];

/// Aggregated statistics over a day range.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApiCallStats {
    pub platform: String,
    pub endpoint: Option<String>,
    pub days: u32,
    pub count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub avg_duration_ms: f64,
    /// Latency percentiles; only computed for a single endpoint
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighErrorRate,
    SlowResponse,
    LowSuccessRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub platform: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Default)]
struct Totals {
    count: u64,
    success_count: u64,
    error_count: u64,
    total_duration: u64,
}

impl Totals {
    fn add(&mut self, values: &[Option<String>]) {
        let field = |i: usize| values.get(i).and_then(|v| v.as_deref()).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
        self.count += field(0);
        self.success_count += field(1);
        self.error_count += field(2);
        self.total_duration += field(3);
    }
}

/// Records adapter calls and reads back daily aggregates.
#[derive(Clone)]
pub struct ApiCallMonitor {
    store: Arc<dyn SharedStore>,
    config: MonitorConfig,
}

impl std::fmt::Debug for ApiCallMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCallMonitor").field("config", &self.config).finish()
    }
}

fn metrics_key(platform: &str, endpoint: &str, date: NaiveDate) -> String {
    format!("metrics:{platform}:{endpoint}:{}", date.format("%Y-%m-%d"))
}

fn durations_key(hash_key: &str) -> String {
    format!("{hash_key}:durations")
}

/// Linear interpolation between closest ranks; `sorted` must be ascending.
#[must_use]
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (sorted.len() - 1) as f64 * (p / 100.0);
    let lower = rank.floor() as usize;
    let frac = rank - lower as f64;
    match sorted.get(lower + 1) {
        Some(&upper) => (sorted[lower] as f64 + frac * (upper as f64 - sorted[lower] as f64)) as u64,
        None => sorted[lower],
    }
}

impl ApiCallMonitor {
    pub fn new(store: Arc<dyn SharedStore>, config: MonitorConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Record one call. Never fails; store errors are logged.
    pub async fn record(&self, platform: &str, endpoint: &str, success: bool, duration: Duration) {
        self.record_on(platform, endpoint, success, duration, Utc::now().date_naive()).await;
    }

    pub(crate) async fn record_on(
        &self,
        platform: &str,
        endpoint: &str,
        success: bool,
        duration: Duration,
        date: NaiveDate,
    ) {
        if !self.config.enabled {
            return;
        }
        let duration_ms = duration.as_millis().min(i64::MAX as u128) as i64;
        if let Err(e) = self.write(platform, endpoint, success, duration_ms, date).await {
            warn!(platform, endpoint, error = %e, "Failed to record API call");
            return;
        }
        debug!(platform, endpoint, success, duration_ms, "Recorded API call");
    }

    async fn write(
        &self,
        platform: &str,
        endpoint: &str,
        success: bool,
        duration_ms: i64,
        date: NaiveDate,
    ) -> Result<(), StoreError> {
        let key = metrics_key(platform, endpoint, date);
        let list_key = durations_key(&key);
        let retention = self.config.retention();

        self.store.hincr_by(&key, "count", 1).await?;
        self.store.hincr_by(&key, if success { "success_count" } else { "error_count" }, 1).await?;
        self.store.hincr_by(&key, "total_duration", duration_ms).await?;
        self.store
            .lpush_trim(&list_key, duration_ms.to_string().as_bytes(), self.config.max_durations)
            .await?;
        self.store.expire(&key, retention).await?;
        self.store.expire(&list_key, retention).await?;
        Ok(())
    }

    /// Statistics for the last `days` days (today included). With no
    /// `endpoint`, every endpoint of the platform is summed and no
    /// percentiles are computed.
    pub async fn metrics(&self, platform: &str, endpoint: Option<&str>, days: u32) -> Result<ApiCallStats, StoreError> {
        self.metrics_on(platform, endpoint, days, Utc::now().date_naive()).await
    }

    pub(crate) async fn metrics_on(
        &self,
        platform: &str,
        endpoint: Option<&str>,
        days: u32,
        today: NaiveDate,
    ) -> Result<ApiCallStats, StoreError> {
        let days = days.max(1);
        let dates: Vec<NaiveDate> = (0..days).filter_map(|i| today.checked_sub_days(Days::new(u64::from(i)))).collect();

        let mut totals = Totals::default();
        let mut durations = Vec::new();
        for date in &dates {
            let keys = match endpoint {
                Some(endpoint) => vec![metrics_key(platform, endpoint, *date)],
                None => {
                    let pattern = format!("metrics:{platform}:*:{}", date.format("%Y-%m-%d"));
                    self.store.keys(&pattern).await?
                }
            };
            for key in &keys {
                totals.add(&self.store.hmget(key, &FIELDS).await?);
                if endpoint.is_some() {
                    durations.extend(
                        self.store
                            .lrange(&durations_key(key), 0, -1)
                            .await?
                            .iter()
                            .filter_map(|raw| std::str::from_utf8(raw).ok()?.parse::<u64>().ok()),
                    );
                }
            }
        }

        let mut stats = ApiCallStats {
            platform: platform.to_string(),
            endpoint: endpoint.map(str::to_string),
            days,
            count: totals.count,
            success_count: totals.success_count,
            error_count: totals.error_count,
            ..ApiCallStats::default()
        };
        if totals.count > 0 {
            let count = totals.count as f64;
            stats.success_rate = totals.success_count as f64 / count;
            stats.error_rate = totals.error_count as f64 / count;
            stats.avg_duration_ms = totals.total_duration as f64 / count;
            if !durations.is_empty() {
                durations.sort_unstable();
                stats.p50_ms = Some(percentile(&durations, 50.0));
                stats.p95_ms = Some(percentile(&durations, 95.0));
                stats.p99_ms = Some(percentile(&durations, 99.0));
            }
        }
        Ok(stats)
    }

    /// Today's threshold breaches for each platform.
    ///
    /// Platform-wide stats carry no percentiles, so the latency alert looks
    /// at each endpoint's p95 and reports the worst one.
    pub async fn alerts(&self, platforms: &[&str]) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for platform in platforms {
            match self.platform_alerts(platform, Utc::now().date_naive()).await {
                Ok(found) => alerts.extend(found),
                Err(e) => warn!(platform, error = %e, "Skipping alert check"),
            }
        }
        alerts
    }

    pub(crate) async fn platform_alerts(&self, platform: &str, today: NaiveDate) -> Result<Vec<Alert>, StoreError> {
        let stats = self.metrics_on(platform, None, 1, today).await?;
        if stats.count == 0 {
            return Ok(Vec::new());
        }

        let pattern = format!("metrics:{platform}:*:{}", today.format("%Y-%m-%d"));
        let prefix = format!("metrics:{platform}:");
        let suffix = format!(":{}", today.format("%Y-%m-%d"));
        let mut worst_p95 = 0u64;
        for key in self.store.keys(&pattern).await? {
            let Some(endpoint) = key.strip_prefix(&prefix).and_then(|rest| rest.strip_suffix(&suffix)) else {
                continue;
            };
            let endpoint_stats = self.metrics_on(platform, Some(endpoint), 1, today).await?;
            worst_p95 = worst_p95.max(endpoint_stats.p95_ms.unwrap_or(0));
        }

        Ok(evaluate(platform, &stats, worst_p95, &self.config.alerts))
    }
}

/// Time one adapter call and record it in the metrics registry and, when
/// present, the monitor.
pub(crate) async fn observe_call<T, F>(
    monitor: Option<&ApiCallMonitor>,
    platform: Platform,
    endpoint: &str,
    call: F,
) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    let started = Instant::now();
    let outcome = call.await;
    let elapsed = started.elapsed();
    let status = if outcome.is_ok() { "success" } else { "failure" };
    crate::metrics::record_api_call(platform.as_str(), status, elapsed);
    if let Some(monitor) = monitor {
        monitor.record(platform.as_str(), endpoint, outcome.is_ok(), elapsed).await;
    }
    outcome
}

fn evaluate(platform: &str, stats: &ApiCallStats, p95_ms: u64, thresholds: &AlertThresholds) -> Vec<Alert> {
    let alert = |kind, severity, value, threshold| Alert { platform: platform.to_string(), kind, severity, value, threshold };
    let mut alerts = Vec::new();
    if stats.error_rate > thresholds.error_rate {
        alerts.push(alert(AlertKind::HighErrorRate, AlertSeverity::Critical, stats.error_rate, thresholds.error_rate));
    }
    if p95_ms > thresholds.p95_latency_ms {
        alerts.push(alert(
            AlertKind::SlowResponse,
            AlertSeverity::Warning,
            p95_ms as f64,
            thresholds.p95_latency_ms as f64,
        ));
    }
    if stats.success_rate < thresholds.success_rate {
        alerts.push(alert(
            AlertKind::LowSuccessRate,
            AlertSeverity::Critical,
            stats.success_rate,
            thresholds.success_rate,
        ));
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::faulty::FaultyStore;
    use crate::store::MemoryStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn monitor() -> (ApiCallMonitor, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (ApiCallMonitor::new(store.clone(), MonitorConfig::default()), store)
    }

    #[test]
    fn test_percentile_interpolates() {
        let data: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&data, 50.0), 50);
        assert_eq!(percentile(&data, 99.0), 99);
        assert_eq!(percentile(&[7], 95.0), 7);
        assert_eq!(percentile(&[], 50.0), 0);
        assert_eq!(percentile(&[100, 200], 50.0), 150);
    }

    #[tokio::test]
    async fn test_single_endpoint_counts_and_percentiles() {
        let (monitor, _) = monitor();
        for ms in [100, 200, 300] {
            monitor.record_on("tiktok", "/api/orders", true, Duration::from_millis(ms), day(10)).await;
        }
        monitor.record_on("tiktok", "/api/orders", false, Duration::from_millis(400), day(10)).await;

        let stats = monitor.metrics_on("tiktok", Some("/api/orders"), 1, day(10)).await.unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.success_count, 3);
        assert_eq!(stats.error_count, 1);
        assert!((stats.error_rate - 0.25).abs() < 1e-9);
        assert!((stats.avg_duration_ms - 250.0).abs() < 1e-9);
        assert_eq!(stats.p50_ms, Some(250));
    }

    #[tokio::test]
    async fn test_platform_aggregate_spans_endpoints_and_days() {
        let (monitor, _) = monitor();
        monitor.record_on("temu", "/v1/orders", true, Duration::from_millis(10), day(9)).await;
        monitor.record_on("temu", "/v1/products", true, Duration::from_millis(30), day(10)).await;
        monitor.record_on("wish", "/order/get", false, Duration::from_millis(50), day(10)).await;

        let today_only = monitor.metrics_on("temu", None, 1, day(10)).await.unwrap();
        assert_eq!(today_only.count, 1);
        assert_eq!(today_only.p50_ms, None);

        let two_days = monitor.metrics_on("temu", None, 2, day(10)).await.unwrap();
        assert_eq!(two_days.count, 2);
        assert!((two_days.success_rate - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_keys_expire_after_retention() {
        let (monitor, store) = monitor();
        monitor.record_on("jumia", "/orders", true, Duration::from_millis(5), day(1)).await;
        let ttl = store.ttl(&metrics_key("jumia", "/orders", day(1))).await.unwrap().unwrap();
        assert!(ttl > Duration::from_secs(29 * 24 * 3600));
        assert!(store.ttl(&durations_key(&metrics_key("jumia", "/orders", day(1)))).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duration_list_is_bounded() {
        let store = Arc::new(MemoryStore::new());
        let config = MonitorConfig { max_durations: 3, ..MonitorConfig::default() };
        let monitor = ApiCallMonitor::new(store.clone(), config);
        for ms in 0..10 {
            monitor.record_on("wish", "/order/get", true, Duration::from_millis(ms), day(2)).await;
        }
        let list = store.lrange(&durations_key(&metrics_key("wish", "/order/get", day(2))), 0, -1).await.unwrap();
        assert_eq!(list.len(), 3);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_propagate() {
        let store = FaultyStore::new();
        store.set_down(true);
        let monitor = ApiCallMonitor::new(Arc::new(store), MonitorConfig::default());
        monitor.record("amazon", "/Orders", true, Duration::from_millis(1)).await;
        assert!(monitor.metrics("amazon", None, 1).await.is_err());
        assert!(monitor.alerts(&["amazon"]).await.is_empty());
    }

    #[tokio::test]
    async fn test_alerts_on_error_rate_and_latency() {
        let (monitor, _) = monitor();
        monitor.record_on("lazada", "/orders/get", false, Duration::from_millis(6000), day(5)).await;
        monitor.record_on("lazada", "/orders/get", true, Duration::from_millis(6000), day(5)).await;
        monitor.record_on("lazada", "/products/get", true, Duration::from_millis(10), day(5)).await;

        let alerts = monitor.platform_alerts("lazada", day(5)).await.unwrap();
        let kinds: Vec<AlertKind> = alerts.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::HighErrorRate, AlertKind::SlowResponse, AlertKind::LowSuccessRate]);

        assert!(monitor.platform_alerts("quiet", day(5)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_monitor_records_nothing() {
        let store = Arc::new(MemoryStore::new());
        let monitor = ApiCallMonitor::new(store.clone(), MonitorConfig { enabled: false, ..MonitorConfig::default() });
        monitor.record_on("wish", "/order/get", true, Duration::from_millis(1), day(3)).await;
        assert!(store.keys("metrics:*").await.unwrap().is_empty());
    }
}
