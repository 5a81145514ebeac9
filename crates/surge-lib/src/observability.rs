//! Observability infrastructure for the surge watcher
//!
//! Provides:
//! - Prometheus metrics (cycle latency, samples, increases, alert outcomes, watermark)
//! - Structured JSON logging with tracing

use chrono::{DateTime, Utc};
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

use crate::models::format_timestamp;

/// Histogram buckets for cycle latency (in seconds)
const CYCLE_LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SurgeMetricsInner> = OnceLock::new();

struct SurgeMetricsInner {
    cycle_latency_seconds: Histogram,
    samples_fetched: IntCounter,
    anomalies_detected: IntCounter,
    alerts_dispatched: IntCounter,
    dispatch_failures: IntCounter,
    fetch_failures: IntCounter,
    archive_failures: IntCounter,
    cycles_skipped: IntCounter,
    watermark_timestamp: IntGauge,
}

impl SurgeMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "surge_watch_cycle_latency_seconds",
                "Wall time of one fetch/detect/alert/archive cycle",
                CYCLE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            samples_fetched: register_int_counter!(
                "surge_watch_samples_fetched_total",
                "Series samples returned by the analytics API"
            )
            .expect("Failed to register samples_fetched"),

            anomalies_detected: register_int_counter!(
                "surge_watch_anomalies_detected_total",
                "Fresh increases that passed deduplication"
            )
            .expect("Failed to register anomalies_detected"),

            alerts_dispatched: register_int_counter!(
                "surge_watch_alerts_dispatched_total",
                "Alerts delivered to the webhook"
            )
            .expect("Failed to register alerts_dispatched"),

            dispatch_failures: register_int_counter!(
                "surge_watch_dispatch_failures_total",
                "Alerts the webhook did not accept"
            )
            .expect("Failed to register dispatch_failures"),

            fetch_failures: register_int_counter!(
                "surge_watch_fetch_failures_total",
                "Series fetches that aborted a cycle"
            )
            .expect("Failed to register fetch_failures"),

            archive_failures: register_int_counter!(
                "surge_watch_archive_failures_total",
                "Archived points that could not be written"
            )
            .expect("Failed to register archive_failures"),

            cycles_skipped: register_int_counter!(
                "surge_watch_cycles_skipped_total",
                "Cycles skipped because another runner held the lease"
            )
            .expect("Failed to register cycles_skipped"),

            watermark_timestamp: register_int_gauge!(
                "surge_watch_watermark_timestamp_seconds",
                "Unix time of the latest increase alerted on"
            )
            .expect("Failed to register watermark_timestamp"),
        }
    }
}

/// Metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct SurgeMetrics {
    _private: (),
}

impl Default for SurgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SurgeMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SurgeMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SurgeMetricsInner {
        GLOBAL_METRICS.get_or_init(SurgeMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
    }

    pub fn add_samples_fetched(&self, count: usize) {
        self.inner().samples_fetched.inc_by(count as u64);
    }

    pub fn add_anomalies_detected(&self, count: usize) {
        self.inner().anomalies_detected.inc_by(count as u64);
    }

    pub fn inc_alerts_dispatched(&self) {
        self.inner().alerts_dispatched.inc();
    }

    pub fn inc_dispatch_failures(&self) {
        self.inner().dispatch_failures.inc();
    }

    pub fn inc_fetch_failures(&self) {
        self.inner().fetch_failures.inc();
    }

    pub fn add_archive_failures(&self, count: usize) {
        self.inner().archive_failures.inc_by(count as u64);
    }

    pub fn inc_cycles_skipped(&self) {
        self.inner().cycles_skipped.inc();
    }

    pub fn set_watermark(&self, ts: &DateTime<Utc>) {
        self.inner().watermark_timestamp.set(ts.timestamp());
    }
}

/// Structured logger for watch events
///
/// Provides consistent JSON-formatted logging for cycles, alerts
/// and failures.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_cycle_started(&self, window_start: &DateTime<Utc>, window_end: &DateTime<Utc>) {
        info!(
            event = "cycle_started",
            node = %self.node_name,
            window_start = %format_timestamp(window_start),
            window_end = %format_timestamp(window_end),
            "Starting watch cycle"
        );
    }

    /// Log the increases that passed deduplication
    pub fn log_increases(&self, detected: usize, fresh: usize, watermark: Option<&DateTime<Utc>>) {
        if fresh > 0 {
            warn!(
                event = "increases_detected",
                node = %self.node_name,
                detected = detected,
                fresh = fresh,
                watermark = ?watermark.map(format_timestamp),
                "New firewall-event increases detected"
            );
        } else {
            info!(
                event = "increases_detected",
                node = %self.node_name,
                detected = detected,
                fresh = 0,
                watermark = ?watermark.map(format_timestamp),
                "No new increases detected in the timeseries"
            );
        }
    }

    pub fn log_alert_sent(&self, fresh: usize, details: usize) {
        info!(
            event = "alert_sent",
            node = %self.node_name,
            anomalies = fresh,
            details = details,
            "Alert sent for increases"
        );
    }

    pub fn log_alert_failed(&self, fresh: usize, err: &dyn std::error::Error) {
        error!(
            event = "alert_failed",
            node = %self.node_name,
            anomalies = fresh,
            error = %err,
            "Alert delivery failed, watermark left unchanged"
        );
    }

    pub fn log_enrichment_failed(&self, err: &dyn std::error::Error) {
        warn!(
            event = "enrichment_failed",
            node = %self.node_name,
            error = %err,
            "Detail fetch failed, alerting without details"
        );
    }

    pub fn log_watermark_advanced(&self, previous: Option<&DateTime<Utc>>, next: &DateTime<Utc>) {
        info!(
            event = "watermark_advanced",
            node = %self.node_name,
            previous = ?previous.map(format_timestamp),
            next = %format_timestamp(next),
            "Watermark advanced"
        );
    }

    pub fn log_archive(&self, written: usize, failed: usize) {
        if failed > 0 {
            warn!(
                event = "archive_completed",
                node = %self.node_name,
                written = written,
                failed = failed,
                "Archived series with failures"
            );
        } else {
            info!(
                event = "archive_completed",
                node = %self.node_name,
                written = written,
                "Archived series"
            );
        }
    }

    pub fn log_cycle_skipped(&self, lease_key: &str) {
        warn!(
            event = "cycle_skipped",
            node = %self.node_name,
            lease_key = %lease_key,
            "Another cycle is in flight, skipping"
        );
    }

    /// Log a failed cycle as a `{status: "error", message}` record
    pub fn log_cycle_failed(&self, kind: &str, message: &str) {
        error!(
            event = "cycle_failed",
            node = %self.node_name,
            status = "error",
            kind = %kind,
            message = %message,
            "Watch cycle failed"
        );
    }

    pub fn log_startup(&self, version: &str, scope: &str) {
        info!(
            event = "watch_started",
            node = %self.node_name,
            version = %version,
            scope = %scope,
            "Surge watch started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "watch_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Surge watch shutting down"
        );
    }
}
