//! One watch cycle: fetch, detect, deduplicate, alert, persist, archive
//!
//! Failure policy:
//! - lease held, fetch or watermark-read failure: abort with no side effects
//! - detail fetch failure: alert without details
//! - dispatch failure: keep the old watermark so the next cycle re-alerts
//! - archive write failure: logged per point, never fatal
//!
//! Archiving runs after the alert branch whether or not the alert was
//! delivered; a failed dispatch still fails the cycle.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::anomaly::{
    dedupe, detect_increases, AlertSink, Alerter, DedupOutcome, SlackWebhook, WatermarkRead,
    WatermarkStore, WATERMARK_KEY,
};
use crate::archive::{ArchiveReport, SeriesArchiver};
use crate::config::WatchConfig;
use crate::error::{CycleError, DispatchError};
use crate::health::{components, HealthRegistry};
use crate::models::{DetailRecord, Scope, TimeWindow};
use crate::observability::{StructuredLogger, SurgeMetrics};
use crate::source::{GraphqlSource, SeriesSource};
use crate::store::{Clock, FileStore, KvStore, SystemClock};

/// Default lease lifetime; bounds how long a crashed runner blocks others
const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(5 * 60);

/// Per-cycle tunables
#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Trailing series window in minutes
    pub window_minutes: u32,
    pub detail_window_minutes: u32,
    /// 0 disables detail enrichment
    pub detail_limit: u32,
    pub lease_ttl: Duration,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            window_minutes: 10,
            detail_window_minutes: 5,
            detail_limit: 10,
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }
}

impl From<&WatchConfig> for CycleSettings {
    fn from(config: &WatchConfig) -> Self {
        Self {
            window_minutes: config.window_minutes,
            detail_window_minutes: config.detail_window_minutes,
            detail_limit: config.detail_limit,
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }
}

/// What a completed cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub samples: usize,
    pub detected: usize,
    pub fresh: usize,
    pub details: usize,
    pub alerted: bool,
    /// Watermark in effect after the cycle
    pub watermark: Option<DateTime<Utc>>,
    pub archive: ArchiveReport,
}

/// The watch pipeline
pub struct SurgeWatch {
    source: Arc<dyn SeriesSource>,
    sink: Arc<dyn AlertSink>,
    store: Arc<dyn KvStore>,
    watermarks: WatermarkStore,
    archiver: SeriesArchiver,
    alerter: Alerter,
    settings: CycleSettings,
    clock: Arc<dyn Clock>,
    logger: StructuredLogger,
    metrics: SurgeMetrics,
    health: HealthRegistry,
    lease_key: String,
    owner: String,
}

impl SurgeWatch {
    pub fn builder() -> SurgeWatchBuilder {
        SurgeWatchBuilder::new()
    }

    /// Wire the GraphQL source, Slack sink and file store from configuration
    pub fn from_config(config: &WatchConfig, health: HealthRegistry) -> Result<Self> {
        let source = GraphqlSource::new(config.source_config())
            .context("Failed to create analytics client")?;
        let sink = SlackWebhook::new(config.slack_webhook_url.clone())
            .context("Failed to create webhook client")?;
        let store = FileStore::open(&config.state_path).with_context(|| {
            format!("Failed to open state file {}", config.state_path.display())
        })?;

        SurgeWatchBuilder::new()
            .source(Arc::new(source))
            .sink(Arc::new(sink))
            .store(Arc::new(store))
            .scope(config.scope())
            .settings(CycleSettings::from(config))
            .logger(StructuredLogger::new(&config.node_name))
            .health(health)
            .build()
    }

    pub fn store(&self) -> Arc<dyn KvStore> {
        self.store.clone()
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Run one cycle, logging and swallowing failures
    ///
    /// Returns the report of a completed cycle, `None` otherwise.
    pub async fn tick(&self) -> Option<CycleReport> {
        let start = Instant::now();
        let result = self.run_cycle().await;
        self.metrics
            .observe_cycle_latency(start.elapsed().as_secs_f64());

        match result {
            Ok(report) => Some(report),
            Err(CycleError::Busy { key }) => {
                self.logger.log_cycle_skipped(&key);
                self.metrics.inc_cycles_skipped();
                None
            }
            Err(e) => {
                self.logger.log_cycle_failed(e.kind(), &e.to_string());
                None
            }
        }
    }

    /// Run one cycle under the single-flight lease
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        self.acquire_lease().await?;
        let result = self.run_locked().await;
        self.release_lease().await;
        result
    }

    async fn run_locked(&self) -> Result<CycleReport, CycleError> {
        let window = TimeWindow::trailing(self.clock.now(), self.settings.window_minutes);
        self.logger.log_cycle_started(&window.start, &window.end);

        let samples = match self.source.fetch_series(window).await {
            Ok(samples) => {
                self.health.set_healthy(components::FETCHER).await;
                samples
            }
            Err(e) => {
                self.metrics.inc_fetch_failures();
                self.health
                    .set_degraded(components::FETCHER, e.to_string())
                    .await;
                return Err(e.into());
            }
        };
        self.metrics.add_samples_fetched(samples.len());

        let detected = detect_increases(&samples);
        let detected_count = detected.len();

        let read = match self.watermarks.get_watermark().await {
            Ok(read) => read,
            Err(e) => {
                self.health
                    .set_unhealthy(components::STORE, e.to_string())
                    .await;
                return Err(e.into());
            }
        };

        let outcome = dedupe(detected, read.value);
        self.logger
            .log_increases(detected_count, outcome.fresh.len(), outcome.watermark.as_ref());

        let mut report = CycleReport {
            samples: samples.len(),
            detected: detected_count,
            fresh: outcome.fresh.len(),
            watermark: read.value,
            ..Default::default()
        };

        let alert_result = if outcome.fresh.is_empty() {
            Ok(())
        } else {
            self.metrics.add_anomalies_detected(outcome.fresh.len());
            self.alert_and_persist(&read, &outcome, &mut report).await
        };

        report.archive = self.archiver.archive(&samples).await;
        self.logger
            .log_archive(report.archive.written, report.archive.failed);
        if report.archive.failed > 0 {
            self.metrics.add_archive_failures(report.archive.failed);
            self.health
                .set_degraded(
                    components::STORE,
                    format!("{} archive writes failed", report.archive.failed),
                )
                .await;
        } else if alert_result.is_ok() {
            self.health.set_healthy(components::STORE).await;
        }

        alert_result.map(|_| report)
    }

    /// Enrich, dispatch, and advance the watermark only after delivery
    async fn alert_and_persist(
        &self,
        read: &WatermarkRead,
        outcome: &DedupOutcome,
        report: &mut CycleReport,
    ) -> Result<(), CycleError> {
        let details = self.enrich().await;
        report.details = details.len();

        if let Err(e) = self.dispatch(outcome, &details).await {
            self.logger.log_alert_failed(outcome.fresh.len(), &e);
            self.metrics.inc_dispatch_failures();
            self.health
                .set_degraded(components::DISPATCHER, e.to_string())
                .await;
            return Err(e.into());
        }

        report.alerted = true;
        self.logger
            .log_alert_sent(outcome.fresh.len(), details.len());
        self.metrics.inc_alerts_dispatched();
        self.health.set_healthy(components::DISPATCHER).await;

        if let Some(next) = outcome.watermark {
            match self.watermarks.set_watermark(read, next).await {
                Ok(true) => {
                    self.logger
                        .log_watermark_advanced(read.value.as_ref(), &next);
                    self.metrics.set_watermark(&next);
                    report.watermark = Some(next);
                }
                Ok(false) => {}
                Err(e) => {
                    self.health
                        .set_unhealthy(components::STORE, e.to_string())
                        .await;
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    async fn dispatch(
        &self,
        outcome: &DedupOutcome,
        details: &[DetailRecord],
    ) -> Result<(), DispatchError> {
        let payload = self.alerter.build_payload(&outcome.fresh, details)?;
        self.sink.send(&payload).await
    }

    /// Best-effort detail fetch; never fails the cycle
    async fn enrich(&self) -> Vec<DetailRecord> {
        if self.settings.detail_limit == 0 {
            return Vec::new();
        }

        let window = TimeWindow::trailing(self.clock.now(), self.settings.detail_window_minutes);
        match self
            .source
            .fetch_details(window, self.settings.detail_limit)
            .await
        {
            Ok(details) => details,
            Err(e) => {
                self.logger.log_enrichment_failed(&e);
                Vec::new()
            }
        }
    }

    async fn acquire_lease(&self) -> Result<(), CycleError> {
        let acquired = self
            .store
            .put_if_absent(&self.lease_key, &self.owner, Some(self.settings.lease_ttl))
            .await?;

        if !acquired {
            return Err(CycleError::Busy {
                key: self.lease_key.clone(),
            });
        }
        debug!(lease_key = %self.lease_key, owner = %self.owner, "Lease acquired");
        Ok(())
    }

    async fn release_lease(&self) {
        let result = async {
            let holder = self.store.get(&self.lease_key).await?;
            if holder.as_deref() == Some(self.owner.as_str()) {
                self.store.delete(&self.lease_key).await?;
            }
            Ok::<_, crate::error::StoreError>(())
        }
        .await;

        if let Err(e) = result {
            warn!(lease_key = %self.lease_key, error = %e, "Failed to release lease, it will expire");
        }
    }
}

/// Lease key guarding a watermark key
pub fn lease_key_for(watermark_key: &str) -> String {
    format!("lease:{}", watermark_key)
}

/// Builder for the watch pipeline
pub struct SurgeWatchBuilder {
    source: Option<Arc<dyn SeriesSource>>,
    sink: Option<Arc<dyn AlertSink>>,
    store: Option<Arc<dyn KvStore>>,
    scope: Option<Scope>,
    settings: CycleSettings,
    clock: Arc<dyn Clock>,
    logger: StructuredLogger,
    health: HealthRegistry,
}

impl SurgeWatchBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            sink: None,
            store: None,
            scope: None,
            settings: CycleSettings::default(),
            clock: Arc::new(SystemClock),
            logger: StructuredLogger::new("unknown"),
            health: HealthRegistry::new(),
        }
    }

    pub fn source(mut self, source: Arc<dyn SeriesSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn settings(mut self, settings: CycleSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn build(self) -> Result<SurgeWatch> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Series source is required"))?;
        let sink = self
            .sink
            .ok_or_else(|| anyhow::anyhow!("Alert sink is required"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Store is required"))?;
        let scope = self
            .scope
            .ok_or_else(|| anyhow::anyhow!("Scope is required"))?;

        Ok(SurgeWatch {
            watermarks: WatermarkStore::new(store.clone()),
            archiver: SeriesArchiver::new(store.clone()),
            alerter: Alerter::new(&scope),
            source,
            sink,
            store,
            settings: self.settings,
            clock: self.clock,
            logger: self.logger,
            metrics: SurgeMetrics::new(),
            health: self.health,
            lease_key: lease_key_for(WATERMARK_KEY),
            owner: lease_owner(),
        })
    }
}

impl Default for SurgeWatchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Identify this runner in the lease value
fn lease_owner() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}-{:x}{:x}", std::process::id(), now.as_secs(), now.subsec_nanos())
}
