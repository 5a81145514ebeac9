//! Periodic cycle scheduler
//!
//! Runs one watch cycle immediately, then one per interval plus jitter,
//! until the shutdown channel fires. Cycles never overlap within a process;
//! the store lease covers overlap across processes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::config::WatchConfig;
use crate::cycle::SurgeWatch;

/// Scheduling configuration
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Base interval between cycles (default: 60 seconds)
    pub interval: Duration,
    /// Maximum jitter added to each interval (default: 1 second)
    pub jitter: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            jitter: Duration::from_secs(1),
        }
    }
}

impl From<&WatchConfig> for ScheduleConfig {
    fn from(config: &WatchConfig) -> Self {
        Self {
            interval: config.interval,
            jitter: config.jitter,
        }
    }
}

/// Drives a `SurgeWatch` on a fixed cadence
pub struct CycleScheduler {
    watch: Arc<SurgeWatch>,
    config: ScheduleConfig,
}

impl CycleScheduler {
    pub fn new(watch: Arc<SurgeWatch>, config: ScheduleConfig) -> Self {
        Self { watch, config }
    }

    /// Run until shutdown, returning the number of cycles started
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> u64 {
        info!(
            interval_secs = self.config.interval.as_secs(),
            jitter_ms = self.config.jitter.as_millis() as u64,
            "Starting watch scheduler"
        );

        let mut cycles = 0u64;
        let mut completed = 0u64;

        loop {
            let start = Instant::now();
            cycles += 1;
            if self.watch.tick().await.is_some() {
                completed += 1;
            }
            debug!(
                cycle = cycles,
                completed = completed,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Watch cycle finished"
            );

            tokio::select! {
                _ = sleep(self.next_delay()) => {}
                _ = shutdown.recv() => {
                    info!(cycles = cycles, "Shutting down watch scheduler");
                    break;
                }
            }
        }

        cycles
    }

    fn next_delay(&self) -> Duration {
        let jitter_ms = rand_jitter(self.config.jitter.as_millis() as u64);
        self.config.interval + Duration::from_millis(jitter_ms)
    }
}

/// Generate a random jitter value between 0 and max_ms
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    now % max_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{AlertPayload, AlertSink};
    use crate::error::{DispatchError, FetchError};
    use crate::models::{DetailRecord, Sample, Scope, TimeWindow};
    use crate::source::SeriesSource;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SeriesSource for CountingSource {
        async fn fetch_series(&self, window: TimeWindow) -> Result<Vec<Sample>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Sample::new(window.start, 1)])
        }

        async fn fetch_details(
            &self,
            _window: TimeWindow,
            _limit: u32,
        ) -> Result<Vec<DetailRecord>, FetchError> {
            Ok(vec![])
        }
    }

    struct NullSink;

    #[async_trait]
    impl AlertSink for NullSink {
        async fn send(&self, _payload: &AlertPayload) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    #[test]
    fn test_schedule_config_default() {
        let config = ScheduleConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.jitter, Duration::from_secs(1));
    }

    #[test]
    fn test_rand_jitter() {
        assert!(rand_jitter(1000) < 1000);
        assert_eq!(rand_jitter(0), 0);
    }

    #[tokio::test]
    async fn test_runs_immediately_and_stops_on_shutdown() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let watch = SurgeWatch::builder()
            .source(source.clone())
            .sink(Arc::new(NullSink))
            .store(Arc::new(MemoryStore::new()))
            .scope(Scope::Account("acct-1".to_string()))
            .build()
            .unwrap();

        let scheduler = CycleScheduler::new(
            Arc::new(watch),
            ScheduleConfig {
                interval: Duration::from_millis(20),
                jitter: Duration::ZERO,
            },
        );

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(scheduler.run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();
        let cycles = handle.await.unwrap();

        assert!(cycles >= 2);
        assert_eq!(source.calls.load(Ordering::SeqCst) as u64, cycles);
    }
}
