//! Time-bounded archive of sampled points
//!
//! Every fetched sample is written as `timeseries:<timestamp>` → `<count>`
//! with a 24-hour TTL, independent of what happened on the alert path.
//! Writes are independent: one failed point never stops the rest.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::models::{format_timestamp, parse_timestamp, Sample};
use crate::store::KvStore;

/// Key prefix for archived points
pub const ARCHIVE_PREFIX: &str = "timeseries:";

/// Default retention period (24 hours)
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of archiving one cycle's samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub written: usize,
    pub failed: usize,
}

/// Writes samples into the key-value store with a fixed TTL
#[derive(Clone)]
pub struct SeriesArchiver {
    store: Arc<dyn KvStore>,
    retention: Duration,
}

impl SeriesArchiver {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_retention(store, DEFAULT_RETENTION)
    }

    pub fn with_retention(store: Arc<dyn KvStore>, retention: Duration) -> Self {
        Self { store, retention }
    }

    pub fn key_for(ts: &DateTime<Utc>) -> String {
        format!("{}{}", ARCHIVE_PREFIX, format_timestamp(ts))
    }

    /// Archive every sample, logging and counting per-item failures
    pub async fn archive(&self, samples: &[Sample]) -> ArchiveReport {
        let mut report = ArchiveReport::default();

        for sample in samples {
            let key = Self::key_for(&sample.timestamp);
            match self
                .store
                .put(&key, &sample.count.to_string(), Some(self.retention))
                .await
            {
                Ok(()) => {
                    debug!(key = %key, count = sample.count, "Archived sample");
                    report.written += 1;
                }
                Err(e) => {
                    warn!(
                        event = "archive_write_failed",
                        key = %key,
                        error = %e,
                        "Failed to archive sample"
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Archived count for a timestamp, if still retained
    pub async fn lookup(&self, ts: &DateTime<Utc>) -> Result<Option<u64>, StoreError> {
        let raw = self.store.get(&Self::key_for(ts)).await?;
        raw.map(|v| parse_count(&v)).transpose()
    }

    /// All retained points, oldest first
    pub async fn list(&self) -> Result<Vec<Sample>, StoreError> {
        let entries = self.store.scan_prefix(ARCHIVE_PREFIX).await?;

        let mut samples = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let raw_ts = &key[ARCHIVE_PREFIX.len()..];
            let timestamp = parse_timestamp(raw_ts)
                .map_err(|e| StoreError::Serialization(format!("bad archive key {}: {}", key, e)))?;
            samples.push(Sample::new(timestamp, parse_count(&value)?));
        }

        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }
}

fn parse_count(raw: &str) -> Result<u64, StoreError> {
    raw.trim()
        .parse()
        .map_err(|e| StoreError::Serialization(format!("bad archived count {:?}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ManualClock, MemoryStore};
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn minute(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_within_retention() {
        let clock = Arc::new(ManualClock::new(minute(0)));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let archiver = SeriesArchiver::new(store.clone());

        let report = archiver
            .archive(&[Sample::new(minute(1), 5), Sample::new(minute(2), 9)])
            .await;
        assert_eq!(report, ArchiveReport { written: 2, failed: 0 });
        assert_eq!(
            store.get("timeseries:2024-01-01T00:01:00Z").await.unwrap().as_deref(),
            Some("5")
        );

        clock.advance(Duration::from_secs(24 * 60 * 60 - 1));
        assert_eq!(archiver.lookup(&minute(2)).await.unwrap(), Some(9));

        clock.advance(Duration::from_secs(1));
        assert_eq!(archiver.lookup(&minute(2)).await.unwrap(), None);
        assert!(archiver.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rewrite_refreshes_value_and_ttl() {
        let clock = Arc::new(ManualClock::new(minute(0)));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let archiver = SeriesArchiver::new(store);

        archiver.archive(&[Sample::new(minute(1), 5)]).await;
        clock.advance(Duration::from_secs(12 * 60 * 60));
        archiver.archive(&[Sample::new(minute(1), 6)]).await;
        clock.advance(Duration::from_secs(20 * 60 * 60));

        assert_eq!(archiver.lookup(&minute(1)).await.unwrap(), Some(6));
    }

    #[tokio::test]
    async fn test_list_is_time_ordered() {
        let archiver = SeriesArchiver::new(Arc::new(MemoryStore::new()));
        archiver
            .archive(&[Sample::new(minute(3), 1), Sample::new(minute(1), 7)])
            .await;

        let points = archiver.list().await.unwrap();
        assert_eq!(points, vec![Sample::new(minute(1), 7), Sample::new(minute(3), 1)]);
    }

    /// Store that rejects writes for one key
    struct FlakyStore {
        inner: MemoryStore,
        poisoned_key: String,
    }

    #[async_trait]
    impl KvStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
            if key == self.poisoned_key {
                return Err(StoreError::Unavailable("write rejected".to_string()));
            }
            self.inner.put(key, value, ttl).await
        }

        async fn put_if_absent(
            &self,
            key: &str,
            value: &str,
            ttl: Option<Duration>,
        ) -> Result<bool, StoreError> {
            self.inner.put_if_absent(key, value, ttl).await
        }

        async fn compare_and_swap(
            &self,
            key: &str,
            expected: Option<&str>,
            value: &str,
            ttl: Option<Duration>,
        ) -> Result<bool, StoreError> {
            self.inner.compare_and_swap(key, expected, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }

        async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
            self.inner.scan_prefix(prefix).await
        }
    }

    #[tokio::test]
    async fn test_failed_write_does_not_stop_the_rest() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            poisoned_key: SeriesArchiver::key_for(&minute(2)),
        });
        let archiver = SeriesArchiver::new(store);

        let report = archiver
            .archive(&[
                Sample::new(minute(1), 1),
                Sample::new(minute(2), 2),
                Sample::new(minute(3), 3),
            ])
            .await;

        assert_eq!(report, ArchiveReport { written: 2, failed: 1 });
        assert_eq!(archiver.lookup(&minute(3)).await.unwrap(), Some(3));
        assert_eq!(archiver.lookup(&minute(2)).await.unwrap(), None);
    }
}
