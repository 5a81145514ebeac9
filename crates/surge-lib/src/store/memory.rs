//! In-process key-value store

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{Clock, EntryTable, KvStore, SystemClock};
use crate::error::StoreError;

/// Key-value store held in memory
///
/// State is lost when the process exits; use `FileStore` when the
/// watermark must survive restarts.
pub struct MemoryStore {
    table: RwLock<EntryTable>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: RwLock::new(EntryTable::default()),
            clock,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, EntryTable> {
        self.table.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntryTable> {
        self.table.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        Ok(self.read().get(key, now).map(str::to_string))
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.write().put(key, value, ttl, now);
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        Ok(self.write().compare_and_swap(key, None, value, ttl, now))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        Ok(self.write().compare_and_swap(key, expected, value, ttl, now))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.write().delete(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let now = self.clock.now();
        Ok(self.read().scan_prefix(prefix, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ManualClock;
    use chrono::{TimeZone, Utc};

    fn clocked() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        (MemoryStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_put_get_and_expiry() {
        let (store, clock) = clocked();

        store
            .put("timeseries:x", "7", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        store.put("pinned", "1", None).await.unwrap();
        assert_eq!(store.get("timeseries:x").await.unwrap().as_deref(), Some("7"));

        clock.advance(Duration::from_secs(61));
        assert_eq!(store.get("timeseries:x").await.unwrap(), None);
        assert_eq!(store.get("pinned").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_put_refreshes_ttl() {
        let (store, clock) = clocked();
        let ttl = Some(Duration::from_secs(60));

        store.put("k", "1", ttl).await.unwrap();
        clock.advance(Duration::from_secs(50));
        store.put("k", "2", ttl).await.unwrap();
        clock.advance(Duration::from_secs(50));

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_put_if_absent_until_expiry() {
        let (store, clock) = clocked();
        let ttl = Some(Duration::from_secs(300));

        assert!(store.put_if_absent("lease", "a", ttl).await.unwrap());
        assert!(!store.put_if_absent("lease", "b", ttl).await.unwrap());

        clock.advance(Duration::from_secs(301));
        assert!(store.put_if_absent("lease", "b", ttl).await.unwrap());
        assert_eq!(store.get("lease").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let (store, _) = clocked();

        assert!(store.compare_and_swap("w", None, "1", None).await.unwrap());
        assert!(!store.compare_and_swap("w", None, "2", None).await.unwrap());
        assert!(!store.compare_and_swap("w", Some("0"), "2", None).await.unwrap());
        assert!(store.compare_and_swap("w", Some("1"), "2", None).await.unwrap());

        store.delete("w").await.unwrap();
        store.delete("w").await.unwrap();
        assert_eq!(store.get("w").await.unwrap(), None);
    }
}
