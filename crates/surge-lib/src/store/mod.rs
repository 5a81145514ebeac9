//! Key-value storage for the watermark, the cycle lease and archived points
//!
//! This module provides:
//! - The `KvStore` trait (get/put with TTL, put-if-absent, compare-and-swap)
//! - An in-process store for tests and single-process deployments
//! - A JSON file store that survives process restarts
//! - Clocks so TTL expiry can be driven deterministically

mod clock;
mod file;
mod memory;

pub use clock::{Clock, ManualClock, SystemClock};
pub use file::FileStore;
pub use memory::MemoryStore;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Trait for key-value store implementations
///
/// Expired entries must be reported as absent by every read operation.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a live value
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, replacing any previous one and refreshing its TTL
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Write only if no live value exists; returns whether the write happened
    async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Write only if the live value equals `expected` (`None` = absent)
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Remove a key; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All live entries whose key starts with `prefix`, ordered by key
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;
}

/// Stored value with optional expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(value: &str, ttl: Option<Duration>, now: DateTime<Utc>) -> Self {
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl))
        });
        Self {
            value: value.to_string(),
            expires_at,
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Key-ordered entry table shared by the store implementations
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct EntryTable {
    entries: BTreeMap<String, Entry>,
}

impl EntryTable {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<&str> {
        self.entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.as_str())
    }

    fn put(&mut self, key: &str, value: &str, ttl: Option<Duration>, now: DateTime<Utc>) {
        self.entries
            .insert(key.to_string(), Entry::new(value, ttl, now));
    }

    fn compare_and_swap(
        &mut self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.get(key, now) != expected {
            return false;
        }
        self.put(key, value, ttl, now);
        true
    }

    fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn scan_prefix(&self, prefix: &str, now: DateTime<Utc>) -> Vec<(String, String)> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Drop expired entries, returning how many were removed
    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        before - self.entries.len()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
