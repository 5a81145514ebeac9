//! Cross-invocation alert deduplication
//!
//! An increase is alertable iff its current timestamp is strictly later than
//! the persisted watermark (the timestamp of the latest increase already
//! alerted on). Timestamps are compared chronologically, never as text.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::models::{format_timestamp, parse_timestamp, AnomalyEvent};
use crate::store::KvStore;

/// Store key holding the watermark
pub const WATERMARK_KEY: &str = "lastAlertedIncreaseTs";

/// Result of filtering increases against the watermark
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupOutcome {
    /// Increases not yet alerted on, in input order
    pub fresh: Vec<AnomalyEvent>,
    /// Watermark to persist once the alert is delivered
    pub watermark: Option<DateTime<Utc>>,
}

impl DedupOutcome {
    /// Whether the watermark moved past `previous`
    pub fn advanced_from(&self, previous: Option<DateTime<Utc>>) -> bool {
        self.watermark != previous
    }
}

/// Drop increases at or before the watermark and compute the next watermark
pub fn dedupe(events: Vec<AnomalyEvent>, watermark: Option<DateTime<Utc>>) -> DedupOutcome {
    let fresh: Vec<AnomalyEvent> = events
        .into_iter()
        .filter(|e| watermark.map_or(true, |w| e.curr_timestamp > w))
        .collect();

    let latest = fresh.iter().map(|e| e.curr_timestamp).max();
    let next = match (watermark, latest) {
        (Some(w), Some(l)) => Some(w.max(l)),
        (w, l) => w.or(l),
    };

    DedupOutcome {
        fresh,
        watermark: next,
    }
}

/// Watermark as read at cycle start
///
/// Keeps the raw stored text so the later write can compare-and-swap
/// against exactly what was read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WatermarkRead {
    pub value: Option<DateTime<Utc>>,
    raw: Option<String>,
}

impl WatermarkRead {
    /// Stored text, including values that failed to parse
    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }
}

/// Narrow get/set interface over the watermark key
#[derive(Clone)]
pub struct WatermarkStore {
    store: Arc<dyn KvStore>,
    key: String,
}

impl WatermarkStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_key(store, WATERMARK_KEY)
    }

    pub fn with_key(store: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the current watermark
    ///
    /// A stored value that does not parse as a timestamp is treated as
    /// absent; store failures are returned to the caller.
    pub async fn get_watermark(&self) -> Result<WatermarkRead, StoreError> {
        let raw = self.store.get(&self.key).await?;

        let value = match raw.as_deref() {
            None => None,
            Some(text) => match parse_timestamp(text) {
                Ok(ts) => Some(ts),
                Err(e) => {
                    warn!(key = %self.key, value = %text, error = %e, "Ignoring unparseable watermark");
                    None
                }
            },
        };

        Ok(WatermarkRead { value, raw })
    }

    /// Persist `next` if it is later than what was read
    ///
    /// Returns whether a write happened. Fails with `StoreError::Conflict`
    /// when another writer changed the key since `read`.
    pub async fn set_watermark(
        &self,
        read: &WatermarkRead,
        next: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if read.value.map_or(false, |current| next <= current) {
            debug!(key = %self.key, "Watermark unchanged, skipping write");
            return Ok(false);
        }

        let encoded = format_timestamp(&next);
        let swapped = self
            .store
            .compare_and_swap(&self.key, read.raw.as_deref(), &encoded, None)
            .await?;

        if !swapped {
            return Err(StoreError::Conflict {
                key: self.key.clone(),
            });
        }
        Ok(true)
    }

    /// Remove the watermark so the next cycle alerts on everything it sees
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.delete(&self.key).await
    }
}
