//! Core data models for the surge watcher

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One (timestamp, count) measurement of the monitored series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub count: u64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, count: u64) -> Self {
        Self { timestamp, count }
    }
}

/// A consecutive pair of samples where the count strictly rose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    #[serde(rename = "prevTs", with = "minute_ts")]
    pub prev_timestamp: DateTime<Utc>,
    #[serde(rename = "prevCount")]
    pub prev_count: u64,
    #[serde(rename = "currTs", with = "minute_ts")]
    pub curr_timestamp: DateTime<Utc>,
    #[serde(rename = "currCount")]
    pub curr_count: u64,
}

impl AnomalyEvent {
    /// Absolute increase between the two samples
    pub fn delta(&self) -> u64 {
        self.curr_count - self.prev_count
    }
}

/// Raw per-event context attached to an alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRecord {
    #[serde(rename = "clientIP")]
    pub client_ip: String,
    #[serde(rename = "ja4Fingerprint")]
    pub ja4: String,
    pub description: String,
    pub action: String,
    pub count: u64,
}

/// Half-open query window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of `minutes` ending at `end`
    pub fn trailing(end: DateTime<Utc>, minutes: u32) -> Self {
        Self {
            start: end - Duration::minutes(i64::from(minutes)),
            end,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// What the series query is scoped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Zone(String),
    Account(String),
}

impl Scope {
    /// Human-readable label used in alert headers
    pub fn label(&self) -> String {
        match self {
            Scope::Zone(tag) => format!("Zone {}", tag),
            Scope::Account(tag) => format!("Account {}", tag),
        }
    }
}

/// Canonical text form of a series timestamp, as used in store keys
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 timestamp into UTC
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

mod minute_ts {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}
