//! Anomaly detection for the firewall-event series
//!
//! This module provides:
//! - Increase detection over consecutive samples
//! - Cross-invocation deduplication against a persisted watermark
//! - Alert rendering and webhook delivery

mod alerter;
mod dedup;
mod detector;

pub use alerter::{
    AlertBody, AlertPayload, AlertSink, Alerter, Block, SlackWebhook, TextObject,
    MAX_LISTED_ENTRIES, SECTION_TEXT_LIMIT,
};
pub use dedup::{dedupe, DedupOutcome, WatermarkRead, WatermarkStore, WATERMARK_KEY};
pub use detector::detect_increases;
