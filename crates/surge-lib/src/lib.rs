//! Core library for the firewall-event surge watcher
//!
//! This crate provides the core functionality for:
//! - Fetching the firewall-event count series from the analytics API
//! - Detecting consecutive-interval increases
//! - Deduplicating alerts across invocations with a persisted watermark
//! - Dispatching notifications to a webhook
//! - Archiving every sampled point with a fixed retention
//! - Health checks and observability

pub mod anomaly;
pub mod archive;
pub mod config;
pub mod cycle;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod scheduler;
pub mod source;
pub mod store;

pub use config::WatchConfig;
pub use cycle::{CycleReport, SurgeWatch};
pub use error::{ConfigError, CycleError, DispatchError, FetchError, StoreError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, SurgeMetrics};
