//! Error taxonomy for the watch cycle
//!
//! Fetch and dispatch failures are fatal to a cycle, store failures depend
//! on where they happen (watermark vs. archive), and configuration errors
//! are raised before any network call.

use thiserror::Error;

/// Configuration could not be loaded or is incomplete
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to read configuration: {0}")]
    Source(#[from] config::ConfigError),
}

/// Series or detail retrieval failed
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Analytics request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Analytics API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Analytics API reported errors: {}", .0.join("; "))]
    Api(Vec<String>),

    #[error("Malformed analytics response: {0}")]
    Decode(String),
}

/// The notification could not be delivered
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Webhook returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to encode alert payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Key-value store read or write failed
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store data could not be (de)serialized: {0}")]
    Serialization(String),

    #[error("Concurrent update detected on key {key}")]
    Conflict { key: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A watch cycle was aborted or completed with a failure
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Another cycle holds the lease on {key}")]
    Busy { key: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CycleError {
    /// Short machine-readable category used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Busy { .. } => "busy",
            CycleError::Fetch(_) => "fetch",
            CycleError::Dispatch(_) => "dispatch",
            CycleError::Store(_) => "store",
        }
    }
}
