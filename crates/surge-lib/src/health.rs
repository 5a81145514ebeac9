//! Health tracking for the watch components
//!
//! Each cycle reports how the fetcher, dispatcher and store behaved; the
//! agent exposes the aggregate on `/healthz` and `/readyz`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Last operation failed but the next cycle may recover
    Degraded,
    /// The watermark or lease cannot be trusted until this clears
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate served on `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Answer served on `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const FETCHER: &str = "fetcher";
    pub const DISPATCHER: &str = "dispatcher";
    pub const STORE: &str = "store";

    pub const ALL: [&str; 3] = [FETCHER, DISPATCHER, STORE];
}

/// Shared, cloneable view of component health plus the scheduler's
/// ready flag
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every watch component healthy
    pub async fn register_all(&self) {
        for name in components::ALL {
            self.set(name, ComponentStatus::Healthy, None).await;
        }
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// Set once the scheduler is running, cleared on shutdown
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse { status, components }
    }

    /// Ready while the scheduler runs and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        if !*self.ready.read().await {
            return ReadinessResponse {
                ready: false,
                reason: Some("Watch scheduler not running".to_string()),
            };
        }

        let components = self.components.read().await;
        let failing = components
            .iter()
            .find(|(_, c)| c.status == ComponentStatus::Unhealthy);

        match failing {
            Some((name, health)) => ReadinessResponse {
                ready: false,
                reason: Some(match &health.message {
                    Some(message) => format!("{} unhealthy: {}", name, message),
                    None => format!("{} unhealthy", name),
                }),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let health = ComponentHealth {
            status,
            message,
            updated_at: Utc::now(),
        };
        self.components
            .write()
            .await
            .insert(name.to_string(), health);
    }
}
