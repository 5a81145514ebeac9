//! Alert emission for detected increases
//!
//! Handles:
//! - Rendering a Slack block-kit message (header + JSON body)
//! - Keeping the message under the webhook's size limit
//! - Delivering it with a single POST

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::DispatchError;
use crate::models::{AnomalyEvent, DetailRecord, Scope};

/// Entries of each list rendered into one message
pub const MAX_LISTED_ENTRIES: usize = 3;

/// Slack rejects section text longer than this
pub const SECTION_TEXT_LIMIT: usize = 3000;

/// Default webhook request timeout
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Webhook message made of text blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: TextObject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextObject {
    #[serde(rename = "type")]
    pub text_type: String,
    pub text: String,
}

impl Block {
    fn markdown_section(text: impl Into<String>) -> Self {
        Self {
            block_type: "section".to_string(),
            text: TextObject {
                text_type: "mrkdwn".to_string(),
                text: text.into(),
            },
        }
    }
}

/// Structured part of the alert, already truncated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertBody {
    /// Number of fresh increases before truncation
    pub total_anomalies: usize,
    pub anomalies: Vec<AnomalyEvent>,
    pub details: Vec<DetailRecord>,
}

/// Renders alert payloads for one monitored scope
#[derive(Debug, Clone)]
pub struct Alerter {
    scope_label: String,
}

impl Alerter {
    pub fn new(scope: &Scope) -> Self {
        Self {
            scope_label: scope.label(),
        }
    }

    pub fn header(&self) -> String {
        format!("🚨 DDoS Events Detected on {} 🚨", self.scope_label)
    }

    /// Keep the first entries of each list
    ///
    /// Only affects what is rendered; the caller keeps the full list for
    /// watermark computation.
    pub fn build_body(fresh: &[AnomalyEvent], details: &[DetailRecord]) -> AlertBody {
        AlertBody {
            total_anomalies: fresh.len(),
            anomalies: fresh.iter().take(MAX_LISTED_ENTRIES).copied().collect(),
            details: details.iter().take(MAX_LISTED_ENTRIES).cloned().collect(),
        }
    }

    /// Create the webhook payload for a set of fresh increases
    pub fn build_payload(
        &self,
        fresh: &[AnomalyEvent],
        details: &[DetailRecord],
    ) -> Result<AlertPayload, DispatchError> {
        let body = Self::build_body(fresh, details);
        let rendered = serde_json::to_string_pretty(&body)?;

        Ok(AlertPayload {
            blocks: vec![
                Block::markdown_section(self.header()),
                Block::markdown_section(truncate_chars(&rendered, SECTION_TEXT_LIMIT)),
            ],
        })
    }
}

/// Cut `text` to at most `limit` characters, marking the cut
fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Trait for notification sinks
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one payload; any error means the alert was not delivered
    async fn send(&self, payload: &AlertPayload) -> Result<(), DispatchError>;
}

/// Slack incoming-webhook sink
pub struct SlackWebhook {
    client: Client,
    url: Url,
}

impl SlackWebhook {
    pub fn new(url: Url) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl AlertSink for SlackWebhook {
    async fn send(&self, payload: &AlertPayload) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Status { status, body });
        }

        Ok(())
    }
}
