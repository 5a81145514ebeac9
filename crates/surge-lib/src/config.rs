//! Watcher configuration
//!
//! Loaded from an optional TOML file overlaid with `SURGE_*` environment
//! variables. The four required settings are checked together so a single
//! error names everything that is missing.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;
use crate::models::Scope;
use crate::source::{SourceConfig, DEFAULT_GRAPHQL_ENDPOINT};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SURGE";

/// Required settings with their descriptions
const REQUIRED: [(&str, &str); 4] = [
    ("API_TOKEN", "Cloudflare API token"),
    ("ACCOUNT_ID", "Account tag"),
    ("RULESET_ID", "DDoS ruleset ID"),
    ("SLACK_WEBHOOK_URL", "Slack webhook URL"),
];

/// Configuration as read, before validation
#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    api_token: Option<String>,
    account_id: Option<String>,
    ruleset_id: Option<String>,
    slack_webhook_url: Option<String>,

    zone_id: Option<String>,

    #[serde(default = "default_graphql_endpoint")]
    graphql_endpoint: String,

    /// Trailing series window in minutes
    #[serde(default = "default_window_minutes")]
    window_minutes: u32,

    #[serde(default = "default_series_limit")]
    series_limit: u32,

    #[serde(default = "default_detail_window_minutes")]
    detail_window_minutes: u32,

    /// 0 disables detail enrichment
    #[serde(default = "default_detail_limit")]
    detail_limit: u32,

    #[serde(default = "default_interval_secs")]
    interval_secs: u64,

    #[serde(default = "default_jitter_ms")]
    jitter_ms: u64,

    state_path: Option<PathBuf>,

    #[serde(default = "default_api_port")]
    api_port: u16,

    #[serde(default = "default_node_name")]
    node_name: String,
}

fn default_graphql_endpoint() -> String {
    DEFAULT_GRAPHQL_ENDPOINT.to_string()
}

fn default_window_minutes() -> u32 {
    10
}

fn default_series_limit() -> u32 {
    5000
}

fn default_detail_window_minutes() -> u32 {
    5
}

fn default_detail_limit() -> u32 {
    10
}

fn default_interval_secs() -> u64 {
    60
}

fn default_jitter_ms() -> u64 {
    1000
}

fn default_api_port() -> u16 {
    8080
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

/// Default location of the state file
pub fn default_state_path() -> PathBuf {
    dirs_next::data_local_dir()
        .map(|dir| dir.join("surge-watch").join("state.json"))
        .unwrap_or_else(|| PathBuf::from("surge-state.json"))
}

/// Validated watcher configuration
#[derive(Clone)]
pub struct WatchConfig {
    pub api_token: String,
    pub account_id: String,
    pub ruleset_id: String,
    pub slack_webhook_url: Url,
    /// When set, the series is scoped to this zone instead of the account
    pub zone_id: Option<String>,
    pub graphql_endpoint: Url,
    pub window_minutes: u32,
    pub series_limit: u32,
    pub detail_window_minutes: u32,
    pub detail_limit: u32,
    pub interval: Duration,
    pub jitter: Duration,
    pub state_path: PathBuf,
    pub api_port: u16,
    pub node_name: String,
}

impl fmt::Debug for WatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchConfig")
            .field("api_token", &"<redacted>")
            .field("account_id", &self.account_id)
            .field("ruleset_id", &self.ruleset_id)
            .field("slack_webhook_url", &"<redacted>")
            .field("zone_id", &self.zone_id)
            .field("graphql_endpoint", &self.graphql_endpoint.as_str())
            .field("window_minutes", &self.window_minutes)
            .field("series_limit", &self.series_limit)
            .field("detail_window_minutes", &self.detail_window_minutes)
            .field("detail_limit", &self.detail_limit)
            .field("interval", &self.interval)
            .field("jitter", &self.jitter)
            .field("state_path", &self.state_path)
            .field("api_port", &self.api_port)
            .field("node_name", &self.node_name)
            .finish()
    }
}

impl WatchConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        Self::from_config(config)
    }

    /// Validate an already assembled configuration
    pub fn from_config(config: config::Config) -> Result<Self, ConfigError> {
        let raw: RawConfig = config.try_deserialize()?;
        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> Result<Self, ConfigError> {
        let present = |v: &Option<String>| v.as_deref().map_or(false, |s| !s.trim().is_empty());
        let supplied = [
            present(&raw.api_token),
            present(&raw.account_id),
            present(&raw.ruleset_id),
            present(&raw.slack_webhook_url),
        ];

        let missing: Vec<String> = REQUIRED
            .iter()
            .zip(supplied)
            .filter(|(_, ok)| !ok)
            .map(|((name, description), _)| format!("{}_{} ({})", ENV_PREFIX, name, description))
            .collect();

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let slack_webhook_url = parse_url("slack_webhook_url", raw.slack_webhook_url.as_deref())?;
        let graphql_endpoint = parse_url("graphql_endpoint", Some(&raw.graphql_endpoint))?;

        if raw.window_minutes == 0 {
            return Err(invalid("window_minutes", "must be at least 1"));
        }
        if raw.series_limit == 0 {
            return Err(invalid("series_limit", "must be at least 1"));
        }
        if raw.interval_secs == 0 {
            return Err(invalid("interval_secs", "must be at least 1"));
        }

        Ok(Self {
            api_token: raw.api_token.unwrap_or_default(),
            account_id: raw.account_id.unwrap_or_default(),
            ruleset_id: raw.ruleset_id.unwrap_or_default(),
            slack_webhook_url,
            zone_id: raw.zone_id.filter(|z| !z.trim().is_empty()),
            graphql_endpoint,
            window_minutes: raw.window_minutes,
            series_limit: raw.series_limit,
            detail_window_minutes: raw.detail_window_minutes.max(1),
            detail_limit: raw.detail_limit,
            interval: Duration::from_secs(raw.interval_secs),
            jitter: Duration::from_millis(raw.jitter_ms),
            state_path: raw.state_path.unwrap_or_else(default_state_path),
            api_port: raw.api_port,
            node_name: raw.node_name,
        })
    }

    /// Zone scope when a zone is configured, account scope otherwise
    pub fn scope(&self) -> Scope {
        match &self.zone_id {
            Some(zone) => Scope::Zone(zone.clone()),
            None => Scope::Account(self.account_id.clone()),
        }
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            endpoint: self.graphql_endpoint.clone(),
            api_token: self.api_token.clone(),
            scope: self.scope(),
            ruleset_id: self.ruleset_id.clone(),
            series_limit: self.series_limit,
            request_timeout: Duration::from_secs(30),
        }
    }
}

fn parse_url(field: &'static str, raw: Option<&str>) -> Result<Url, ConfigError> {
    let raw = raw.unwrap_or_default();
    Url::parse(raw.trim()).map_err(|e| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
