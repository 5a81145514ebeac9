//! GraphQL client for the Cloudflare analytics API

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use super::SeriesSource;
use crate::error::FetchError;
use crate::models::{parse_timestamp, DetailRecord, Sample, Scope, TimeWindow};

/// Public analytics endpoint
pub const DEFAULT_GRAPHQL_ENDPOINT: &str = "https://api.cloudflare.com/client/v4/graphql";

const SERIES_FIELDS: &str = r#"series: firewallEventsAdaptiveGroups(
        limit: $limit
        filter: { datetime_geq: $start, datetime_lt: $end, AND: [{ rulesetId: $rulesetId }] }
        orderBy: [datetimeMinute_ASC]
      ) {
        count
        dimensions { ts: datetimeMinute }
      }"#;

const DETAIL_FIELDS: &str = r#"details: firewallEventsAdaptiveGroups(
        limit: $limit
        filter: { datetime_geq: $start, datetime_lt: $end, AND: [{ rulesetId: $rulesetId }] }
        orderBy: [count_DESC]
      ) {
        count
        dimensions { clientIP ja4 description action }
      }"#;

/// Configuration for the GraphQL source
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub endpoint: Url,
    pub api_token: String,
    pub scope: Scope,
    pub ruleset_id: String,
    /// Row limit for the series query
    pub series_limit: u32,
    pub request_timeout: Duration,
}

/// Series source backed by `firewallEventsAdaptiveGroups`
pub struct GraphqlSource {
    client: Client,
    config: SourceConfig,
}

impl GraphqlSource {
    pub fn new(config: SourceConfig) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn scope(&self) -> &Scope {
        &self.config.scope
    }

    /// Build a query over the configured scope selecting `fields`
    fn build_query(&self, name: &str, fields: &str) -> String {
        let (selector, tag_filter) = match self.config.scope {
            Scope::Zone(_) => ("zones", "zoneTag"),
            Scope::Account(_) => ("accounts", "accountTag"),
        };

        format!(
            r#"query {name}($scopeTag: string, $rulesetId: string, $start: Time, $end: Time, $limit: uint64!) {{
  viewer {{
    scope: {selector}(filter: {{ {tag_filter}: $scopeTag }}) {{
      {fields}
    }}
  }}
}}"#
        )
    }

    fn variables(&self, window: TimeWindow, limit: u32) -> serde_json::Value {
        let tag = match &self.config.scope {
            Scope::Zone(tag) | Scope::Account(tag) => tag,
        };
        json!({
            "scopeTag": tag,
            "rulesetId": self.config.ruleset_id,
            "start": format_query_time(&window.start),
            "end": format_query_time(&window.end),
            "limit": limit,
        })
    }

    /// POST a query and return the first scope entry, if any
    async fn execute<T: DeserializeOwned>(
        &self,
        query: String,
        variables: serde_json::Value,
    ) -> Result<Option<T>, FetchError> {
        let response = self
            .client
            .post(self.config.endpoint.clone())
            .bearer_auth(&self.config.api_token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GraphqlResponse<T> =
            serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))?;

        if let Some(errors) = parsed.errors.filter(|errs| !errs.is_empty()) {
            return Err(FetchError::Api(
                errors.into_iter().map(|e| e.message).collect(),
            ));
        }

        Ok(parsed
            .data
            .and_then(|d| d.viewer)
            .and_then(|v| v.scope)
            .and_then(|scopes| scopes.into_iter().next()))
    }
}

#[async_trait]
impl SeriesSource for GraphqlSource {
    async fn fetch_series(&self, window: TimeWindow) -> Result<Vec<Sample>, FetchError> {
        let query = self.build_query("SurgeSeries", SERIES_FIELDS);
        let variables = self.variables(window, self.config.series_limit);

        let rows = self
            .execute::<SeriesScope>(query, variables)
            .await?
            .map(|s| s.series)
            .unwrap_or_default();

        let mut samples = Vec::with_capacity(rows.len());
        for row in rows {
            let timestamp = parse_timestamp(&row.dimensions.ts).map_err(|e| {
                FetchError::Decode(format!("bad timestamp {:?}: {}", row.dimensions.ts, e))
            })?;

            if !window.contains(timestamp) {
                debug!(ts = %row.dimensions.ts, "Dropping sample outside query window");
                continue;
            }
            samples.push(Sample::new(timestamp, row.count));
        }

        Ok(samples)
    }

    async fn fetch_details(
        &self,
        window: TimeWindow,
        limit: u32,
    ) -> Result<Vec<DetailRecord>, FetchError> {
        let query = self.build_query("SurgeDetails", DETAIL_FIELDS);
        let variables = self.variables(window, limit);

        let rows = self
            .execute::<DetailScope>(query, variables)
            .await?
            .map(|s| s.details)
            .unwrap_or_default();

        Ok(rows
            .into_iter()
            .map(|row| DetailRecord {
                client_ip: row.dimensions.client_ip,
                ja4: row.dimensions.ja4,
                description: row.dimensions.description,
                action: row.dimensions.action,
                count: row.count,
            })
            .collect())
    }
}

/// RFC 3339 with millisecond precision, as the API expects for `Time`
fn format_query_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// Response shapes

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<ViewerData<T>>,
    #[serde(default)]
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
struct ViewerData<T> {
    viewer: Option<ScopeData<T>>,
}

#[derive(Debug, Deserialize)]
struct ScopeData<T> {
    scope: Option<Vec<T>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct SeriesScope {
    #[serde(default)]
    series: Vec<SeriesRow>,
}

#[derive(Debug, Deserialize)]
struct SeriesRow {
    count: u64,
    dimensions: SeriesDimensions,
}

#[derive(Debug, Deserialize)]
struct SeriesDimensions {
    ts: String,
}

#[derive(Debug, Deserialize)]
struct DetailScope {
    #[serde(default)]
    details: Vec<DetailRow>,
}

#[derive(Debug, Deserialize)]
struct DetailRow {
    count: u64,
    dimensions: DetailDimensions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DetailDimensions {
    #[serde(rename = "clientIP")]
    client_ip: String,
    ja4: String,
    description: String,
    action: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::Matcher;

    fn window() -> TimeWindow {
        TimeWindow::trailing(Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap(), 10)
    }

    fn source(server: &mockito::Server, scope: Scope) -> GraphqlSource {
        GraphqlSource::new(SourceConfig {
            endpoint: Url::parse(&format!("{}/client/v4/graphql", server.url())).unwrap(),
            api_token: "secret-token".to_string(),
            scope,
            ruleset_id: "ruleset-1".to_string(),
            series_limit: 5000,
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_series_parses_rows() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/client/v4/graphql")
            .match_header("authorization", "Bearer secret-token")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("zones\\(filter: \\{ zoneTag: \\$scopeTag".to_string()),
                Matcher::PartialJsonString(
                    r#"{"variables":{"scopeTag":"zone-9","rulesetId":"ruleset-1","start":"2024-01-01T00:00:00.000Z","limit":5000}}"#
                        .to_string(),
                ),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data":{"viewer":{"scope":[{"series":[
                    {"count":8,"dimensions":{"ts":"2024-01-01T00:03:00Z"}},
                    {"count":5,"dimensions":{"ts":"2024-01-01T00:02:00Z"}},
                    {"count":1,"dimensions":{"ts":"2024-01-01T00:10:00Z"}}
                ]}]}},"errors":null}"#,
            )
            .create_async()
            .await;

        let samples = source(&server, Scope::Zone("zone-9".to_string()))
            .fetch_series(window())
            .await
            .unwrap();

        mock.assert_async().await;
        // The 00:10 row sits on the exclusive end of the window
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].count, 8);
        assert_eq!(
            samples[1].timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 2, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_fetch_series_account_scope_and_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/client/v4/graphql")
            .match_body(Matcher::Regex("accounts\\(filter: \\{ accountTag".to_string()))
            .with_status(200)
            .with_body(r#"{"data":{"viewer":{"scope":[]}},"errors":null}"#)
            .create_async()
            .await;

        let samples = source(&server, Scope::Account("acct".to_string()))
            .fetch_series(window())
            .await
            .unwrap();
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_series_http_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/client/v4/graphql")
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let err = source(&server, Scope::Zone("z".to_string()))
            .fetch_series(window())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_fetch_series_graphql_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/client/v4/graphql")
            .with_status(200)
            .with_body(r#"{"data":null,"errors":[{"message":"quota exceeded"},{"message":"try later"}]}"#)
            .create_async()
            .await;

        let err = source(&server, Scope::Zone("z".to_string()))
            .fetch_series(window())
            .await
            .unwrap_err();
        match err {
            FetchError::Api(messages) => assert_eq!(messages, vec!["quota exceeded", "try later"]),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_series_bad_timestamp() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/client/v4/graphql")
            .with_status(200)
            .with_body(r#"{"data":{"viewer":{"scope":[{"series":[{"count":1,"dimensions":{"ts":"noon"}}]}]}}}"#)
            .create_async()
            .await;

        let err = source(&server, Scope::Zone("z".to_string()))
            .fetch_series(window())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[tokio::test]
    async fn test_fetch_details() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/client/v4/graphql")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("count_DESC".to_string()),
                Matcher::PartialJsonString(r#"{"variables":{"limit":10}}"#.to_string()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"data":{"viewer":{"scope":[{"details":[
                    {"count":40,"dimensions":{"clientIP":"192.0.2.10","ja4":"t13d","description":"page-flood","action":"block"}},
                    {"count":3,"dimensions":{"clientIP":"192.0.2.11","description":"page-flood","action":"log"}}
                ]}]}}}"#,
            )
            .create_async()
            .await;

        let details = source(&server, Scope::Zone("z".to_string()))
            .fetch_details(window(), 10)
            .await
            .unwrap();

        assert_eq!(details.len(), 2);
        assert_eq!(details[0].client_ip, "192.0.2.10");
        assert_eq!(details[0].count, 40);
        assert_eq!(details[1].ja4, "");
        assert_eq!(details[1].action, "log");
    }
}
