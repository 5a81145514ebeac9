//! Retrieval of the firewall-event series and raw event details
//!
//! This module provides the `SeriesSource` trait and the GraphQL adapter
//! for the Cloudflare analytics API. Zone and account scopes share one
//! adapter; the scope only changes the query's entry point.

mod graphql;

pub use graphql::{GraphqlSource, SourceConfig, DEFAULT_GRAPHQL_ENDPOINT};

use async_trait::async_trait;

use crate::error::FetchError;
use crate::models::{DetailRecord, Sample, TimeWindow};

/// Trait for series retrieval implementations
#[async_trait]
pub trait SeriesSource: Send + Sync {
    /// Per-minute event counts inside `window`; no rows is an empty vector
    async fn fetch_series(&self, window: TimeWindow) -> Result<Vec<Sample>, FetchError>;

    /// Up to `limit` raw event groups inside `window`, busiest first
    async fn fetch_details(
        &self,
        window: TimeWindow,
        limit: u32,
    ) -> Result<Vec<DetailRecord>, FetchError>;
}
