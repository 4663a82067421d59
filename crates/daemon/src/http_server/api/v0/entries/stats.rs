use std::collections::BTreeMap;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::prelude::Topology;

use crate::http_server::api::client::{endpoint, ApiRequest};
use crate::http_server::api::v0::error::QueryError;
use crate::registry::RegistryStatistics;
use crate::ServiceState;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub statistics: RegistryStatistics,
    pub cache_limit_bytes: u64,
    pub topology: Topology,
    /// Failed operations since startup, by error code
    pub failures: BTreeMap<String, u64>,
    pub watch_sessions: usize,
    pub queued_jobs: usize,
}

#[tracing::instrument(skip(state))]
pub async fn handler(State(state): State<ServiceState>) -> Result<impl IntoResponse, QueryError> {
    let operator = state.operator();
    let response = StatsResponse {
        statistics: state.registry().statistics().await?,
        cache_limit_bytes: operator.settings().cache_limit_bytes,
        topology: operator.topology(),
        failures: operator.failures().snapshot(),
        watch_sessions: state.sessions().len(),
        queued_jobs: state.jobs().queued(),
    };
    Ok((http::StatusCode::OK, Json(response)).into_response())
}

impl ApiRequest for StatsRequest {
    type Response = StatsResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(endpoint(base_url, "/api/v0/entries/stats"))
    }
}
