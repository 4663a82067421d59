use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::topology::{self, Topology, TopologyError};

use crate::http_server::api::client::{endpoint, ApiRequest};
use crate::http_server::api::v0::error::error_response;
use crate::ServiceState;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecheckTopologyRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyResponse {
    pub topology: Topology,
    /// Whether the re-check found a different layout
    #[serde(default)]
    pub changed: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RecheckError {
    #[error(transparent)]
    Detect(#[from] TopologyError),
    #[error("topology detection task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IntoResponse for RecheckError {
    fn into_response(self) -> Response {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "strategy_error",
            self.to_string(),
        )
    }
}

#[tracing::instrument(skip(state))]
pub async fn current(State(state): State<ServiceState>) -> impl IntoResponse {
    let response = TopologyResponse {
        topology: state.operator().topology(),
        changed: false,
    };
    (StatusCode::OK, Json(response))
}

/// Detect the mount topology again and use it for later promotions.
/// Existing entries keep their link kind.
#[tracing::instrument(skip(state))]
pub async fn handler(State(state): State<ServiceState>) -> Result<impl IntoResponse, RecheckError> {
    let config = state.config();
    let roots = config.mount_roots();
    let force_network = config.force_network_source;
    let detected = tokio::task::spawn_blocking(move || topology::detect(&roots, force_network))
        .await??;

    let previous = state.operator().topology();
    let changed = previous != detected;
    if changed {
        tracing::warn!(?previous, ?detected, "mount topology changed");
        state.operator().set_topology(detected);
    }
    Ok((
        StatusCode::OK,
        Json(TopologyResponse {
            topology: detected,
            changed,
        }),
    ))
}

impl ApiRequest for TopologyRequest {
    type Response = TopologyResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(endpoint(base_url, "/api/v0/topology"))
    }
}

impl ApiRequest for RecheckTopologyRequest {
    type Response = TopologyResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client
            .post(endpoint(base_url, "/api/v0/topology/recheck"))
            .json(&self)
    }
}
