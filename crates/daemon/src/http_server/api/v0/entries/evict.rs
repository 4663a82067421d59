use std::path::PathBuf;

use axum::extract::{Json, State};
use axum::response::IntoResponse;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use crate::http_server::api::client::{endpoint, ApiRequest};
use crate::http_server::api::v0::error::CommandError;
use crate::pool::Job;
use crate::ServiceState;

use super::demote::{run_demotion, DemoteEntryResponse};
use super::API_ACTOR;

#[derive(Debug, Clone, Serialize, Deserialize, clap::Args)]
pub struct EvictEntryRequest {
    /// Canonical path of the cached file
    pub path: PathBuf,
}

/// Same as a demote, recorded as an eviction. Refused while watched.
#[tracing::instrument(skip(state))]
pub async fn handler(
    State(state): State<ServiceState>,
    Json(req): Json<EvictEntryRequest>,
) -> Result<impl IntoResponse, CommandError> {
    let job = Job::Evict {
        path: req.path.clone(),
        actor: API_ACTOR.to_string(),
    };
    let entry = run_demotion(&state, req.path, job).await?;
    Ok((http::StatusCode::OK, Json(DemoteEntryResponse { entry })).into_response())
}

impl ApiRequest for EvictEntryRequest {
    type Response = DemoteEntryResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client
            .post(endpoint(base_url, "/api/v0/entries/evict"))
            .json(&self)
    }
}
