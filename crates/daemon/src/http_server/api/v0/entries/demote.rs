use std::path::PathBuf;

use axum::extract::{Json, State};
use axum::response::IntoResponse;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::prelude::CacheEntry;

use crate::http_server::api::client::{endpoint, ApiRequest};
use crate::http_server::api::v0::error::CommandError;
use crate::pool::{Job, JobOutput};
use crate::tiering::{DemoteOutcome, TierError};
use crate::ServiceState;

use super::API_ACTOR;

#[derive(Debug, Clone, Serialize, Deserialize, clap::Args)]
pub struct DemoteEntryRequest {
    /// Canonical path of the cached file
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoteEntryResponse {
    pub entry: CacheEntry,
}

/// Run a demote-like job and insist something was cached.
pub(super) async fn run_demotion(
    state: &ServiceState,
    path: PathBuf,
    job: Job,
) -> Result<CacheEntry, CommandError> {
    match state.jobs().submit(job).await?.wait().await? {
        JobOutput::Demoted(
            DemoteOutcome::Demoted { entry } | DemoteOutcome::Superseded { entry },
        ) => Ok(entry),
        JobOutput::Demoted(DemoteOutcome::NotCached) => Err(TierError::NotFound(path).into()),
        _ => Err(CommandError::UnexpectedOutput),
    }
}

#[tracing::instrument(skip(state))]
pub async fn handler(
    State(state): State<ServiceState>,
    Json(req): Json<DemoteEntryRequest>,
) -> Result<impl IntoResponse, CommandError> {
    let job = Job::Demote {
        path: req.path.clone(),
        actor: API_ACTOR.to_string(),
    };
    let entry = run_demotion(&state, req.path, job).await?;
    Ok((http::StatusCode::OK, Json(DemoteEntryResponse { entry })).into_response())
}

impl ApiRequest for DemoteEntryRequest {
    type Response = DemoteEntryResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client
            .post(endpoint(base_url, "/api/v0/entries/demote"))
            .json(&self)
    }
}
