use std::path::PathBuf;

use axum::extract::{Json, State};
use axum::response::IntoResponse;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::prelude::CacheReason;

use crate::http_server::api::client::{endpoint, ApiRequest};
use crate::http_server::api::v0::error::CommandError;
use crate::pool::{Job, JobOutput};
use crate::tiering::{PromoteOutcome, PromoteRequest};
use crate::ServiceState;

use super::API_ACTOR;

/// Manual promotions without a user are attributed to this one
pub const DEFAULT_MANUAL_USER: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize, clap::Args)]
pub struct PromoteEntryRequest {
    /// Canonical path of the file to cache
    pub path: PathBuf,

    /// User the promotion is attributed to
    #[arg(long)]
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoteEntryResponse {
    pub outcome: PromoteOutcome,
}

#[tracing::instrument(skip(state))]
pub async fn handler(
    State(state): State<ServiceState>,
    Json(req): Json<PromoteEntryRequest>,
) -> Result<impl IntoResponse, CommandError> {
    let user = req
        .user
        .unwrap_or_else(|| DEFAULT_MANUAL_USER.to_string());
    let job = Job::Promote(
        PromoteRequest::new(req.path, CacheReason::Manual, API_ACTOR)
            .for_user(user)
            .manual(),
    );

    let outcome = match state.jobs().submit(job).await?.wait().await? {
        JobOutput::Promoted(outcome) => outcome,
        _ => return Err(CommandError::UnexpectedOutput),
    };
    Ok((http::StatusCode::OK, Json(PromoteEntryResponse { outcome })).into_response())
}

impl ApiRequest for PromoteEntryRequest {
    type Response = PromoteEntryResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client
            .post(endpoint(base_url, "/api/v0/entries/promote"))
            .json(&self)
    }
}
