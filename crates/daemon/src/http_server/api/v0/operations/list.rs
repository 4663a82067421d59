use std::path::PathBuf;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::prelude::OperationLogEntry;

use crate::database::HistoryQuery;
use crate::http_server::api::client::{endpoint, ApiRequest};
use crate::http_server::api::v0::error::QueryError;
use crate::ServiceState;

#[derive(Debug, Clone, Default, Serialize, Deserialize, clap::Args)]
pub struct OperationsRequest {
    /// Only operations on this canonical path
    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Number of rows to return (default 50)
    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Only rows older than this operation id
    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationsResponse {
    pub operations: Vec<OperationLogEntry>,
    /// Pass as `before` to fetch the next page
    pub next_before: Option<i64>,
}

#[tracing::instrument(skip(state))]
pub async fn handler(
    State(state): State<ServiceState>,
    Query(req): Query<OperationsRequest>,
) -> Result<impl IntoResponse, QueryError> {
    let query = HistoryQuery {
        path: req.path,
        limit: req.limit,
        before: req.before,
    };
    let operations = state.registry().history(&query).await?;
    let next_before = operations.last().map(|op| op.id);
    Ok((
        http::StatusCode::OK,
        Json(OperationsResponse {
            operations,
            next_before,
        }),
    )
        .into_response())
}

impl ApiRequest for OperationsRequest {
    type Response = OperationsResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client
            .get(endpoint(base_url, "/api/v0/operations"))
            .query(&self)
    }
}
