use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::prelude::{CacheEntry, CacheReason, EntryStatus};

use crate::database::EntryFilter;
use crate::http_server::api::client::{endpoint, ApiRequest};
use crate::http_server::api::v0::error::QueryError;
use crate::ServiceState;

#[derive(Debug, Clone, Default, Serialize, Deserialize, clap::Args)]
pub struct ListEntriesRequest {
    /// Only entries in this status (active, orphaned, pending_removal, removed)
    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EntryStatus>,

    /// Only entries cached for this reason
    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<CacheReason>,

    /// Only entries attributed to this user
    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u64>,

    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,

    /// Only entries created at least this many seconds ago
    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub older_than_secs: Option<u64>,

    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl From<ListEntriesRequest> for EntryFilter {
    fn from(req: ListEntriesRequest) -> Self {
        EntryFilter {
            status: req.status,
            reason: req.reason,
            user: req.user,
            min_size: req.min_size,
            max_size: req.max_size,
            older_than_secs: req.older_than_secs,
            limit: req.limit,
            offset: req.offset,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEntriesResponse {
    pub entries: Vec<CacheEntry>,
}

#[tracing::instrument(skip(state))]
pub async fn handler(
    State(state): State<ServiceState>,
    Query(req): Query<ListEntriesRequest>,
) -> Result<impl IntoResponse, QueryError> {
    let entries = state.registry().query(&req.into()).await?;
    Ok((http::StatusCode::OK, Json(ListEntriesResponse { entries })).into_response())
}

impl ApiRequest for ListEntriesRequest {
    type Response = ListEntriesResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client
            .get(endpoint(base_url, "/api/v0/entries"))
            .query(&self)
    }
}
