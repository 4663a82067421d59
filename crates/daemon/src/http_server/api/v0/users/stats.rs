use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use crate::database::UserUsage;
use crate::http_server::api::client::{endpoint, ApiRequest};
use crate::http_server::api::v0::error::QueryError;
use crate::ServiceState;

#[derive(Debug, Clone, Serialize, Deserialize, clap::Args)]
pub struct UserStatsRequest {
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStatsResponse {
    pub usage: UserUsage,
}

#[tracing::instrument(skip(state))]
pub async fn handler(
    State(state): State<ServiceState>,
    Path(user): Path<String>,
) -> Result<impl IntoResponse, QueryError> {
    let usage = state.registry().user_statistics(&user).await?;
    Ok((http::StatusCode::OK, Json(UserStatsResponse { usage })).into_response())
}

impl ApiRequest for UserStatsRequest {
    type Response = UserStatsResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        let mut url = endpoint(base_url, "/api/v0/users");
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(&self.user).push("stats");
        }
        client.get(url)
    }
}
