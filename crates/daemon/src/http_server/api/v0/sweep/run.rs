use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use crate::http_server::api::client::{endpoint, ApiRequest};
use crate::http_server::api::v0::error::CommandError;
use crate::pool::{Job, JobOutput};
use crate::tiering::SweepReport;
use crate::ServiceState;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResponse {
    pub report: SweepReport,
}

#[tracing::instrument(skip(state))]
pub async fn handler(State(state): State<ServiceState>) -> Result<impl IntoResponse, CommandError> {
    let job = Job::Sweep {
        actor: "api".to_string(),
    };
    let report = match state.jobs().submit(job).await?.wait().await? {
        JobOutput::Swept(report) => report,
        _ => return Err(CommandError::UnexpectedOutput),
    };
    Ok((http::StatusCode::OK, Json(SweepResponse { report })).into_response())
}

impl ApiRequest for SweepRequest {
    type Response = SweepResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.post(endpoint(base_url, "/api/v0/sweep")).json(&self)
    }
}
