//! Error bodies shared by the v0 endpoints
//!
//! Every failure is returned as `{"code": ..., "reason": ...}` where `code`
//! is one of the tiering taxonomy codes.

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::pool::PoolError;
use crate::registry::RegistryError;
use crate::tiering::TierError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub reason: String,
}

pub(crate) fn error_response(status: StatusCode, code: &str, reason: String) -> Response {
    (
        status,
        Json(ErrorBody {
            code: code.to_string(),
            reason,
        }),
    )
        .into_response()
}

/// Failure of a manual command
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Tier(TierError),
    #[error("worker pool unavailable: {0}")]
    Pool(PoolError),
    #[error("unexpected job output")]
    UnexpectedOutput,
}

impl From<TierError> for CommandError {
    fn from(err: TierError) -> Self {
        CommandError::Tier(err)
    }
}

impl From<PoolError> for CommandError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Tier(err) => CommandError::Tier(err),
            other => CommandError::Pool(other),
        }
    }
}

impl From<RegistryError> for CommandError {
    fn from(err: RegistryError) -> Self {
        CommandError::Tier(TierError::Registry(err))
    }
}

fn tier_status(err: &TierError) -> StatusCode {
    match err {
        TierError::Strategy(_) => StatusCode::UNPROCESSABLE_ENTITY,
        TierError::Busy { .. } => StatusCode::CONFLICT,
        TierError::NotFound(_) => StatusCode::NOT_FOUND,
        TierError::CapacityExceeded { .. } => StatusCode::INSUFFICIENT_STORAGE,
        TierError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        TierError::Transfer { .. } | TierError::Link { .. } | TierError::Registry(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        match &self {
            CommandError::Tier(err) => error_response(tier_status(err), err.code(), err.to_string()),
            CommandError::Pool(_) | CommandError::UnexpectedOutput => error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                self.to_string(),
            ),
        }
    }
}

/// Failure of a read-only query
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "registry_error",
            self.to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_busy_maps_to_conflict() {
        let err = CommandError::from(PoolError::Tier(TierError::Busy {
            path: PathBuf::from("/media/a.mkv"),
            sessions: 1,
        }));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.code, "busy");
    }

    #[test]
    fn test_not_found_status() {
        let err = CommandError::from(TierError::NotFound(PathBuf::from("/x")));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
