//! Per-user endpoints

use axum::routing::get;
use axum::Router;

use crate::ServiceState;

pub mod stats;

pub use stats::{UserStatsRequest, UserStatsResponse};

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/:user/stats", get(stats::handler))
        .with_state(state)
}
