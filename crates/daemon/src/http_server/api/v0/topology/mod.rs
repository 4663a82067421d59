//! Mount topology inspection and re-check

use axum::routing::{get, post};
use axum::Router;

use crate::ServiceState;

pub mod recheck;

pub use recheck::{RecheckTopologyRequest, TopologyRequest, TopologyResponse};

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/", get(recheck::current))
        .route("/recheck", post(recheck::handler))
        .with_state(state)
}
