//! Integrity sweep trigger

use axum::routing::post;
use axum::Router;

use crate::ServiceState;

pub mod run;

pub use run::{SweepRequest, SweepResponse};

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/", post(run::handler))
        .with_state(state)
}
