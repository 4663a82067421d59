//! HTTP API
//!
//! `/_status` carries the health probes, `/api/v0` the query and command
//! endpoints. Every request is traced.

use axum::Router;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::ServiceState;

pub mod api;
pub mod health;

pub fn router(state: ServiceState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .nest("/_status", health::router())
        .nest("/api/v0", api::v0::router(state.clone()))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
