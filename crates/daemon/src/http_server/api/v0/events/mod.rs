//! Registry change stream

use axum::routing::get;
use axum::Router;

use crate::ServiceState;

pub mod stream;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/", get(stream::handler))
        .with_state(state)
}
