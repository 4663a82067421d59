//! Operation log endpoints

use axum::routing::get;
use axum::Router;

use crate::ServiceState;

pub mod list;

pub use list::{OperationsRequest, OperationsResponse};

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/", get(list::handler))
        .with_state(state)
}
