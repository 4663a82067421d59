use axum::Router;

use crate::ServiceState;

pub mod entries;
pub mod error;
pub mod events;
pub mod operations;
pub mod sweep;
pub mod topology;
pub mod users;

pub use error::{CommandError, ErrorBody, QueryError};

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .nest("/entries", entries::router(state.clone()))
        .nest("/users", users::router(state.clone()))
        .nest("/operations", operations::router(state.clone()))
        .nest("/sweep", sweep::router(state.clone()))
        .nest("/topology", topology::router(state.clone()))
        .nest("/events", events::router(state.clone()))
        .with_state(state)
}
