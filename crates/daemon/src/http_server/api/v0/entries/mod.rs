//! Cache entry endpoints
//!
//! - `GET /` list and filter entries
//! - `GET /stats` aggregate usage
//! - `POST /promote`, `/demote`, `/evict` manual commands

use axum::routing::{get, post};
use axum::Router;

use crate::ServiceState;

pub mod demote;
pub mod evict;
pub mod list;
pub mod promote;
pub mod stats;

pub use demote::{DemoteEntryRequest, DemoteEntryResponse};
pub use evict::EvictEntryRequest;
pub use list::{ListEntriesRequest, ListEntriesResponse};
pub use promote::{PromoteEntryRequest, PromoteEntryResponse, DEFAULT_MANUAL_USER};
pub use stats::{StatsRequest, StatsResponse};

/// Actor recorded for manual commands
const API_ACTOR: &str = "api";

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/", get(list::handler))
        .route("/stats", get(stats::handler))
        .route("/promote", post(promote::handler))
        .route("/demote", post(demote::handler))
        .route("/evict", post(evict::handler))
        .with_state(state)
}
