use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;

use crate::ServiceState;

/// Server-sent events, one per registry change: `event:` carries the kind,
/// `data:` the JSON [`TierEvent`](crate::registry::TierEvent).
#[tracing::instrument(skip(state))]
pub async fn handler(
    State(state): State<ServiceState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = state.registry().subscribe();
    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = Event::default().event(event.kind.as_str()).json_data(&event);
                    return Some((sse, rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagging, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}
