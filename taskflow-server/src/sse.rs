//! Server-Sent Events stream of task and run notifications.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tracing::{debug, warn};

use crate::state::AppState;

/// SSE endpoint handler.
///
/// Each connection owns one subscription; it is released when the client
/// goes away and the stream is dropped.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = state.orchestrator.events().subscribe();
    debug!(subscriber = subscription.id(), "event stream opened");

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        while let Some(notification) = subscription.recv().await {
            match notification.data_json() {
                Ok(json) => yield Ok(Event::default().event(notification.name()).data(json)),
                Err(err) => {
                    warn!(event = notification.name(), error = %err, "failed to encode notification");
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.heartbeat_interval)
            .text("heartbeat"),
    )
}
