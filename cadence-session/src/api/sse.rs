//! Server-Sent Events streams
//!
//! `/events` relays `SessionEvent` notifications from the event bus.
//! `/snapshot/stream` relays whole snapshots, starting with the current one.

use crate::api::server::AppContext;
use crate::error::Error;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keep-alive")
}

/// GET /events - SSE stream of session events
pub async fn event_stream(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("New SSE event client connected");

    let rx = ctx.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().event(event.event_type()).data(json))),
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    None
                }
            },
            Err(e) => {
                // Lagged subscriber; the next snapshot carries the truth
                warn!("SSE event stream error: {:?}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(keep_alive())
}

/// GET /snapshot/stream - SSE stream of playback snapshots
pub async fn snapshot_stream(
    State(ctx): State<AppContext>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Error> {
    debug!("New SSE snapshot client connected");

    let subscription = ctx.controller.subscribe()?;
    let stream = subscription
        .into_stream()
        .filter_map(|snapshot| async move {
            match serde_json::to_string(snapshot.as_ref()) {
                Ok(json) => Some(Ok(Event::default()
                    .event("Snapshot")
                    .id(snapshot.revision.to_string())
                    .data(json))),
                Err(e) => {
                    warn!("Failed to serialize snapshot: {}", e);
                    None
                }
            }
        });

    Ok(Sse::new(stream).keep_alive(keep_alive()))
}
