//! Server-Sent Events (SSE) utilities
//!
//! Turns an EventBus subscription into an SSE response.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::events::CtmEvent;

/// Heartbeat interval for idle SSE connections
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Convert an event into an SSE frame, named after the event type
pub fn to_sse_event(event: &CtmEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.event_type()).data(json)),
        Err(e) => {
            warn!("SSE: Failed to serialize event {}: {}", event.event_type(), e);
            None
        }
    }
}

/// Create an SSE stream forwarding every event from `rx`
///
/// The first frame is a `connection` greeting. A subscriber that falls behind
/// skips the missed events and keeps streaming; the stream ends when the bus
/// is dropped. Dropping the stream (client disconnect) drops `rx`, which
/// removes the subscriber from the bus.
pub fn create_event_sse_stream(
    service_name: &'static str,
    mut rx: broadcast::Receiver<CtmEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} events", service_name);

    let stream = async_stream::stream! {
        let greeting = CtmEvent::Connection {
            message: format!("Connected to {} event stream", service_name),
        };
        if let Some(frame) = to_sse_event(&greeting) {
            yield Ok(frame);
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    debug!("SSE: Forwarding {} event", event.event_type());
                    if let Some(frame) = to_sse_event(&event) {
                        yield Ok(frame);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE: Subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => {
                    info!("SSE: {} event bus closed, ending stream", service_name);
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
