//! Server-Sent Events (SSE) for outlier notifications

use axum::{
    extract::State,
    response::{IntoResponse, Response},
};
use ctm_common::sse::create_event_sse_stream;

use crate::error::ApiError;
use crate::AppState;

/// GET /events - SSE stream of outlier events
///
/// Opens with a `connection` event, then forwards every new outlier as an
/// `outlier` event. Answers 503 once the subscriber limit is reached.
pub async fn event_stream(State(state): State<AppState>) -> Response {
    match state.event_bus.try_subscribe() {
        Some(rx) => create_event_sse_stream("ctm-ingest", rx).into_response(),
        None => ApiError::Unavailable(format!(
            "Too many event subscribers (limit {})",
            state.event_bus.max_subscribers()
        ))
        .into_response(),
    }
}
