//! Real-time detection stream

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
///
/// One mailbox per connection; frames are `detection`, `system` and
/// `keepalive` events as JSON `data:` lines.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    trailcam_common::sse::subscribe_sse(state.fanout.broadcaster(), state.settings.keepalive())
}
