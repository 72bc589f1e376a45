//! Server-Sent Events (SSE) utilities
//!
//! Turns a subscriber mailbox into an axum SSE stream of
//! `data: <json>\n\n` frames, inserting a keepalive frame whenever the
//! mailbox has been idle for the configured interval.

use crate::events::{EventBroadcaster, Mailbox, StreamEvent};
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default idle period before a keepalive frame is sent
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Convert a stream event into an SSE `data:` frame
pub fn to_sse_event(event: &StreamEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().data(json)),
        Err(e) => {
            warn!("SSE: Failed to serialize {} event: {}", event.kind.as_str(), e);
            None
        }
    }
}

/// Stream of frames for one mailbox
///
/// Ends when the broadcaster drops the mailbox. The mailbox is unregistered
/// when the stream is dropped (client disconnect).
pub fn mailbox_stream(
    broadcaster: EventBroadcaster,
    mut mailbox: Mailbox,
    keepalive: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let guard = Unsubscribe {
        broadcaster,
        id: mailbox.id(),
    };

    async_stream::stream! {
        let _guard = guard;
        info!(subscriber = %mailbox.id(), "SSE: event stream started");

        loop {
            tokio::select! {
                received = mailbox.recv() => {
                    match received {
                        Some(event) => {
                            if let Some(frame) = to_sse_event(&event) {
                                yield Ok(frame);
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(keepalive) => {
                    debug!(subscriber = %mailbox.id(), "SSE: sending keepalive");
                    if let Some(frame) = to_sse_event(&StreamEvent::keepalive()) {
                        yield Ok(frame);
                    }
                }
            }
        }
    }
}

/// Build the SSE response for a fresh subscriber
pub fn subscribe_sse(
    broadcaster: &EventBroadcaster,
    keepalive: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mailbox = broadcaster.subscribe();
    info!(
        "New SSE client connected, total subscribers: {}",
        broadcaster.subscriber_count()
    );
    Sse::new(mailbox_stream(broadcaster.clone(), mailbox, keepalive))
}

struct Unsubscribe {
    broadcaster: EventBroadcaster,
    id: uuid::Uuid,
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        if self.broadcaster.unsubscribe(self.id) {
            debug!(subscriber = %self.id, "SSE: client disconnected");
        }
    }
}
