//! Real-time stream events and the mailbox broadcaster
//!
//! Every connected real-time subscriber owns a private mailbox (an unbounded
//! FIFO channel). Publishing enqueues the event to each live mailbox:
//! - Publishers never block; a slow consumer only lags its own mailbox
//! - Per-subscriber delivery order equals publish order
//! - A mailbox whose receiver is gone is pruned on the next publish
//!
//! No ordering is promised across subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Frame type carried on the real-time stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventKind {
    /// An accepted detection
    Detection,
    /// A system-health snapshot
    System,
    /// Idle-connection keepalive
    Keepalive,
}

impl StreamEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamEventKind::Detection => "detection",
            StreamEventKind::System => "system",
            StreamEventKind::Keepalive => "keepalive",
        }
    }
}

/// One real-time frame: `{"type": ..., "data": ..., "timestamp": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: StreamEventKind,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl StreamEvent {
    pub fn new(kind: StreamEventKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn detection(data: serde_json::Value) -> Self {
        Self::new(StreamEventKind::Detection, data)
    }

    pub fn system(data: serde_json::Value) -> Self {
        Self::new(StreamEventKind::System, data)
    }

    pub fn keepalive() -> Self {
        Self::new(StreamEventKind::Keepalive, serde_json::Value::Null)
    }
}

/// A subscriber's private queue
///
/// Dropping the mailbox closes the channel; the broadcaster prunes it on the
/// next publish.
pub struct Mailbox {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl Mailbox {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next event; `None` once the broadcaster dropped this mailbox
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for tests and draining
    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.rx.try_recv().ok()
    }
}

/// Registry of live mailboxes
///
/// Constructed once per process and shared by cloning (cheap `Arc` clone).
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    mailboxes: Arc<Mutex<HashMap<Uuid, mpsc::UnboundedSender<StreamEvent>>>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::UnboundedSender<StreamEvent>>> {
        self.mailboxes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new subscriber and hand back its mailbox
    pub fn subscribe(&self) -> Mailbox {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let count = {
            let mut registry = self.registry();
            registry.insert(id, tx);
            registry.len()
        };
        debug!(subscriber = %id, subscribers = count, "Real-time subscriber registered");
        Mailbox { id, rx }
    }

    /// Remove a subscriber explicitly (e.g. when its stream ends)
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        self.registry().remove(&id).is_some()
    }

    /// Enqueue `event` to every live mailbox
    ///
    /// Returns the number of mailboxes that accepted the event. Mailboxes
    /// whose receiver has gone away are pruned.
    pub fn publish(&self, event: StreamEvent) -> usize {
        let mut registry = self.registry();
        let mut dead = Vec::new();
        let mut delivered = 0;

        for (id, tx) in registry.iter() {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }

        for id in &dead {
            registry.remove(id);
            debug!(subscriber = %id, "Pruned closed real-time subscriber");
        }

        delivered
    }

    /// Number of registered mailboxes (including any not yet pruned)
    pub fn subscriber_count(&self) -> usize {
        self.registry().len()
    }
}
