//! Notification fan-out
//!
//! Accepted detections go two ways:
//! - real-time mailboxes via [`EventBroadcaster`] (best-effort, never blocks)
//! - every active webhook subscriber, each in its own task so one slow or
//!   broken endpoint never delays the others
//!
//! No ordering is promised between the two, nor across subscribers.

use futures::future::join_all;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use trailcam_common::events::{EventBroadcaster, StreamEvent};

use crate::db::webhooks;
use crate::models::{Detection, WebhookEvent, WebhookSubscriber};
use crate::services::webhook_notifier::{DeliveryOutcome, WebhookNotifier};

/// Per-subscriber results of one dispatch
pub type DispatchReport = Vec<(i64, DeliveryOutcome)>;

/// Handle returned by [`Fanout::publish_detection`]
pub struct Published {
    /// Mailboxes the detection was enqueued to
    pub mailboxes: usize,
    /// Background webhook dispatch; may be dropped to detach
    pub deliveries: JoinHandle<DispatchReport>,
}

#[derive(Clone)]
pub struct Fanout {
    db: SqlitePool,
    broadcaster: EventBroadcaster,
    notifier: Arc<WebhookNotifier>,
}

impl Fanout {
    pub fn new(db: SqlitePool, broadcaster: EventBroadcaster) -> Self {
        let notifier = Arc::new(WebhookNotifier::new(db.clone()));
        Self {
            db,
            broadcaster,
            notifier,
        }
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    /// Broadcast a persisted detection and start webhook delivery
    ///
    /// Webhooks get a `detection` event, plus `high_confidence` when `notify`.
    pub fn publish_detection(&self, detection: &Detection, notify: bool) -> Published {
        let payload = detection.to_event_json();

        let mut event_data = payload.clone();
        event_data["high_confidence"] = json!(notify);
        let mailboxes = self.broadcaster.publish(StreamEvent::detection(event_data));

        tracing::info!(
            detection_id = detection.id,
            camera_id = detection.camera_id,
            species = %detection.species,
            confidence = detection.confidence,
            mailboxes,
            "Detection published"
        );

        let fanout = self.clone();
        let deliveries = tokio::spawn(async move {
            let mut report = fanout.dispatch(WebhookEvent::Detection, payload.clone()).await;
            if notify {
                report.extend(fanout.dispatch(WebhookEvent::HighConfidence, payload).await);
            }
            report
        });

        Published {
            mailboxes,
            deliveries,
        }
    }

    /// Deliver one event to every active subscriber concurrently
    pub async fn dispatch(&self, event: WebhookEvent, payload: Value) -> DispatchReport {
        let subscribers = match webhooks::list_active(&self.db).await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                tracing::warn!(event = %event, "Cannot load webhook subscribers: {}", e);
                return Vec::new();
            }
        };
        if subscribers.is_empty() {
            return Vec::new();
        }

        let payload = Arc::new(payload);
        let handles: Vec<(i64, JoinHandle<DeliveryOutcome>)> = subscribers
            .into_iter()
            .map(|subscriber| {
                let notifier = Arc::clone(&self.notifier);
                let payload = Arc::clone(&payload);
                let id = subscriber.id;
                let handle =
                    tokio::spawn(async move { notifier.trigger(&subscriber, &payload, event).await });
                (id, handle)
            })
            .collect();

        let (ids, handles): (Vec<i64>, Vec<_>) = handles.into_iter().unzip();
        ids.into_iter()
            .zip(join_all(handles).await)
            .map(|(id, joined)| {
                let outcome = joined.unwrap_or_else(|e| DeliveryOutcome::Failed {
                    attempts: 0,
                    error: format!("delivery task failed: {}", e),
                });
                (id, outcome)
            })
            .collect()
    }

    /// Send a `test` event to one subscriber regardless of its filters
    pub async fn send_test(&self, subscriber: &WebhookSubscriber) -> DeliveryOutcome {
        let mut subscriber = subscriber.clone();
        subscriber.event_type = WebhookEvent::All;
        subscriber.filters = Default::default();
        subscriber.is_active = true;

        let payload = json!({
            "message": "Test webhook from trailcam-ingest",
            "webhook_id": subscriber.id,
        });
        self.notifier
            .trigger(&subscriber, &payload, WebhookEvent::Test)
            .await
    }

    /// Broadcast a `system` event and notify `system_alert` subscribers
    pub fn system_alert(&self, message: &str, details: Value) -> JoinHandle<DispatchReport> {
        let payload = json!({
            "level": "warning",
            "message": message,
            "details": details,
        });
        self.broadcaster.publish(StreamEvent::system(payload.clone()));
        tracing::warn!(message, "System alert raised");

        let fanout = self.clone();
        tokio::spawn(async move { fanout.dispatch(WebhookEvent::SystemAlert, payload).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trailcam_common::events::StreamEventKind;

    fn detection() -> Detection {
        Detection {
            id: 1,
            camera_id: 3,
            timestamp: Utc::now(),
            species: "Deer".into(),
            confidence: 0.86,
            image_path: "/m/Camera3/2024-01-01/a.jpg".into(),
            content_hash: None,
            raw_predictions_json: "[]".into(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_mailbox_in_order() {
        let pool = trailcam_common::db::init_in_memory().await.unwrap();
        let fanout = Fanout::new(pool, EventBroadcaster::new());
        let mut first = fanout.broadcaster().subscribe();
        let mut second = fanout.broadcaster().subscribe();

        let published = fanout.publish_detection(&detection(), true);
        assert_eq!(published.mailboxes, 2);
        assert!(published.deliveries.await.unwrap().is_empty());

        let mut later = detection();
        later.id = 2;
        fanout.publish_detection(&later, false);

        for mailbox in [&mut first, &mut second] {
            let a = mailbox.recv().await.unwrap();
            let b = mailbox.recv().await.unwrap();
            assert_eq!(a.kind, StreamEventKind::Detection);
            assert_eq!(a.data["id"], 1);
            assert_eq!(a.data["high_confidence"], true);
            assert_eq!(b.data["id"], 2);
        }
    }

    #[tokio::test]
    async fn test_system_alert_is_broadcast() {
        let pool = trailcam_common::db::init_in_memory().await.unwrap();
        let fanout = Fanout::new(pool, EventBroadcaster::new());
        let mut mailbox = fanout.broadcaster().subscribe();

        let report = fanout
            .system_alert("classifier unreachable", json!({"failures": 3}))
            .await
            .unwrap();
        assert!(report.is_empty());

        let event = mailbox.recv().await.unwrap();
        assert_eq!(event.kind, StreamEventKind::System);
        assert_eq!(event.data["message"], "classifier unreachable");
    }
}
