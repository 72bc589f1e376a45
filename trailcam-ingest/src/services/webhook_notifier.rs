//! Outbound webhook delivery
//!
//! One call to [`WebhookNotifier::trigger`] delivers one event to one
//! subscriber: eligibility check, signed POST, bounded retries, then a
//! counter update on the subscriber row. Delivery is at-least-once; a
//! subscriber that times out after receiving the body may see it again.

use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use sqlx::SqlitePool;
use std::time::Duration;

use crate::db::webhooks;
use crate::models::{WebhookEvent, WebhookSubscriber};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const ID_HEADER: &str = "X-Webhook-Id";
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

const USER_AGENT: &str = concat!("trailcam-webhook/", env!("CARGO_PKG_VERSION"));

/// Why a subscriber was not contacted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Inactive,
    EventType,
    Filtered,
}

/// Result of one delivery sequence
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32, status: u16 },
    Skipped(SkipReason),
    Failed { attempts: u32, error: String },
}

impl DeliveryOutcome {
    pub fn delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// `sha256=<hex>` HMAC over the exact body bytes
pub fn sign_payload(secret: &str, body: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body.as_bytes());
    Some(format!("sha256={:x}", mac.finalize().into_bytes()))
}

/// Envelope sent to subscribers
///
/// `serde_json` maps keep keys sorted, so the serialized body is canonical
/// and the signature covers exactly what goes on the wire.
pub fn build_body(event: WebhookEvent, payload: &Value) -> Value {
    let key = match event {
        WebhookEvent::SystemAlert => "alert",
        WebhookEvent::Test => "test",
        _ => "detection",
    };
    json!({
        "event": event.as_str(),
        key: payload,
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

/// Eligibility check; `None` means the subscriber should be contacted
pub fn skip_reason(
    subscriber: &WebhookSubscriber,
    payload: &Value,
    event: WebhookEvent,
) -> Option<SkipReason> {
    if !subscriber.is_active {
        return Some(SkipReason::Inactive);
    }
    if !subscriber.event_type.accepts(event) {
        return Some(SkipReason::EventType);
    }
    if !subscriber.filters.matches(payload) {
        return Some(SkipReason::Filtered);
    }
    None
}

pub struct WebhookNotifier {
    http_client: reqwest::Client,
    db: SqlitePool,
}

impl WebhookNotifier {
    pub fn new(db: SqlitePool) -> Self {
        // Builder only fails on TLS backend init; fall back to the default client
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { http_client, db }
    }

    /// Deliver `payload` to one subscriber
    pub async fn trigger(
        &self,
        subscriber: &WebhookSubscriber,
        payload: &Value,
        event: WebhookEvent,
    ) -> DeliveryOutcome {
        if let Some(reason) = skip_reason(subscriber, payload, event) {
            tracing::debug!(webhook_id = subscriber.id, ?reason, "Webhook skipped");
            return DeliveryOutcome::Skipped(reason);
        }

        let body = build_body(event, payload).to_string();
        let signature = subscriber
            .secret
            .as_deref()
            .and_then(|secret| sign_payload(secret, &body));

        let max_attempts = subscriber.retry_count + 1;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.send_once(subscriber, event, &body, signature.as_deref()).await {
                Ok(status) => {
                    tracing::debug!(webhook_id = subscriber.id, attempt, status, "Webhook delivered");
                    self.record_success(subscriber.id).await;
                    return DeliveryOutcome::Delivered {
                        attempts: attempt,
                        status,
                    };
                }
                Err(error) => {
                    tracing::debug!(webhook_id = subscriber.id, attempt, %error, "Webhook attempt failed");
                    last_error = error;
                }
            }

            if attempt < max_attempts && subscriber.retry_delay > 0 {
                tokio::time::sleep(Duration::from_secs(subscriber.retry_delay)).await;
            }
        }

        tracing::warn!(
            webhook_id = subscriber.id,
            url = %subscriber.url,
            attempts = max_attempts,
            error = %last_error,
            "Webhook delivery failed"
        );
        self.record_failure(subscriber.id, &last_error).await;

        DeliveryOutcome::Failed {
            attempts: max_attempts,
            error: last_error,
        }
    }

    /// One POST; `Ok(status)` only for 2xx
    async fn send_once(
        &self,
        subscriber: &WebhookSubscriber,
        event: WebhookEvent,
        body: &str,
        signature: Option<&str>,
    ) -> Result<u16, String> {
        let mut request = self
            .http_client
            .post(&subscriber.url)
            .timeout(Duration::from_secs(subscriber.timeout))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(EVENT_HEADER, event.as_str())
            .header(ID_HEADER, subscriber.id.to_string())
            .header(
                TIMESTAMP_HEADER,
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            );

        for (name, value) in &subscriber.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.body(body.to_string()).send().await.map_err(|e| {
            if e.is_timeout() {
                format!("timeout after {}s", subscriber.timeout)
            } else {
                format!("connection error: {}", e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(format!("HTTP {}", status.as_u16()))
        }
    }

    async fn record_success(&self, id: i64) {
        let result = retry_on_lock("webhook success", DEFAULT_MAX_LOCK_WAIT, || {
            webhooks::record_success(&self.db, id, Utc::now())
        })
        .await;
        if let Err(e) = result {
            tracing::warn!(webhook_id = id, "Failed to record webhook success: {}", e);
        }
    }

    async fn record_failure(&self, id: i64, error: &str) {
        let result = retry_on_lock("webhook failure", DEFAULT_MAX_LOCK_WAIT, || {
            webhooks::record_failure(&self.db, id, error)
        })
        .await;
        if let Err(e) = result {
            tracing::warn!(webhook_id = id, "Failed to record webhook failure: {}", e);
        }
    }
}
