//! Webhook subscriber registry entries
//!
//! The `webhooks` table is owned by the management surface; this service
//! reads subscribers and updates only delivery counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Event types a subscriber can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    Detection,
    HighConfidence,
    SystemAlert,
    Test,
    /// Wildcard subscription
    All,
}

impl WebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::Detection => "detection",
            WebhookEvent::HighConfidence => "high_confidence",
            WebhookEvent::SystemAlert => "system_alert",
            WebhookEvent::Test => "test",
            WebhookEvent::All => "all",
        }
    }

    /// Whether a subscription to `self` receives `event`
    pub fn accepts(&self, event: WebhookEvent) -> bool {
        *self == WebhookEvent::All || *self == event
    }
}

impl fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "detection" => Ok(WebhookEvent::Detection),
            "high_confidence" => Ok(WebhookEvent::HighConfidence),
            "system_alert" => Ok(WebhookEvent::SystemAlert),
            "test" => Ok(WebhookEvent::Test),
            "all" | "*" => Ok(WebhookEvent::All),
            other => Err(format!("unknown webhook event type '{}'", other)),
        }
    }
}

/// Per-subscriber delivery filters; every present filter must match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookFilters {
    pub min_confidence: Option<f64>,
    /// Case-insensitive species allow-list
    pub species: Option<Vec<String>>,
    pub cameras: Option<Vec<i64>>,
}

impl WebhookFilters {
    /// Check a detection payload against the filters
    ///
    /// Payloads without the filtered field pass that filter, so non-detection
    /// events (alerts, tests) are never filtered out.
    pub fn matches(&self, detection: &serde_json::Value) -> bool {
        if let Some(min) = self.min_confidence {
            if let Some(confidence) = detection.get("confidence").and_then(|v| v.as_f64()) {
                if confidence < min {
                    return false;
                }
            }
        }

        if let Some(allowed) = self.species.as_ref().filter(|s| !s.is_empty()) {
            if let Some(species) = detection.get("species").and_then(|v| v.as_str()) {
                if !allowed.iter().any(|a| a.eq_ignore_ascii_case(species)) {
                    return false;
                }
            }
        }

        if let Some(allowed) = self.cameras.as_ref().filter(|c| !c.is_empty()) {
            if let Some(camera_id) = detection.get("camera_id").and_then(|v| v.as_i64()) {
                if !allowed.contains(&camera_id) {
                    return false;
                }
            }
        }

        true
    }
}

/// A registered webhook endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscriber {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub event_type: WebhookEvent,
    pub is_active: bool,
    pub secret: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub retry_count: u32,
    /// Seconds between attempts
    pub retry_delay: u64,
    /// Per-attempt timeout, seconds
    pub timeout: u64,
    pub filters: WebhookFilters,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl WebhookSubscriber {
    /// Subscriber with registry defaults (3 retries, 5 s delay, 10 s timeout)
    pub fn new(id: i64, url: impl Into<String>, event_type: WebhookEvent) -> Self {
        Self {
            id,
            name: String::new(),
            url: url.into(),
            event_type,
            is_active: true,
            secret: None,
            headers: BTreeMap::new(),
            retry_count: 3,
            retry_delay: 5,
            timeout: 10,
            filters: WebhookFilters::default(),
            success_count: 0,
            failure_count: 0,
            last_triggered_at: None,
            last_error: None,
        }
    }
}
