//! Webhook subscriber registry access
//!
//! Delivery only ever touches counters, `last_triggered_at` and `last_error`.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use trailcam_common::{Error, Result};

use crate::models::{format_timestamp, WebhookEvent, WebhookFilters, WebhookSubscriber};

const SELECT_COLUMNS: &str = r#"
    SELECT id, name, url, event_type, is_active, secret, headers, retry_count,
           retry_delay, timeout, filters, success_count, failure_count,
           last_triggered_at, last_error
    FROM webhooks
"#;

/// Active subscribers, in registration order
pub async fn list_active(pool: &SqlitePool) -> Result<Vec<WebhookSubscriber>> {
    let rows = sqlx::query(&format!("{} WHERE is_active = 1 ORDER BY id", SELECT_COLUMNS))
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().filter_map(subscriber_from_row).collect())
}

pub async fn load_webhook(pool: &SqlitePool, id: i64) -> Result<Option<WebhookSubscriber>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().and_then(subscriber_from_row))
}

/// Register a subscriber; returns its id
pub async fn insert_webhook(pool: &SqlitePool, subscriber: &WebhookSubscriber) -> Result<i64> {
    let headers = serde_json::to_string(&subscriber.headers)
        .map_err(|e| Error::InvalidInput(format!("headers: {}", e)))?;
    let filters = serde_json::to_string(&subscriber.filters)
        .map_err(|e| Error::InvalidInput(format!("filters: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO webhooks
            (name, url, event_type, is_active, secret, headers, retry_count,
             retry_delay, timeout, filters)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&subscriber.name)
    .bind(&subscriber.url)
    .bind(subscriber.event_type.as_str())
    .bind(subscriber.is_active)
    .bind(&subscriber.secret)
    .bind(headers)
    .bind(subscriber.retry_count as i64)
    .bind(subscriber.retry_delay as i64)
    .bind(subscriber.timeout as i64)
    .bind(filters)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn record_success(pool: &SqlitePool, id: i64, at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "UPDATE webhooks SET success_count = success_count + 1, last_triggered_at = ? WHERE id = ?",
    )
    .bind(format_timestamp(&at))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_failure(pool: &SqlitePool, id: i64, error: &str) -> Result<()> {
    sqlx::query("UPDATE webhooks SET failure_count = failure_count + 1, last_error = ? WHERE id = ?")
        .bind(error)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Decode one row; rows with an unknown event type are skipped with a warning
fn subscriber_from_row(row: &SqliteRow) -> Option<WebhookSubscriber> {
    let id: i64 = row.get("id");
    let event_type_raw: String = row.get("event_type");
    let event_type = match event_type_raw.parse::<WebhookEvent>() {
        Ok(event_type) => event_type,
        Err(e) => {
            tracing::warn!(webhook_id = id, "Skipping webhook: {}", e);
            return None;
        }
    };

    let headers_raw: String = row.get("headers");
    let headers: BTreeMap<String, String> = serde_json::from_str(&headers_raw).unwrap_or_else(|e| {
        tracing::warn!(webhook_id = id, "Ignoring malformed webhook headers: {}", e);
        BTreeMap::new()
    });

    let filters_raw: String = row.get("filters");
    let filters: WebhookFilters = serde_json::from_str(&filters_raw).unwrap_or_else(|e| {
        tracing::warn!(webhook_id = id, "Ignoring malformed webhook filters: {}", e);
        WebhookFilters::default()
    });

    let last_triggered_at = row
        .get::<Option<String>, _>("last_triggered_at")
        .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
        .map(|ts| ts.with_timezone(&Utc));

    Some(WebhookSubscriber {
        id,
        name: row.get("name"),
        url: row.get("url"),
        event_type,
        is_active: row.get("is_active"),
        secret: row
            .get::<Option<String>, _>("secret")
            .filter(|s| !s.is_empty()),
        headers,
        retry_count: row.get::<i64, _>("retry_count").max(0) as u32,
        retry_delay: row.get::<i64, _>("retry_delay").max(0) as u64,
        timeout: row.get::<i64, _>("timeout").max(1) as u64,
        filters,
        success_count: row.get("success_count"),
        failure_count: row.get("failure_count"),
        last_triggered_at,
        last_error: row.get("last_error"),
    })
}
