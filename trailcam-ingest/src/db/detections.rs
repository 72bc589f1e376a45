//! Detection persistence
//!
//! `content_hash` is the cross-path dedup key: checked live inside the insert
//! transaction and backed by the UNIQUE index, so a race between the push
//! path and the backfill sweep still yields one row.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use trailcam_common::{Error, Result};

use crate::models::{format_timestamp, Detection, NewDetection};

/// Result of a guarded insert
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(Detection),
    /// A detection with the same content hash already exists
    Duplicate,
}

/// Insert a detection in a single transaction
///
/// Any failure rolls the transaction back; no partial row is left behind.
pub async fn insert_detection(pool: &SqlitePool, new: &NewDetection) -> Result<InsertOutcome> {
    let mut tx = pool.begin().await?;

    if let Some(hash) = &new.content_hash {
        let existing = sqlx::query("SELECT id FROM detections WHERE content_hash = ?")
            .bind(hash)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            tx.rollback().await?;
            return Ok(InsertOutcome::Duplicate);
        }
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO detections
            (camera_id, timestamp, species, confidence, image_path, content_hash, raw_predictions_json)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.camera_id)
    .bind(format_timestamp(&new.timestamp))
    .bind(&new.species)
    .bind(new.confidence)
    .bind(&new.image_path)
    .bind(&new.content_hash)
    .bind(&new.raw_predictions_json)
    .execute(&mut *tx)
    .await
    .map_err(Error::from);

    let id = match inserted {
        Ok(result) => result.last_insert_rowid(),
        Err(e) if e.is_unique_violation() => {
            tx.rollback().await?;
            return Ok(InsertOutcome::Duplicate);
        }
        Err(e) => {
            tx.rollback().await?;
            return Err(e);
        }
    };

    tx.commit().await?;

    tracing::debug!(id, camera_id = new.camera_id, species = %new.species, "Detection inserted");
    Ok(InsertOutcome::Inserted(new.clone().into_detection(id)))
}

/// Whether a detection with `hash` exists
pub async fn exists_by_hash(pool: &SqlitePool, hash: &str) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM detections WHERE content_hash = ? LIMIT 1")
        .bind(hash)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Every recorded content hash (backfill pre-load)
pub async fn load_all_hashes(pool: &SqlitePool) -> Result<HashSet<String>> {
    let rows = sqlx::query("SELECT content_hash FROM detections WHERE content_hash IS NOT NULL")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| row.get::<String, _>("content_hash"))
        .collect())
}

/// Species of a camera's detections in `[since, until]`, newest first
pub async fn recent_species(
    pool: &SqlitePool,
    camera_id: i64,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<String>> {
    let rows = sqlx::query(
        r#"
        SELECT species FROM detections
        WHERE camera_id = ? AND timestamp >= ? AND timestamp <= ?
        ORDER BY timestamp DESC
        "#,
    )
    .bind(camera_id)
    .bind(format_timestamp(&since))
    .bind(format_timestamp(&until))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|row| row.get("species")).collect())
}

pub async fn count_detections(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM detections")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn load_detection(pool: &SqlitePool, id: i64) -> Result<Option<Detection>> {
    let row = sqlx::query(
        r#"
        SELECT id, camera_id, timestamp, species, confidence, image_path,
               content_hash, raw_predictions_json
        FROM detections WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| detection_from_row(&row)).transpose()
}

fn detection_from_row(row: &SqliteRow) -> Result<Detection> {
    let ts: String = row.get("timestamp");
    let timestamp = DateTime::parse_from_rfc3339(&ts)
        .map_err(|e| Error::Internal(format!("Bad detection timestamp '{}': {}", ts, e)))?
        .with_timezone(&Utc);

    Ok(Detection {
        id: row.get("id"),
        camera_id: row.get("camera_id"),
        timestamp,
        species: row.get("species"),
        confidence: row.get("confidence"),
        image_path: row.get("image_path"),
        content_hash: row.get("content_hash"),
        raw_predictions_json: row.get("raw_predictions_json"),
    })
}
