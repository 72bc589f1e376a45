//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and ensures the tables the
//! ingestion pipeline touches exist. Table creation is idempotent.
//!
//! `webhooks` is owned by the external CRUD surface; it is created here only
//! when absent so a fresh install (and the test suite) has a usable schema.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// SQLite busy timeout applied to every pool
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows readers (health snapshots, scanner preload) alongside the writer
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query(&format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// In-memory database with the full schema
///
/// Pinned to a single connection: every SQLite `:memory:` connection is a
/// separate database.
pub async fn init_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create every table used by the pipeline
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_detections_table(pool).await?;
    create_webhooks_table(pool).await?;
    Ok(())
}

/// Create the detections table
///
/// `content_hash` is nullable but unique when present: it is the
/// cross-path deduplication key.
pub async fn create_detections_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS detections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            camera_id INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            species TEXT NOT NULL,
            confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
            image_path TEXT NOT NULL,
            content_hash TEXT UNIQUE,
            raw_predictions_json TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_detections_camera_time ON detections (camera_id, timestamp)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the webhooks table (subscriber registry)
pub async fn create_webhooks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhooks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL DEFAULT '',
            url TEXT NOT NULL,
            event_type TEXT NOT NULL DEFAULT 'detection',
            is_active INTEGER NOT NULL DEFAULT 1,
            secret TEXT,
            headers TEXT NOT NULL DEFAULT '{}',
            retry_count INTEGER NOT NULL DEFAULT 3,
            retry_delay INTEGER NOT NULL DEFAULT 5,
            timeout INTEGER NOT NULL DEFAULT 10,
            filters TEXT NOT NULL DEFAULT '{}',
            success_count INTEGER NOT NULL DEFAULT 0,
            failure_count INTEGER NOT NULL DEFAULT 0,
            last_triggered_at TEXT,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
