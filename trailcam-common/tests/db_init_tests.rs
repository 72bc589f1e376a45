//! Database initialization tests

use tempfile::TempDir;
use trailcam_common::db::init::{init_database, init_in_memory};

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("trailcam.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("trailcam.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_schema_tables_exist() {
    let pool = init_in_memory().await.unwrap();

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    assert!(tables.contains(&"detections".to_string()));
    assert!(tables.contains(&"webhooks".to_string()));
}

#[tokio::test]
async fn test_content_hash_is_unique() {
    let pool = init_in_memory().await.unwrap();

    let insert = "INSERT INTO detections (camera_id, timestamp, species, confidence, image_path, content_hash) \
                  VALUES (1, '2024-01-01T00:00:00Z', 'Deer', 0.9, '/a.jpg', 'abc')";
    sqlx::query(insert).execute(&pool).await.unwrap();
    let second = sqlx::query(insert).execute(&pool).await;

    let err = trailcam_common::Error::from(second.unwrap_err());
    assert!(err.is_unique_violation());
}

#[tokio::test]
async fn test_null_content_hash_not_constrained() {
    let pool = init_in_memory().await.unwrap();

    let insert = "INSERT INTO detections (camera_id, timestamp, species, confidence, image_path) \
                  VALUES (1, '2024-01-01T00:00:00Z', 'Deer', 0.9, '/a.jpg')";
    sqlx::query(insert).execute(&pool).await.unwrap();
    sqlx::query(insert).execute(&pool).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM detections")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);
}
