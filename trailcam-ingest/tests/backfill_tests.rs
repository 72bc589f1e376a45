//! Backfill sweep over a temporary camera tree

mod helpers;

use chrono::{TimeZone, Utc};
use helpers::{MockClassifier, TestEnv};
use trailcam_ingest::db::detections;
use trailcam_ingest::models::{DetectionCandidate, IngestSource};
use trailcam_ingest::services::{ItemOutcome, ScanError};

#[tokio::test]
async fn test_sweep_saves_new_images_once() {
    let env = TestEnv::new(MockClassifier::deer()).await;
    env.write_image(1, "2024-06-01", "IMG_0001.jpg", b"one");
    env.write_image(2, "2024-06-01", "IMG_0002.PNG", b"two");
    env.write_image(2, "2024-06-01", "IMG_0002-mask.jpg", b"mask");
    env.write_image(2, "2024-06-01", "notes.txt", b"not an image");

    let first = env.state.scanner.run_once().await.unwrap();
    assert_eq!(first.saved, 2);
    assert_eq!(first.failed, 0);
    assert_eq!(first.items.len(), 2);

    let second = env.state.scanner.run_once().await.unwrap();
    assert_eq!(second.saved, 0);
    assert_eq!(second.skipped_known, 2);
    assert!(second.items.is_empty());

    assert_eq!(env.classifier.calls(), 2);
    assert_eq!(detections::count_detections(&env.state.db).await.unwrap(), 2);
}

#[tokio::test]
async fn test_sweep_skips_content_already_ingested_by_trigger() {
    let env = TestEnv::new(MockClassifier::deer()).await;
    let path = env.write_image(3, "2024-06-01", "IMG_0001.jpg", b"pushed first");

    let pushed = env
        .state
        .pipeline
        .process(DetectionCandidate::new(&path, 3, IngestSource::Trigger))
        .await;
    assert!(pushed.is_saved());

    let report = env.state.scanner.run_once().await.unwrap();
    assert_eq!(report.saved, 0);
    assert_eq!(report.skipped_known, 1);
    assert_eq!(detections::count_detections(&env.state.db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_identical_copies_in_one_sweep_yield_one_detection() {
    let env = TestEnv::new(MockClassifier::deer()).await;
    env.write_image(1, "2024-06-01", "IMG_0001.jpg", b"copied");
    env.write_image(1, "2024-06-02", "IMG_0001.jpg", b"copied");

    let report = env.state.scanner.run_once().await.unwrap();
    assert_eq!(report.saved, 1);
    assert_eq!(report.skipped_known, 1);
}

#[tokio::test]
async fn test_folders_outside_camera_layout_are_ignored() {
    let env = TestEnv::new(MockClassifier::deer()).await;
    let stray = env.media_root().join("exports").join("2024-06-01");
    std::fs::create_dir_all(&stray).unwrap();
    std::fs::write(stray.join("IMG_0001.jpg"), b"stray").unwrap();
    std::fs::write(env.media_root().join("top.jpg"), b"top level").unwrap();

    let report = env.state.scanner.run_once().await.unwrap();
    assert_eq!(report.saved, 0);
    assert_eq!(env.classifier.calls(), 0);
}

#[tokio::test]
async fn test_missing_media_root_is_an_error() {
    let env = TestEnv::new(MockClassifier::deer()).await;
    std::fs::remove_dir_all(env.media_root()).unwrap();

    let err = env.state.scanner.run_once().await.unwrap_err();
    assert!(matches!(err, ScanError::PathNotFound(_)));
}

#[tokio::test]
async fn test_latest_image_for_camera_picks_newest() {
    let env = TestEnv::new(MockClassifier::deer()).await;
    env.write_image(7, "2024-06-01", "IMG_0001.jpg", b"older");
    std::thread::sleep(std::time::Duration::from_millis(20));
    let newest = env.write_image(7, "2024-06-02", "IMG_0002.jpg", b"newer");
    env.write_image(8, "2024-06-03", "IMG_0003.jpg", b"other camera");

    let found = env.state.scanner.latest_image_for_camera(7).await;
    assert_eq!(found, Some(newest));
    assert_eq!(env.state.scanner.latest_image_for_camera(99).await, None);
}

#[tokio::test]
async fn test_sweep_stamps_detections_with_file_mtime() {
    let env = TestEnv::new(MockClassifier::deer()).await;
    let path = env.write_image(6, "2024-06-01", "IMG_0001.jpg", b"overnight");
    let modified = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_717_219_800);
    std::fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(modified)
        .unwrap();

    let report = env.state.scanner.run_once().await.unwrap();
    assert_eq!(report.saved, 1);

    let ItemOutcome::Saved { detection, .. } = &report.items[0].outcome else {
        panic!("expected saved, got {:?}", report.items[0].outcome);
    };
    let stored = detections::load_detection(&env.state.db, detection.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.timestamp, Utc.with_ymd_and_hms(2024, 6, 1, 5, 30, 0).unwrap());
}
