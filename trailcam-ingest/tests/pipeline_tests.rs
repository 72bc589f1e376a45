//! End-to-end accept path: hash, classify, analyze, persist, archive, fan out

mod helpers;

use chrono::{TimeZone, Utc};
use helpers::{wait_for, MockClassifier, TestEnv, WebhookReceiver};
use trailcam_common::events::StreamEventKind;
use trailcam_ingest::db::{detections, webhooks};
use trailcam_ingest::models::{DetectionCandidate, IngestSource, WebhookEvent, WebhookSubscriber};
use trailcam_ingest::services::webhook_notifier::{sign_payload, SIGNATURE_HEADER};
use trailcam_ingest::services::{ItemOutcome, QualityTier};

async fn register_webhook(env: &TestEnv, url: String, event: WebhookEvent, secret: Option<&str>) -> i64 {
    let mut subscriber = WebhookSubscriber::new(0, url, event);
    subscriber.name = "test receiver".into();
    subscriber.retry_delay = 0;
    subscriber.timeout = 2;
    subscriber.secret = secret.map(str::to_string);
    webhooks::insert_webhook(&env.state.db, &subscriber).await.unwrap()
}

#[tokio::test]
async fn test_trigger_image_is_saved_archived_and_published() {
    let env = TestEnv::new(MockClassifier::deer()).await;
    let receiver = WebhookReceiver::start(200).await;
    let webhook_id =
        register_webhook(&env, receiver.url(), WebhookEvent::Detection, Some("s3cret")).await;
    let mut mailbox = env.state.fanout.broadcaster().subscribe();

    let path = env.write_image(3, "2024-06-01", "IMG_0001.jpg", b"deer pixels");
    let outcome = env
        .state
        .pipeline
        .process(DetectionCandidate::new(&path, 3, IngestSource::Trigger))
        .await;

    let ItemOutcome::Saved {
        detection,
        analysis,
        archived_to,
    } = outcome
    else {
        panic!("expected saved, got {:?}", outcome);
    };

    assert_eq!(detection.species, "Deer");
    assert_eq!(detection.camera_id, 3);
    assert_eq!(analysis.quality_tier, QualityTier::High);
    assert!((detection.confidence - 0.861).abs() < 1e-9);
    assert!(analysis.should_notify);

    let expected_archive = env
        .archive_root()
        .join("Deer")
        .join("Camera3")
        .join("2024-06-01")
        .join("IMG_0001.jpg");
    assert_eq!(archived_to.as_deref(), Some(expected_archive.as_path()));
    assert_eq!(std::fs::read(&expected_archive).unwrap(), b"deer pixels");

    let event = mailbox.recv().await.unwrap();
    assert_eq!(event.kind, StreamEventKind::Detection);
    assert_eq!(event.data["id"], detection.id);
    assert_eq!(event.data["species"], "Deer");
    assert_eq!(event.data["high_confidence"], true);

    assert!(wait_for(|| receiver.hits() == 1).await);
    let request = &receiver.requests()[0];
    assert_eq!(request.header("x-webhook-event").as_deref(), Some("detection"));
    assert_eq!(
        request.header("x-webhook-id"),
        Some(webhook_id.to_string())
    );
    assert_eq!(
        request.header(SIGNATURE_HEADER),
        sign_payload("s3cret", &request.body)
    );
    let body = request.json();
    assert_eq!(body["event"], "detection");
    assert_eq!(body["detection"]["species"], "Deer");
    assert_eq!(body["detection"]["camera_id"], 3);

    assert_eq!(detections::count_detections(&env.state.db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_same_content_at_another_path_is_duplicate() {
    let env = TestEnv::new(MockClassifier::deer()).await;

    let first = env.write_image(3, "2024-06-01", "IMG_0001.jpg", b"same bytes");
    let copy = env.write_image(4, "2024-06-02", "IMG_0099.jpg", b"same bytes");

    let saved = env
        .state
        .pipeline
        .process(DetectionCandidate::new(&first, 3, IngestSource::Trigger))
        .await;
    assert!(saved.is_saved());

    let again = env
        .state
        .pipeline
        .process(DetectionCandidate::new(&copy, 4, IngestSource::Backfill))
        .await;
    assert!(matches!(again, ItemOutcome::Duplicate { .. }));

    // Known content never reaches the classifier
    assert_eq!(env.classifier.calls(), 1);
    assert_eq!(detections::count_detections(&env.state.db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_classifier_failure_is_rejected_without_side_effects() {
    let env = TestEnv::new(MockClassifier::failing()).await;
    let mut mailbox = env.state.fanout.broadcaster().subscribe();

    let path = env.write_image(1, "2024-06-01", "IMG_0001.jpg", b"blurry");
    let outcome = env
        .state
        .pipeline
        .process(DetectionCandidate::new(&path, 1, IngestSource::Manual))
        .await;

    let ItemOutcome::Rejected { analysis } = outcome else {
        panic!("expected rejected, got {:?}", outcome);
    };
    assert_eq!(analysis.quality_tier, QualityTier::Error);
    assert_eq!(analysis.species, "Unknown");
    assert!(analysis.error.is_some());

    assert_eq!(detections::count_detections(&env.state.db).await.unwrap(), 0);
    assert!(mailbox.try_recv().is_none());
    assert!(!env.archive_root().exists());
}

#[tokio::test]
async fn test_empty_predictions_rejected_by_default() {
    let env = TestEnv::new(MockClassifier::empty()).await;
    let path = env.write_image(1, "2024-06-01", "IMG_0001.jpg", b"nothing here");

    let outcome = env
        .state
        .pipeline
        .process(DetectionCandidate::new(&path, 1, IngestSource::Trigger))
        .await;

    let ItemOutcome::Rejected { analysis } = outcome else {
        panic!("expected rejected, got {:?}", outcome);
    };
    assert_eq!(analysis.quality_tier, QualityTier::NoPredictions);
    assert!((analysis.confidence - 0.1).abs() < 1e-9);
}

#[tokio::test]
async fn test_empty_predictions_fallback_saves_unknown_without_archive() {
    let env = TestEnv::with_settings(MockClassifier::empty(), |settings| {
        settings.fallback_save_on_empty = true;
    })
    .await;
    let path = env.write_image(2, "2024-06-01", "IMG_0001.jpg", b"nothing here");

    let outcome = env
        .state
        .pipeline
        .process(DetectionCandidate::new(&path, 2, IngestSource::Trigger))
        .await;

    let ItemOutcome::Saved {
        detection,
        analysis,
        archived_to,
    } = outcome
    else {
        panic!("expected saved, got {:?}", outcome);
    };
    assert_eq!(detection.species, "Unknown");
    assert!((detection.confidence - 0.2).abs() < 1e-9);
    assert!(!analysis.should_notify);
    assert!(archived_to.is_none());
}

#[tokio::test]
async fn test_low_confidence_saves_without_high_confidence_webhook() {
    let env = TestEnv::new(MockClassifier::new(Ok(vec![
        trailcam_ingest::services::RawPrediction::new("raccoon", 0.40),
    ])))
    .await;
    let receiver = WebhookReceiver::start(200).await;
    register_webhook(&env, receiver.url(), WebhookEvent::HighConfidence, None).await;

    let path = env.write_image(5, "2024-06-01", "IMG_0001.jpg", b"raccoon");
    let outcome = env
        .state
        .pipeline
        .process(DetectionCandidate::new(&path, 5, IngestSource::Trigger))
        .await;

    let ItemOutcome::Saved { detection, .. } = outcome else {
        panic!("expected saved, got {:?}", outcome);
    };
    assert_eq!(detection.species, "Raccoon");
    // Low tier: 0.40 × 0.95
    assert!((detection.confidence - 0.38).abs() < 1e-9);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(receiver.hits(), 0);
}

#[tokio::test]
async fn test_stored_predictions_are_raw_classifier_output() {
    let env = TestEnv::new(MockClassifier::deer()).await;
    let path = env.write_image(3, "2024-06-01", "IMG_0001.jpg", b"deer pixels");

    let outcome = env
        .state
        .pipeline
        .process(DetectionCandidate::new(&path, 3, IngestSource::Trigger))
        .await;
    let ItemOutcome::Saved { detection, .. } = outcome else {
        panic!("expected saved, got {:?}", outcome);
    };

    let stored = detections::load_detection(&env.state.db, detection.id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.raw_predictions_json.contains("uuid;Mammalia;Deer"));

    let raw: serde_json::Value = serde_json::from_str(&stored.raw_predictions_json).unwrap();
    assert_eq!(raw[0]["prediction"], "uuid;Mammalia;Deer");
    assert_eq!(raw[0]["prediction_score"], 0.82);
    assert_eq!(raw[1]["prediction"], "uuid;Mammalia;Fox");
}

#[tokio::test]
async fn test_capture_time_drives_timestamp_and_history_window() {
    let env = TestEnv::new(MockClassifier::deer()).await;
    let captured = Utc.with_ymd_and_hms(2024, 6, 1, 5, 30, 0).unwrap();

    let old = env.write_image(3, "2024-06-01", "IMG_0001.jpg", b"old deer");
    let outcome = env
        .state
        .pipeline
        .process(
            DetectionCandidate::new(&old, 3, IngestSource::Backfill).with_captured_at(Some(captured)),
        )
        .await;
    let ItemOutcome::Saved { detection, .. } = outcome else {
        panic!("expected saved, got {:?}", outcome);
    };
    assert_eq!(detection.timestamp, captured);
    let stored = detections::load_detection(&env.state.db, detection.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.timestamp, captured);

    // A live image does not see the older capture in its window
    let live = env.write_image(3, "2026-01-01", "IMG_0002.jpg", b"live deer");
    let outcome = env
        .state
        .pipeline
        .process(DetectionCandidate::new(&live, 3, IngestSource::Trigger))
        .await;
    let ItemOutcome::Saved { analysis, .. } = outcome else {
        panic!("expected saved, got {:?}", outcome);
    };
    assert_eq!(analysis.temporal_context.unwrap().window_size, 0);

    // An image captured shortly after the old one does
    let neighbour = env.write_image(3, "2024-06-01", "IMG_0003.jpg", b"neighbour deer");
    let outcome = env
        .state
        .pipeline
        .process(
            DetectionCandidate::new(&neighbour, 3, IngestSource::Backfill)
                .with_captured_at(Some(captured + chrono::Duration::minutes(10))),
        )
        .await;
    let ItemOutcome::Saved { analysis, .. } = outcome else {
        panic!("expected saved, got {:?}", outcome);
    };
    let context = analysis.temporal_context.unwrap();
    assert_eq!(context.window_size, 1);
    assert_eq!(context.dominant_species.as_deref(), Some("Deer"));
}
