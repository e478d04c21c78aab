mod common;

use aiengine_core::service::messages::{ResultCode, StartTrainingRequest};
use aiengine_core::ShutdownReason;
use common::Harness;
use std::fs;

fn start(pod: &str) -> StartTrainingRequest {
    StartTrainingRequest {
        pod: pod.to_string(),
        flight: "f1".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_shutdown_removes_partial_artifacts_when_idle() {
    let mut harness = Harness::start();
    let root = harness.engine.settings().storage.models_root.clone();
    let partial = root.join("trader").join("f9.partial");
    let committed = root.join("trader").join("f8");
    fs::create_dir_all(&partial).unwrap();
    fs::create_dir_all(&committed).unwrap();

    harness.engine.shutdown().await.unwrap();
    assert!(!partial.exists());
    assert!(committed.exists());

    let coordinator = harness.engine.shutdown_coordinator();
    assert!(coordinator.is_triggered());
    assert_eq!(coordinator.reason(), Some(ShutdownReason::Requested));
}

#[tokio::test]
async fn test_shutdown_waits_for_training() {
    let mut harness = Harness::start();
    harness.trainable_pod("trader").await;
    harness.trainer.hold();
    let response = harness.gateway().start_training(start("trader")).unwrap();
    assert_eq!(response.result, ResultCode::StartedTraining);

    let trainer = harness.trainer.clone();
    let releaser = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        trainer.release();
    });

    harness.engine.shutdown().await.unwrap();
    releaser.await.unwrap();
    assert!(!harness.engine.dispatcher().is_training());
    assert!(harness.engine.models().contains("trader"));
}

#[tokio::test]
async fn test_shutdown_leaves_partials_of_running_training() {
    let mut harness = Harness::start_with(|s| s.training.join_timeout_secs = 0);
    harness.trainable_pod("trader").await;
    let partial = harness
        .engine
        .settings()
        .storage
        .models_root
        .join("trader")
        .join("f1.partial");
    fs::create_dir_all(&partial).unwrap();

    harness.trainer.hold();
    harness.gateway().start_training(start("trader")).unwrap();
    harness.engine.shutdown().await.unwrap();
    assert!(partial.exists());

    harness.trainer.release();
    harness.wait_idle().await;
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let mut harness = Harness::start();
    harness.engine.shutdown().await.unwrap();
    harness.engine.shutdown().await.unwrap();
    assert!(!harness
        .engine
        .shutdown_coordinator()
        .cleanup_once(|| panic!("cleanup ran twice")));
}
