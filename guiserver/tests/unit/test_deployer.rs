//! Deployer end to end tests

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::Router;
use guiserver::bundles::deployer::DeployerOptions;
use guiserver::bundles::models::DeploymentStatus;
use guiserver::http::client::HttpClient;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::support::{bundle, completed, user, Harness, TIMEOUT};

#[tokio::test]
async fn test_import_runs_to_completion() {
    let mut harness = Harness::start(DeployerOptions::default());

    let deployment_id = harness.import("b");
    assert_eq!(deployment_id, 0);

    let watcher_id = harness.deployer.watch(deployment_id).unwrap();
    let changes = harness.next(watcher_id).await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].status, DeploymentStatus::Started);
    assert_eq!(changes[0].queue, Some(0));

    assert_eq!(harness.wait_started().await, "b");
    harness.finish(Ok(()));

    let changes = harness.next(watcher_id).await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].status, DeploymentStatus::Completed);
    assert_eq!(changes[0].error, None);
    let encoded = serde_json::to_value(&changes[0]).unwrap();
    assert!(encoded.get("Error").is_none());
    assert!(harness.deployer.queue().is_empty());
}

#[tokio::test]
async fn test_failed_import_reports_error() {
    let mut harness = Harness::start(DeployerOptions::default());
    let (deployment_id, done) = harness.import_notified("b");

    harness.wait_started().await;
    harness.finish(Err("hook failed: install".to_string()));
    assert_eq!(completed(done).await, deployment_id);

    let status = harness.deployer.status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].status, DeploymentStatus::Completed);
    assert_eq!(status[0].error.as_deref(), Some("hook failed: install"));
}

#[tokio::test]
async fn test_queued_deployment_moves_up() {
    let mut harness = Harness::start(DeployerOptions::default());
    let first = harness.import("first");
    let second = harness.import("second");
    assert_eq!((first, second), (0, 1));
    assert_eq!(harness.deployer.queue(), vec![0, 1]);

    let watcher_id = harness.deployer.watch(second).unwrap();
    let changes = harness.next(watcher_id).await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].status, DeploymentStatus::Scheduled);
    assert_eq!(changes[0].queue, Some(1));

    assert_eq!(harness.wait_started().await, "first");
    harness.finish(Ok(()));

    let changes = harness.next(watcher_id).await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].status, DeploymentStatus::Started);
    assert_eq!(changes[0].queue, Some(0));

    assert_eq!(harness.wait_started().await, "second");
    harness.finish(Ok(()));
    let changes = harness.next(watcher_id).await;
    assert_eq!(changes[0].status, DeploymentStatus::Completed);
}

#[tokio::test]
async fn test_cancel_scheduled_deployment() {
    let mut harness = Harness::start(DeployerOptions::default());
    harness.import("first");
    let second = harness.import("second");
    let third = harness.import("third");
    let watcher_id = harness.deployer.watch(third).unwrap();
    assert_eq!(harness.next(watcher_id).await[0].queue, Some(2));

    assert_eq!(harness.deployer.cancel(second), None);
    assert_eq!(harness.deployer.queue(), vec![0, 2]);

    let cancelled = harness.deployer.watch(second).unwrap();
    let changes = harness.next(cancelled).await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].status, DeploymentStatus::Cancelled);

    // The deployments behind the cancelled one are renumbered.
    let changes = harness.next(watcher_id).await;
    assert_eq!(changes[0].status, DeploymentStatus::Scheduled);
    assert_eq!(changes[0].queue, Some(1));

    // The cancelled import never reaches the backend.
    assert_eq!(harness.wait_started().await, "first");
    harness.finish(Ok(()));
    assert_eq!(harness.wait_started().await, "third");
    harness.finish(Ok(()));
}

#[tokio::test]
async fn test_cancel_started_deployment_fails() {
    let mut harness = Harness::start(DeployerOptions::default());
    let deployment_id = harness.import("b");
    harness.wait_started().await;

    assert_eq!(
        harness.deployer.cancel(deployment_id).as_deref(),
        Some("unable to cancel the deployment")
    );
    harness.finish(Ok(()));
}

#[tokio::test]
async fn test_cancel_head_of_queue_fails() {
    let mut harness = Harness::start(DeployerOptions::default());
    let deployment_id = harness.import("b");

    // Reported started right away, whether or not the worker has taken it.
    assert_eq!(
        harness.deployer.cancel(deployment_id).as_deref(),
        Some("unable to cancel the deployment")
    );
    assert_eq!(harness.deployer.queue(), vec![deployment_id]);

    let watcher_id = harness.deployer.watch(deployment_id).unwrap();
    let changes = harness.next(watcher_id).await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].status, DeploymentStatus::Started);

    assert_eq!(harness.wait_started().await, "b");
    harness.finish(Ok(()));
    let changes = harness.next(watcher_id).await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].status, DeploymentStatus::Completed);
}

#[tokio::test]
async fn test_cancel_deployment_moved_to_head_fails() {
    let mut harness = Harness::start(DeployerOptions::default());
    let (_, first_done) = harness.import_notified("first");
    let (second, second_done) = harness.import_notified("second");
    let watcher_id = harness.deployer.watch(second).unwrap();
    assert_eq!(harness.next(watcher_id).await[0].status, DeploymentStatus::Scheduled);

    assert_eq!(harness.wait_started().await, "first");
    harness.finish(Ok(()));
    completed(first_done).await;

    assert_eq!(
        harness.deployer.cancel(second).as_deref(),
        Some("unable to cancel the deployment")
    );
    let changes = harness.next(watcher_id).await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].status, DeploymentStatus::Started);

    assert_eq!(harness.wait_started().await, "second");
    harness.finish(Ok(()));
    assert_eq!(completed(second_done).await, second);
    assert_eq!(harness.next(watcher_id).await[0].status, DeploymentStatus::Completed);
}

#[tokio::test]
async fn test_cancel_unknown_deployment() {
    let harness = Harness::start(DeployerOptions::default());
    assert_eq!(
        harness.deployer.cancel(42).as_deref(),
        Some("deployment not found or already completed")
    );
}

#[tokio::test]
async fn test_cancel_completed_deployment() {
    let mut harness = Harness::start(DeployerOptions::default());
    let (deployment_id, done) = harness.import_notified("b");
    harness.wait_started().await;
    harness.finish(Ok(()));
    completed(done).await;

    assert_eq!(
        harness.deployer.cancel(deployment_id).as_deref(),
        Some("deployment not found or already completed")
    );
}

#[tokio::test]
async fn test_validate_unsupported_api_version() {
    let harness = Harness::start(DeployerOptions {
        api_version: "python".to_string(),
        ..Default::default()
    });
    let err = harness.deployer.validate(&user(), "b", &bundle()).await;
    assert_eq!(err.as_deref(), Some("unsupported API version: python"));
    assert_eq!(harness.backend.validated(), 0);
}

#[tokio::test]
async fn test_validate_reports_backend_error() {
    let harness = Harness::start(DeployerOptions::default());
    assert_eq!(harness.deployer.validate(&user(), "b", &bundle()).await, None);

    let broken = serde_yaml::from_str("services:\n  broken: {charm: broken}\n").unwrap();
    let err = harness.deployer.validate(&user(), "b", &broken).await;
    assert_eq!(err.as_deref(), Some("charm not found: broken"));
    assert_eq!(harness.backend.validated(), 2);
}

#[tokio::test]
async fn test_watch_unknown_deployment() {
    let harness = Harness::start(DeployerOptions::default());
    assert_eq!(harness.deployer.watch(0), None);
    assert_eq!(harness.deployer.next(0).await, None);
}

#[tokio::test]
async fn test_concurrent_next_on_same_watcher() {
    let mut harness = Harness::start(DeployerOptions::default());
    let deployment_id = harness.import("b");
    let watcher_id = harness.deployer.watch(deployment_id).unwrap();
    harness.next(watcher_id).await;

    let deployer = harness.deployer.clone();
    let pending = tokio::spawn(async move { deployer.next(watcher_id).await });
    // Give the first read time to register as waiting.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(harness.deployer.next(watcher_id).await, None);

    harness.wait_started().await;
    harness.finish(Ok(()));
    let changes = tokio::time::timeout(TIMEOUT, pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(changes[0].status, DeploymentStatus::Completed);
}

#[tokio::test]
async fn test_status_lists_terminal_changes_in_order() {
    let mut harness = Harness::start(DeployerOptions::default());
    let mut done = Vec::new();
    for name in ["one", "two", "three"] {
        done.push(harness.import_notified(name));
    }

    for (index, (deployment_id, rx)) in done.into_iter().enumerate() {
        harness.wait_started().await;
        let outcome = if index == 1 {
            Err("boom".to_string())
        } else {
            Ok(())
        };
        harness.finish(outcome);
        assert_eq!(completed(rx).await, deployment_id);
    }

    let status = harness.deployer.status();
    let ids: Vec<_> = status.iter().map(|change| change.deployment_id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert!(status
        .iter()
        .all(|change| change.status == DeploymentStatus::Completed));
    assert_eq!(status[0].error, None);
    assert_eq!(status[1].error.as_deref(), Some("boom"));
    assert_eq!(status[2].error, None);
}

#[tokio::test]
async fn test_retention_evicts_oldest_finished_deployments() {
    let mut harness = Harness::start(DeployerOptions {
        retain_completed: Some(1),
        ..Default::default()
    });
    let (first, first_done) = harness.import_notified("one");
    let (second, second_done) = harness.import_notified("two");
    let first_watcher = harness.deployer.watch(first).unwrap();

    harness.wait_started().await;
    harness.finish(Ok(()));
    completed(first_done).await;

    // A single finished deployment is within the limit.
    assert_eq!(harness.deployer.status().len(), 2);

    harness.wait_started().await;
    harness.finish(Ok(()));
    completed(second_done).await;

    let status = harness.deployer.status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].deployment_id, second);
    assert_eq!(harness.deployer.watch(first), None);
    assert_eq!(harness.deployer.next(first_watcher).await, None);

    // Scheduled deployments are never evicted.
    let third = harness.import("three");
    assert_eq!(harness.deployer.queue(), vec![third]);
}

async fn counter_server() -> (String, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route(
            "/api/3/bundle/{*rest}",
            get(|State(tx): State<mpsc::UnboundedSender<String>>, Path(rest): Path<String>| async move {
                let _ = tx.send(rest);
                "ok"
            }),
        )
        .with_state(tx);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (format!("http://{}", addr), rx)
}

#[tokio::test]
async fn test_successful_import_increments_counter() {
    let (url, mut increments) = counter_server().await;
    let counter = Arc::new(HttpClient::new(&url).unwrap());
    let mut harness = Harness::start_with_counter(DeployerOptions::default(), Some(counter));

    let bundle_id = "~who/basket/1/bundle".to_string();
    harness
        .deployer
        .import_bundle(&user(), "b", bundle(), Some(bundle_id), None);
    harness.wait_started().await;
    harness.finish(Ok(()));

    let path = tokio::time::timeout(TIMEOUT, increments.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(path, "~who/basket/1/bundle/metric/deployments/increment");
}

#[tokio::test]
async fn test_counter_skipped_on_failure() {
    let (url, mut increments) = counter_server().await;
    let counter = Arc::new(HttpClient::new(&url).unwrap());
    let mut harness = Harness::start_with_counter(DeployerOptions::default(), Some(counter));

    let failing = harness.deployer.import_bundle(
        &user(),
        "failing",
        bundle(),
        Some("failing/1".to_string()),
        None,
    );
    let watcher_id = harness.deployer.watch(failing).unwrap();
    harness.wait_started().await;
    harness.finish(Err("boom".to_string()));
    assert_eq!(harness.next(watcher_id).await[0].error.as_deref(), Some("boom"));

    let waited = tokio::time::timeout(std::time::Duration::from_millis(200), increments.recv()).await;
    assert!(waited.is_err());
}

#[tokio::test]
async fn test_counter_incremented_with_completion_callback() {
    let (url, mut increments) = counter_server().await;
    let counter = Arc::new(HttpClient::new(&url).unwrap());
    let mut harness = Harness::start_with_counter(DeployerOptions::default(), Some(counter));

    let (tx, done) = tokio::sync::oneshot::channel();
    let deployment_id = harness.deployer.import_bundle(
        &user(),
        "callback",
        bundle(),
        Some("callback/1".to_string()),
        Some(Box::new(move |deployment_id| {
            let _ = tx.send(deployment_id);
        })),
    );
    harness.wait_started().await;
    harness.finish(Ok(()));
    assert_eq!(completed(done).await, deployment_id);

    let path = tokio::time::timeout(TIMEOUT, increments.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(path, "callback/1/metric/deployments/increment");
}
