//! Backend behaviour with the durable queue unreachable.
//!
//! Port 1 on loopback refuses connections, so every test here exercises the
//! in-memory fallback path through the same API the dispatcher uses.

use std::time::Duration;

use assert_matches::assert_matches;
use cellcast_core::job::{Job, JobOutcome, JobState};
use cellcast_core::stream::StreamConfig;
use cellcast_core::submission::{StreamOffer, TaskSubmission, TransformKind};
use cellcast_store::reconnect::ReconnectConfig;
use cellcast_store::{Backend, BackendConfig, BackendKind, FallbackPolicy, StoreError};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn unreachable() -> BackendConfig {
    BackendConfig::new("127.0.0.1", 1).with_connect_timeout(Duration::from_millis(500))
}

fn submission() -> TaskSubmission {
    TaskSubmission {
        mode: "edge_detect".into(),
        image: "aGVsbG8=".into(),
    }
}

// ---------------------------------------------------------------------------
// Test: fallback selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_redis_falls_back_to_memory() {
    let backend = Backend::connect(unreachable()).await;
    assert_eq!(backend.kind().await, BackendKind::Memory);
}

#[tokio::test]
async fn sticky_policy_reconnect_returns_immediately() {
    let backend = Backend::connect(unreachable()).await;
    let cancel = CancellationToken::new();

    tokio::time::timeout(Duration::from_secs(1), backend.clone().run_reconnect(cancel))
        .await
        .expect("sticky policy should not loop");
    assert_eq!(backend.kind().await, BackendKind::Memory);
}

#[tokio::test]
async fn reconnect_loop_stops_on_cancel() {
    let config = unreachable().with_policy(FallbackPolicy::Reconnect(
        ReconnectConfig::starting_at(Duration::from_millis(10)),
    ));
    let backend = Backend::connect(config).await;
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(backend.clone().run_reconnect(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("reconnect loop should exit after cancel")
        .unwrap();
    assert_eq!(backend.kind().await, BackendKind::Memory);
}

#[tokio::test]
async fn memory_keeps_serving_while_reconnecting() {
    let config = unreachable()
        .with_connect_timeout(Duration::from_millis(50))
        .with_policy(FallbackPolicy::Reconnect(ReconnectConfig::starting_at(
            Duration::from_millis(5),
        )));
    let backend = Backend::connect(config).await;
    let cancel = CancellationToken::new();
    let reconnect = tokio::spawn(backend.clone().run_reconnect(cancel.clone()));

    let ids: Vec<_> = (0..3).map(|_| uuid::Uuid::new_v4()).collect();
    for id in &ids {
        backend.enqueue(*id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    for id in &ids {
        let popped = backend.dequeue(Duration::from_millis(50)).await.unwrap();
        assert_eq!(popped, Some(*id));
    }

    assert!(!reconnect.is_finished(), "reconnect gave up while still on memory");
    cancel.cancel();
    reconnect.await.unwrap();
    assert_eq!(backend.kind().await, BackendKind::Memory);
}

#[tokio::test]
async fn failed_promotion_leaves_pending_jobs_in_memory() {
    let backend = Backend::connect(unreachable()).await;
    let job = Job::new(submission());
    backend.put_job(&job).await.unwrap();
    backend.enqueue(job.id).await.unwrap();

    assert!(backend.try_promote().await.is_err());

    assert!(!backend.is_durable().await);
    assert_eq!(
        backend.dequeue(Duration::from_millis(20)).await.unwrap(),
        Some(job.id)
    );
    assert!(backend.get_job(job.id).await.unwrap().is_some());
}

// ---------------------------------------------------------------------------
// Test: queue ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dequeue_returns_ids_in_enqueue_order() {
    let backend = Backend::memory_only();
    let ids: Vec<_> = (0..5).map(|_| uuid::Uuid::new_v4()).collect();

    for id in &ids {
        backend.enqueue(*id).await.unwrap();
    }

    let mut popped = Vec::new();
    while let Some(id) = backend.dequeue(Duration::from_millis(10)).await.unwrap() {
        popped.push(id);
    }
    assert_eq!(popped, ids);
}

#[tokio::test]
async fn dequeue_on_empty_queue_yields_none() {
    let backend = Backend::memory_only();
    let popped = backend.dequeue(Duration::from_millis(20)).await.unwrap();
    assert!(popped.is_none());
}

// ---------------------------------------------------------------------------
// Test: documents
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_document_round_trips() {
    let backend = Backend::connect(unreachable()).await;
    let mut job = Job::new(submission());
    backend.put_job(&job).await.unwrap();

    job.transition(JobState::Processing);
    backend.put_job(&job).await.unwrap();

    let stored = backend.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Processing);
    assert_eq!(stored.payload, submission());
}

#[tokio::test]
async fn missing_result_reads_as_pending() {
    let backend = Backend::memory_only();
    let id = uuid::Uuid::new_v4();
    assert!(backend.get_result(id).await.unwrap().is_none());

    backend
        .put_result(&JobOutcome::completed(id, json!({"ok": true})))
        .await
        .unwrap();
    let outcome = backend.get_result(id).await.unwrap().unwrap();
    assert_eq!(outcome.state, JobState::Completed);
    assert_eq!(outcome.result, Some(json!({"ok": true})));
}

#[tokio::test]
async fn stream_config_is_keyed_by_stream_id() {
    let backend = Backend::memory_only();
    let offer = StreamOffer {
        mode: TransformKind::Edges,
        target_fps: Some(15),
        request_type: None,
    };
    let config = StreamConfig::from_offer(&offer);
    backend.put_stream(&config).await.unwrap();

    let stored = backend.get_stream(config.stream_id).await.unwrap().unwrap();
    assert_eq!(stored, config);
    assert!(backend
        .get_stream(uuid::Uuid::new_v4())
        .await
        .unwrap()
        .is_none());
}

// ---------------------------------------------------------------------------
// Test: publish and close
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_on_memory_reaches_local_subscribers() {
    let backend = Backend::memory_only();
    let mut rx = backend.subscribe_local();
    backend
        .publish(cellcast_store::keys::CHANNEL_JOB_RESULTS, "done")
        .await
        .unwrap();

    let publication = rx.recv().await.unwrap();
    assert_eq!(publication.channel, cellcast_store::keys::CHANNEL_JOB_RESULTS);
    assert_eq!(publication.message, "done");
}

#[tokio::test]
async fn operations_after_close_fail() {
    let backend = Backend::memory_only();
    backend.close().await;

    assert!(backend.is_closed());
    let err = backend.enqueue(uuid::Uuid::new_v4()).await.unwrap_err();
    assert_matches!(err, StoreError::Closed);
}
