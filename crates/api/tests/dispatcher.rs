//! Consumer loop: dequeue, execute, persist outcome, notify.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cellcast_api::engine::{submit_job, JobDispatcher, JobExecutor, ModeExecutor, ProcessingError};
use cellcast_api::parameters::ParameterRegistry;
use cellcast_core::job::{Job, JobOutcome, JobState};
use cellcast_core::submission::TaskSubmission;
use cellcast_events::{EventBus, RelayEventKind};
use cellcast_store::Backend;
use common::{eventually, png_base64};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const POP: Duration = Duration::from_millis(20);

fn submission(mode: &str, image: String) -> TaskSubmission {
    TaskSubmission {
        mode: mode.into(),
        image,
    }
}

fn mode_dispatcher(backend: &Arc<Backend>, bus: &Arc<EventBus>) -> JobDispatcher {
    let executor = Arc::new(ModeExecutor::new(Arc::new(ParameterRegistry::builtin())));
    JobDispatcher::new(Arc::clone(backend), executor, Arc::clone(bus), POP)
}

async fn wait_for_result(backend: &Arc<Backend>, id: Uuid) -> JobOutcome {
    eventually(|| async { backend.get_result(id).await.unwrap().is_some() }).await;
    backend.get_result(id).await.unwrap().unwrap()
}

/// Records the order jobs are executed in.
#[derive(Default)]
struct RecordingExecutor {
    seen: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl JobExecutor for RecordingExecutor {
    async fn execute(&self, job: &Job) -> Result<serde_json::Value, ProcessingError> {
        self.seen.lock().unwrap().push(job.id);
        Ok(serde_json::json!({"ok": true}))
    }
}

struct FailingExecutor;

#[async_trait]
impl JobExecutor for FailingExecutor {
    async fn execute(&self, _job: &Job) -> Result<serde_json::Value, ProcessingError> {
        Err(ProcessingError::Internal("boom".into()))
    }
}

/// Panics on its first job, then succeeds.
#[derive(Default)]
struct PanicsOnce {
    panicked: AtomicBool,
}

#[async_trait]
impl JobExecutor for PanicsOnce {
    async fn execute(&self, _job: &Job) -> Result<serde_json::Value, ProcessingError> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("kernel exploded");
        }
        Ok(serde_json::json!({"ok": true}))
    }
}

// ---------------------------------------------------------------------------
// Test: direct processing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn png_job_completes_with_grayscale_image() {
    let backend = Backend::memory_only();
    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();
    let dispatcher = mode_dispatcher(&backend, &bus);

    let job = submit_job(&backend, submission("edge_detect", png_base64(3, 2)))
        .await
        .unwrap();
    assert_eq!(backend.dequeue(POP).await.unwrap(), Some(job.id));
    dispatcher.process(job.id).await;

    let outcome = backend.get_result(job.id).await.unwrap().unwrap();
    assert_eq!(outcome.state, JobState::Completed);
    let result = outcome.result.unwrap();
    assert_eq!(result["mode"], "edge_detect");
    assert!(result["parameters"]["A"].is_array());
    assert_eq!(result["image"]["format"], "gray8");
    assert_eq!(result["image"]["width"], 3);
    assert_eq!(result["image"]["height"], 2);
    let data = STANDARD
        .decode(result["image"]["data"].as_str().unwrap())
        .unwrap();
    assert_eq!(data.len(), 6);

    let stored = backend.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Completed);

    let event = events.recv().await.unwrap();
    assert_eq!(
        event.kind,
        RelayEventKind::JobFinished {
            job_id: job.id,
            state: JobState::Completed
        }
    );
}

#[tokio::test]
async fn undecodable_image_fails_the_job() {
    let backend = Backend::memory_only();
    let bus = Arc::new(EventBus::default());
    let dispatcher = mode_dispatcher(&backend, &bus);

    // Valid base64, but not an image.
    let job = submit_job(&backend, submission("edge_detect", "aGVsbG8=".into()))
        .await
        .unwrap();
    dispatcher.process(job.id).await;

    let outcome = backend.get_result(job.id).await.unwrap().unwrap();
    assert_eq!(outcome.state, JobState::Failed);
    assert!(outcome.error.unwrap().contains("could not be decoded"));
    assert_eq!(
        backend.get_job(job.id).await.unwrap().unwrap().state,
        JobState::Failed
    );
}

#[tokio::test]
async fn executor_error_fails_the_job() {
    let backend = Backend::memory_only();
    let bus = Arc::new(EventBus::default());
    let dispatcher =
        JobDispatcher::new(Arc::clone(&backend), Arc::new(FailingExecutor), bus, POP);

    let job = submit_job(&backend, submission("inversion", png_base64(1, 1)))
        .await
        .unwrap();
    dispatcher.process(job.id).await;

    let outcome = backend.get_result(job.id).await.unwrap().unwrap();
    assert_eq!(outcome.state, JobState::Failed);
    assert_eq!(outcome.error.as_deref(), Some("Processing failed: boom"));
}

#[tokio::test]
async fn missing_payload_is_reported() {
    let backend = Backend::memory_only();
    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();
    let dispatcher = mode_dispatcher(&backend, &bus);

    let id = Uuid::new_v4();
    dispatcher.process(id).await;

    let outcome = backend.get_result(id).await.unwrap().unwrap();
    assert_eq!(outcome.state, JobState::Failed);
    assert_eq!(outcome.error.as_deref(), Some("Job payload not found"));
    assert_eq!(events.recv().await.unwrap().finished_job(), Some(id));
}

#[tokio::test]
async fn finished_jobs_are_not_rerun() {
    let backend = Backend::memory_only();
    let bus = Arc::new(EventBus::default());
    let executor = Arc::new(RecordingExecutor::default());
    let dispatcher = JobDispatcher::new(Arc::clone(&backend), executor.clone(), bus, POP);

    let mut job = Job::new(submission("inversion", png_base64(1, 1)));
    job.transition(JobState::Processing);
    job.transition(JobState::Completed);
    backend.put_job(&job).await.unwrap();

    dispatcher.process(job.id).await;
    assert!(executor.seen.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Test: the loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn loop_executes_in_submission_order() {
    let backend = Backend::memory_only();
    let bus = Arc::new(EventBus::default());
    let executor = Arc::new(RecordingExecutor::default());
    let dispatcher = JobDispatcher::new(Arc::clone(&backend), executor.clone(), bus, POP);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let job = submit_job(&backend, submission("inversion", png_base64(1, 1)))
            .await
            .unwrap();
        ids.push(job.id);
    }

    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();
    let handle = tokio::spawn(async move { dispatcher.run(loop_cancel).await });

    let last = *ids.last().unwrap();
    wait_for_result(&backend, last).await;
    assert_eq!(*executor.seen.lock().unwrap(), ids);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn loop_survives_a_failed_job() {
    let backend = Backend::memory_only();
    let bus = Arc::new(EventBus::default());
    let dispatcher = mode_dispatcher(&backend, &bus);

    let bad = submit_job(&backend, submission("edge_detect", "aGVsbG8=".into()))
        .await
        .unwrap();
    let good = submit_job(&backend, submission("edge_detect", png_base64(2, 2)))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();
    let handle = tokio::spawn(async move { dispatcher.run(loop_cancel).await });

    assert_eq!(wait_for_result(&backend, bad.id).await.state, JobState::Failed);
    assert_eq!(
        wait_for_result(&backend, good.id).await.state,
        JobState::Completed
    );

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn cancel_stops_an_idle_loop() {
    let backend = Backend::memory_only();
    let bus = Arc::new(EventBus::default());
    let dispatcher = mode_dispatcher(&backend, &bus);

    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();
    let handle = tokio::spawn(async move { dispatcher.run(loop_cancel).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    // Bounded by one pop timeout.
    tokio::time::timeout(Duration::from_millis(500), handle)
        .await
        .expect("dispatcher did not stop")
        .unwrap();
}

#[tokio::test]
async fn closed_store_ends_the_loop() {
    let backend = Backend::memory_only();
    let bus = Arc::new(EventBus::default());
    let dispatcher = mode_dispatcher(&backend, &bus);

    let handle = tokio::spawn(async move { dispatcher.run(CancellationToken::new()).await });
    backend.close().await;

    tokio::time::timeout(Duration::from_millis(500), handle)
        .await
        .expect("dispatcher did not stop")
        .unwrap();
}

#[tokio::test]
async fn panicking_executor_fails_the_job_and_loop_continues() {
    let backend = Backend::memory_only();
    let bus = Arc::new(EventBus::default());
    let dispatcher = JobDispatcher::new(
        Arc::clone(&backend),
        Arc::new(PanicsOnce::default()),
        bus,
        POP,
    );

    let first = submit_job(&backend, submission("inversion", png_base64(1, 1)))
        .await
        .unwrap();
    let second = submit_job(&backend, submission("inversion", png_base64(1, 1)))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();
    let handle = tokio::spawn(async move { dispatcher.run(loop_cancel).await });

    let failed = wait_for_result(&backend, first.id).await;
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(
        failed.error.as_deref(),
        Some("Processing panicked: kernel exploded")
    );
    assert_eq!(
        backend.get_job(first.id).await.unwrap().unwrap().state,
        JobState::Failed
    );
    assert_eq!(
        wait_for_result(&backend, second.id).await.state,
        JobState::Completed
    );
    assert!(!handle.is_finished());

    cancel.cancel();
    handle.await.unwrap();
}
