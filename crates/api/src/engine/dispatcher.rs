//! Job submission and the consumer loop.
//!
//! Submission persists the job and enqueues its id. The single consumer
//! loop pops ids with a bounded timeout, runs the [`JobExecutor`], stores
//! the terminal outcome and announces it on the event bus. It is the only
//! writer of job results.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use cellcast_core::job::{Job, JobOutcome, JobState};
use cellcast_core::submission::TaskSubmission;
use cellcast_core::types::JobId;
use cellcast_events::{EventBus, RelayEvent};
use cellcast_store::{Backend, StoreError};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::engine::executor::JobExecutor;

/// Persist a validated submission and queue it for the consumer loop.
pub async fn submit_job(backend: &Backend, submission: TaskSubmission) -> Result<Job, StoreError> {
    let job = Job::new(submission);
    backend.put_job(&job).await?;
    backend.enqueue(job.id).await?;
    tracing::info!(job_id = %job.id, mode = %job.payload.mode, "Job submitted");
    Ok(job)
}

pub struct JobDispatcher {
    backend: Arc<Backend>,
    executor: Arc<dyn JobExecutor>,
    event_bus: Arc<EventBus>,
    pop_timeout: Duration,
}

impl JobDispatcher {
    pub fn new(
        backend: Arc<Backend>,
        executor: Arc<dyn JobExecutor>,
        event_bus: Arc<EventBus>,
        pop_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            executor,
            event_bus,
            pop_timeout,
        }
    }

    /// Run the consumer loop until `cancel` fires or the store closes.
    ///
    /// Cancellation is checked between pops; a pop never waits longer than
    /// the configured timeout, and a job already popped runs to completion.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            pop_timeout_ms = self.pop_timeout.as_millis() as u64,
            "Job dispatcher started",
        );

        while !cancel.is_cancelled() {
            match self.backend.dequeue(self.pop_timeout).await {
                Ok(Some(job_id)) => self.process(job_id).await,
                Ok(None) => {}
                Err(StoreError::Closed) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Dequeue failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.pop_timeout) => {}
                    }
                }
            }
        }

        tracing::info!("Job dispatcher shutting down");
    }

    /// Run one job through `Processing` to a terminal state.
    ///
    /// Every failure is recorded on the job; nothing propagates to the loop.
    pub async fn process(&self, job_id: JobId) {
        let mut job = match self.backend.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!(job_id = %job_id, "Dequeued id has no stored job");
                self.finish(None, JobOutcome::failed(job_id, "Job payload not found"))
                    .await;
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to load job");
                self.finish(None, JobOutcome::failed(job_id, format!("Failed to load job: {e}")))
                    .await;
                return;
            }
        };

        if job.state.is_terminal() {
            tracing::warn!(job_id = %job_id, state = %job.state, "Skipping already finished job");
            return;
        }

        job.transition(JobState::Processing);
        if let Err(e) = self.backend.put_job(&job).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to mark job processing");
        }
        tracing::info!(job_id = %job_id, mode = %job.payload.mode, "Job processing");

        let executed = AssertUnwindSafe(self.executor.execute(&job))
            .catch_unwind()
            .await;
        let outcome = match executed {
            Ok(Ok(result)) => JobOutcome::completed(job_id, result),
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job failed");
                JobOutcome::failed(job_id, e.to_string())
            }
            Err(panic) => {
                let reason = panic_reason(panic.as_ref());
                tracing::error!(job_id = %job_id, reason = %reason, "Job executor panicked");
                JobOutcome::failed(job_id, format!("Processing panicked: {reason}"))
            }
        };
        self.finish(Some(job), outcome).await;
    }

    async fn finish(&self, job: Option<Job>, outcome: JobOutcome) {
        let job_id = outcome.job_id;
        let state = outcome.state;

        if let Err(e) = self.backend.put_result(&outcome).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to store job result");
        }
        if let Some(mut job) = job {
            job.transition(state);
            if let Err(e) = self.backend.put_job(&job).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to update job state");
            }
        }

        self.event_bus.publish(RelayEvent::job_finished(job_id, state));
        tracing::info!(job_id = %job_id, state = %state, "Job finished");
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
