//! Job records and their lifecycle.
//!
//! A job moves `Queued -> Processing -> {Completed, Failed}`. Only the
//! dispatcher's consumer loop advances the state; everything else reads.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::submission::TaskSubmission;
use crate::types::{JobId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    /// `Completed` and `Failed` never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted unit of work together with its current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub payload: TaskSubmission,
    pub state: JobState,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// Create a freshly queued job with a new random id.
    pub fn new(payload: TaskSubmission) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4(),
            payload,
            state: JobState::Queued,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing to leave a terminal state.
    pub fn transition(&mut self, next: JobState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = next;
        self.updated_at = Utc::now();
        true
    }
}

/// Terminal record stored under the job's result key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: Timestamp,
}

impl JobOutcome {
    pub fn completed(job_id: JobId, result: serde_json::Value) -> Self {
        Self {
            job_id,
            state: JobState::Completed,
            result: Some(result),
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(job_id: JobId, error: impl Into<String>) -> Self {
        Self {
            job_id,
            state: JobState::Failed,
            result: None,
            error: Some(error.into()),
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> TaskSubmission {
        TaskSubmission {
            mode: "edge_detect".into(),
            image: "aGVsbG8=".into(),
        }
    }

    #[test]
    fn new_job_is_queued() {
        let job = Job::new(submission());
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn terminal_state_is_sticky() {
        let mut job = Job::new(submission());
        assert!(job.transition(JobState::Processing));
        assert!(job.transition(JobState::Failed));
        assert!(!job.transition(JobState::Processing));
        assert_eq!(job.state, JobState::Failed);
    }

    #[test]
    fn outcome_serializes_without_empty_fields() {
        let id = uuid::Uuid::new_v4();
        let json = serde_json::to_value(JobOutcome::failed(id, "boom")).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["error"], "boom");
        assert!(json.get("result").is_none());
    }
}
