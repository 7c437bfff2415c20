//! Process-local queue and document store.
//!
//! Used when the durable backend is unreachable at startup. Nothing here
//! survives a restart.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use cellcast_core::job::{Job, JobOutcome};
use cellcast_core::stream::StreamConfig;
use cellcast_core::types::{JobId, StreamId};
use tokio::sync::{broadcast, Mutex, Notify, RwLock};

/// Capacity of the local publish channel.
const PUBLISH_CHANNEL_CAPACITY: usize = 256;

/// A message published on a named channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub channel: String,
    pub message: String,
}

pub struct MemoryBackend {
    queue: Mutex<VecDeque<JobId>>,
    queued: Notify,
    jobs: RwLock<HashMap<JobId, Job>>,
    results: RwLock<HashMap<JobId, JobOutcome>>,
    streams: RwLock<HashMap<StreamId, StreamConfig>>,
    published: broadcast::Sender<Publication>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (published, _) = broadcast::channel(PUBLISH_CHANNEL_CAPACITY);
        Self {
            queue: Mutex::new(VecDeque::new()),
            queued: Notify::new(),
            jobs: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            streams: RwLock::new(HashMap::new()),
            published,
        }
    }

    pub async fn enqueue(&self, id: JobId) {
        self.queue.lock().await.push_back(id);
        self.queued.notify_one();
    }

    /// Pop the oldest id, waiting up to `timeout` for one to arrive.
    pub async fn dequeue(&self, timeout: Duration) -> Option<JobId> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.queued.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(id) = self.queue.lock().await.pop_front() {
                return Some(id);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Remove and return every pending id in FIFO order.
    pub async fn drain_queue(&self) -> Vec<JobId> {
        self.queue.lock().await.drain(..).collect()
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub fn publish(&self, channel: &str, message: &str) {
        // No subscribers is not an error.
        let _ = self.published.send(Publication {
            channel: channel.to_string(),
            message: message.to_string(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Publication> {
        self.published.subscribe()
    }

    pub async fn put_job(&self, job: &Job) {
        self.jobs.write().await.insert(job.id, job.clone());
    }

    pub async fn get_job(&self, id: JobId) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn put_result(&self, outcome: &JobOutcome) {
        self.results
            .write()
            .await
            .insert(outcome.job_id, outcome.clone());
    }

    pub async fn get_result(&self, id: JobId) -> Option<JobOutcome> {
        self.results.read().await.get(&id).cloned()
    }

    pub async fn put_stream(&self, config: &StreamConfig) {
        self.streams
            .write()
            .await
            .insert(config.stream_id, config.clone());
    }

    pub async fn get_stream(&self, id: StreamId) -> Option<StreamConfig> {
        self.streams.read().await.get(&id).cloned()
    }

    /// Copy out every stored document, used when promoting to the durable
    /// backend.
    pub async fn snapshot(&self) -> (Vec<Job>, Vec<JobOutcome>, Vec<StreamConfig>) {
        let jobs = self.jobs.read().await.values().cloned().collect();
        let results = self.results.read().await.values().cloned().collect();
        let streams = self.streams.read().await.values().cloned().collect();
        (jobs, results, streams)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}
