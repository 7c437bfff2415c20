//! Backend selection: durable Redis when reachable, memory otherwise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cellcast_core::job::{Job, JobOutcome};
use cellcast_core::stream::StreamConfig;
use cellcast_core::types::{JobId, StreamId};
use tokio::sync::{broadcast, RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;

use crate::durable::RedisBackend;
use crate::error::StoreError;
use crate::memory::{MemoryBackend, Publication};
use crate::reconnect::ReconnectConfig;

/// Default time allowed for the startup liveness check.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// What happens after falling back to memory.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackPolicy {
    /// Stay on memory for the rest of the process lifetime.
    Sticky,
    /// Keep retrying the durable backend and promote once it answers.
    Reconnect(ReconnectConfig),
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub redis_url: String,
    pub connect_timeout: Duration,
    pub policy: FallbackPolicy,
}

impl BackendConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            redis_url: format!("redis://{host}:{port}/"),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            policy: FallbackPolicy::Sticky,
        }
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Durable,
    Memory,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Durable => "durable",
            BackendKind::Memory => "memory",
        }
    }
}

/// Queue, job store and stream store behind one handle.
///
/// Every operation holds a read guard on the active route for its whole
/// duration, so a promotion (which takes the write guard) never interleaves
/// with a half-finished memory operation.
pub struct Backend {
    config: BackendConfig,
    durable: RwLock<Option<RedisBackend>>,
    memory: MemoryBackend,
    closed: AtomicBool,
}

impl Backend {
    /// Connect to the durable backend and fall back to memory if it is down.
    pub async fn connect(config: BackendConfig) -> Arc<Self> {
        let durable = match RedisBackend::connect(&config.redis_url, config.connect_timeout).await {
            Ok(redis) => {
                tracing::info!(url = %config.redis_url, "Connected to durable queue");
                Some(redis)
            }
            Err(e) => {
                tracing::warn!(
                    url = %config.redis_url,
                    error = %e,
                    "Durable queue unreachable, using in-memory queue",
                );
                None
            }
        };

        Arc::new(Self {
            config,
            durable: RwLock::new(durable),
            memory: MemoryBackend::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// A backend that never touches the network.
    pub fn memory_only() -> Arc<Self> {
        Arc::new(Self {
            config: BackendConfig::new("localhost", 6379),
            durable: RwLock::new(None),
            memory: MemoryBackend::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub async fn kind(&self) -> BackendKind {
        if self.durable.read().await.is_some() {
            BackendKind::Durable
        } else {
            BackendKind::Memory
        }
    }

    pub async fn is_durable(&self) -> bool {
        self.kind().await == BackendKind::Durable
    }

    async fn route(&self) -> Result<RwLockReadGuard<'_, Option<RedisBackend>>, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(self.durable.read().await)
    }

    pub async fn enqueue(&self, id: JobId) -> Result<(), StoreError> {
        let route = self.route().await?;
        match route.as_ref() {
            Some(redis) => redis.enqueue(id).await,
            None => {
                self.memory.enqueue(id).await;
                Ok(())
            }
        }
    }

    /// Pop the next job id, or `None` once `timeout` passes with nothing
    /// queued.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<JobId>, StoreError> {
        let route = self.route().await?;
        match route.as_ref() {
            Some(redis) => redis.dequeue(timeout).await,
            None => Ok(self.memory.dequeue(timeout).await),
        }
    }

    pub async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        let route = self.route().await?;
        match route.as_ref() {
            Some(redis) => redis.publish(channel, message).await,
            None => {
                self.memory.publish(channel, message);
                Ok(())
            }
        }
    }

    /// Publications made while running on memory.
    pub fn subscribe_local(&self) -> broadcast::Receiver<Publication> {
        self.memory.subscribe()
    }

    pub async fn put_job(&self, job: &Job) -> Result<(), StoreError> {
        let route = self.route().await?;
        match route.as_ref() {
            Some(redis) => redis.put_job(job).await,
            None => {
                self.memory.put_job(job).await;
                Ok(())
            }
        }
    }

    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let route = self.route().await?;
        match route.as_ref() {
            Some(redis) => redis.get_job(id).await,
            None => Ok(self.memory.get_job(id).await),
        }
    }

    pub async fn put_result(&self, outcome: &JobOutcome) -> Result<(), StoreError> {
        let route = self.route().await?;
        match route.as_ref() {
            Some(redis) => redis.put_result(outcome).await,
            None => {
                self.memory.put_result(outcome).await;
                Ok(())
            }
        }
    }

    /// `None` means the job has not reached a terminal state yet.
    pub async fn get_result(&self, id: JobId) -> Result<Option<JobOutcome>, StoreError> {
        let route = self.route().await?;
        match route.as_ref() {
            Some(redis) => redis.get_result(id).await,
            None => Ok(self.memory.get_result(id).await),
        }
    }

    pub async fn put_stream(&self, config: &StreamConfig) -> Result<(), StoreError> {
        let route = self.route().await?;
        match route.as_ref() {
            Some(redis) => redis.put_stream(config).await,
            None => {
                self.memory.put_stream(config).await;
                Ok(())
            }
        }
    }

    pub async fn get_stream(&self, id: StreamId) -> Result<Option<StreamConfig>, StoreError> {
        let route = self.route().await?;
        match route.as_ref() {
            Some(redis) => redis.get_stream(id).await,
            None => Ok(self.memory.get_stream(id).await),
        }
    }

    /// Try once to move from memory to the durable backend.
    ///
    /// Pending ids are appended to the durable list in FIFO order and every
    /// stored document is copied over before the route switches. Returns
    /// `Ok(false)` if already durable.
    pub async fn try_promote(&self) -> Result<bool, StoreError> {
        if self.durable.read().await.is_some() {
            return Ok(false);
        }

        let redis = RedisBackend::connect(&self.config.redis_url, self.config.connect_timeout).await?;

        let mut route = self.durable.write().await;
        if route.is_some() {
            return Ok(false);
        }

        let (jobs, results, streams) = self.memory.snapshot().await;
        for job in &jobs {
            redis.put_job(job).await?;
        }
        for outcome in &results {
            redis.put_result(outcome).await?;
        }
        for stream in &streams {
            redis.put_stream(stream).await?;
        }

        let pending = self.memory.drain_queue().await;
        if let Err(e) = redis.enqueue_all(&pending).await {
            for id in pending {
                self.memory.enqueue(id).await;
            }
            return Err(e);
        }

        tracing::info!(
            url = %self.config.redis_url,
            moved_jobs = pending.len(),
            "Promoted to durable queue",
        );
        *route = Some(redis);
        Ok(true)
    }

    /// Reconnect loop for [`FallbackPolicy::Reconnect`]. Returns immediately
    /// under the sticky policy or once promoted.
    pub async fn run_reconnect(self: Arc<Self>, cancel: CancellationToken) {
        let config = match &self.config.policy {
            FallbackPolicy::Sticky => return,
            FallbackPolicy::Reconnect(config) => config.clone(),
        };
        for (attempt, delay) in config.schedule().enumerate() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.try_promote().await {
                Ok(_) => return,
                Err(e) => {
                    tracing::debug!(
                        attempt = attempt + 1,
                        error = %e,
                        "Durable queue still unreachable",
                    );
                }
            }
        }
    }

    /// Release the durable connection. Later calls fail with
    /// [`StoreError::Closed`].
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let released = self.durable.write().await.take();
        if released.is_some() {
            tracing::info!("Durable queue connection released");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
