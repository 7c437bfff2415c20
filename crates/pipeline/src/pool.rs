//! Bounded pool for CPU-bound kernel work.
//!
//! Each job holds a semaphore permit while it runs on tokio's blocking
//! thread pool, so at most `size` kernels execute at once per stream.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::spawn_blocking;

use crate::error::TransformError;

pub const DEFAULT_POOL_SIZE: usize = 3;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// A size of zero is treated as one.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a running job.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` off the async runtime once a permit is free.
    ///
    /// A panic inside `job` is reported as [`TransformError::Pool`].
    pub async fn run<F, T>(&self, job: F) -> Result<T, TransformError>
    where
        F: FnOnce() -> Result<T, TransformError> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| TransformError::PoolClosed)?;

        spawn_blocking(job)
            .await
            .map_err(|e| TransformError::Pool(format!("worker task panicked: {e}")))?
    }

    /// Refuse new jobs. Jobs already holding a permit finish normally.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn runs_job_and_returns_value() {
        let pool = WorkerPool::default();
        let value = pool.run(|| Ok(21 * 2)).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.available(), DEFAULT_POOL_SIZE);
    }

    #[tokio::test]
    async fn panic_becomes_pool_error() {
        let pool = WorkerPool::new(1);
        let result: Result<(), _> = pool.run(|| panic!("kernel exploded")).await;
        assert_matches!(result, Err(TransformError::Pool(_)));
        // The permit is returned even after a panic.
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn closed_pool_rejects_jobs() {
        let pool = WorkerPool::new(2);
        pool.close();
        assert!(pool.is_closed());
        assert_matches!(pool.run(|| Ok(())).await, Err(TransformError::PoolClosed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_bounded_by_size() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs = (0..6).map(|_| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.run(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        });
        for result in futures::future::join_all(jobs).await {
            result.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
