//! Redis-backed queue and document store.
//!
//! Two multiplexed connections are held: one for ordinary commands and one
//! reserved for `BLPOP`, because a blocking pop stalls every other command
//! pipelined on the same connection.

use std::time::Duration;

use cellcast_core::job::{Job, JobOutcome};
use cellcast_core::stream::StreamConfig;
use cellcast_core::types::{JobId, StreamId};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;
use crate::keys;

/// Grace added on top of the server-side `BLPOP` timeout before the client
/// gives up on the reply.
const BLPOP_CLIENT_GRACE: Duration = Duration::from_secs(1);

/// Smallest timeout sent to `BLPOP`; zero would block forever.
const MIN_BLPOP_SECS: f64 = 0.01;

#[derive(Clone)]
pub struct RedisBackend {
    url: String,
    commands: ConnectionManager,
    blocking: ConnectionManager,
}

impl RedisBackend {
    /// Connect and verify liveness with `PING`, giving up after `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;

        let connect = async {
            let mut commands = ConnectionManager::new(client.clone()).await?;
            let blocking = ConnectionManager::new(client).await?;
            let _: String = redis::cmd("PING").query_async(&mut commands).await?;
            Ok::<_, StoreError>(Self {
                url: url.to_string(),
                commands,
                blocking,
            })
        };

        tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.commands.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn enqueue(&self, id: JobId) -> Result<(), StoreError> {
        let mut conn = self.commands.clone();
        let _: () = conn.rpush(keys::JOB_QUEUE, id.to_string()).await?;
        Ok(())
    }

    /// Push many ids in one command, preserving order.
    pub async fn enqueue_all(&self, ids: &[JobId]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let values: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let mut conn = self.commands.clone();
        let _: () = conn.rpush(keys::JOB_QUEUE, values).await?;
        Ok(())
    }

    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<JobId>, StoreError> {
        let mut conn = self.blocking.clone();
        let server_timeout = timeout.as_secs_f64().max(MIN_BLPOP_SECS);

        let popped: Option<(String, String)> = tokio::time::timeout(
            timeout + BLPOP_CLIENT_GRACE,
            conn.blpop(keys::JOB_QUEUE, server_timeout),
        )
        .await
        .map_err(|_| StoreError::Timeout(timeout + BLPOP_CLIENT_GRACE))??;

        match popped {
            Some((_, raw)) => match raw.parse() {
                Ok(id) => Ok(Some(id)),
                Err(e) => {
                    tracing::warn!(value = %raw, error = %e, "Discarding malformed queue entry");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        let mut conn = self.commands.clone();
        let _: () = conn.publish(channel, message).await?;
        Ok(())
    }

    pub async fn put_job(&self, job: &Job) -> Result<(), StoreError> {
        self.put_document(&keys::job_key(job.id), job).await
    }

    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.get_document(&keys::job_key(id)).await
    }

    pub async fn put_result(&self, outcome: &JobOutcome) -> Result<(), StoreError> {
        self.put_document(&keys::result_key(outcome.job_id), outcome)
            .await
    }

    pub async fn get_result(&self, id: JobId) -> Result<Option<JobOutcome>, StoreError> {
        self.get_document(&keys::result_key(id)).await
    }

    pub async fn put_stream(&self, config: &StreamConfig) -> Result<(), StoreError> {
        self.put_document(&keys::stream_key(config.stream_id), config)
            .await
    }

    pub async fn get_stream(&self, id: StreamId) -> Result<Option<StreamConfig>, StoreError> {
        self.get_document(&keys::stream_key(id)).await
    }

    async fn put_document<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(value)?;
        let mut conn = self.commands.clone();
        let _: () = conn.set(key, encoded).await?;
        Ok(())
    }

    async fn get_document<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut conn = self.commands.clone();
        let raw: Option<String> = conn.get(key).await?;
        raw.map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(StoreError::from)
    }
}
