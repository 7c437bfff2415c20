#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Durable backend did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Store has been closed")]
    Closed,
}
