/// Jobs are addressed by an opaque random token.
pub type JobId = uuid::Uuid;

/// Streaming sessions share the job id space format but never collide with it.
pub type StreamId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
