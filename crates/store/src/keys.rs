//! Key and channel naming on the durable backend.

use cellcast_core::types::{JobId, StreamId};

/// FIFO list of pending job ids.
pub const JOB_QUEUE: &str = "job_queue";

/// Control commands for streaming sessions.
pub const CHANNEL_CONTROL: &str = "control";

/// One notification per emitted frame.
pub const CHANNEL_FRAMES: &str = "frames";

/// One notification per job reaching a terminal state.
pub const CHANNEL_JOB_RESULTS: &str = "job_results";

pub fn job_key(id: JobId) -> String {
    format!("job:{id}")
}

pub fn result_key(id: JobId) -> String {
    format!("result:{id}")
}

pub fn stream_key(id: StreamId) -> String {
    format!("stream:{id}")
}
