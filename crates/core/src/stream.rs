use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::submission::{StreamOffer, TransformKind};
use crate::types::{StreamId, Timestamp};

/// Persisted configuration of a streaming session, keyed by stream id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub stream_id: StreamId,
    pub transform: TransformKind,
    pub target_fps: u32,
    pub created_at: Timestamp,
}

impl StreamConfig {
    pub fn from_offer(offer: &StreamOffer) -> Self {
        Self {
            stream_id: uuid::Uuid::new_v4(),
            transform: offer.mode,
            target_fps: offer.target_fps(),
            created_at: Utc::now(),
        }
    }
}
