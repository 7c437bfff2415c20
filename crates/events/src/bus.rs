//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the dispatcher, the
//! WebSocket handlers and the channel forwarder.

use cellcast_core::job::JobState;
use cellcast_core::types::{JobId, StreamId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// RelayEvent
// ---------------------------------------------------------------------------

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayEventKind {
    /// A job reached `Completed` or `Failed`; its result is in the store.
    JobFinished { job_id: JobId, state: JobState },
    /// A control command addressed to one streaming session.
    StreamControl { stream_id: StreamId, command: String },
    /// A frame left the transform pipeline.
    FrameProcessed { stream_id: StreamId, pts: i64 },
}

impl RelayEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            RelayEventKind::JobFinished { .. } => "job_finished",
            RelayEventKind::StreamControl { .. } => "stream_control",
            RelayEventKind::FrameProcessed { .. } => "frame_processed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEvent {
    #[serde(flatten)]
    pub kind: RelayEventKind,

    /// Free-form JSON carrying event-specific extras.
    pub payload: serde_json::Value,

    pub timestamp: Timestamp,
}

impl RelayEvent {
    pub fn new(kind: RelayEventKind) -> Self {
        Self {
            kind,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn job_finished(job_id: JobId, state: JobState) -> Self {
        Self::new(RelayEventKind::JobFinished { job_id, state })
    }

    pub fn stream_control(stream_id: StreamId, command: impl Into<String>) -> Self {
        Self::new(RelayEventKind::StreamControl {
            stream_id,
            command: command.into(),
        })
    }

    pub fn frame_processed(stream_id: StreamId, pts: i64) -> Self {
        Self::new(RelayEventKind::FrameProcessed { stream_id, pts })
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// The finished job id, if this is a `JobFinished` event.
    pub fn finished_job(&self) -> Option<JobId> {
        match &self.kind {
            RelayEventKind::JobFinished { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use cellcast_events::bus::{EventBus, RelayEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(RelayEvent::frame_processed(uuid::Uuid::nil(), 0));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    /// When the buffer is full the oldest events are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped silently if there are none.
    pub fn publish(&self, event: RelayEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receive the next event, skipping past any lag. `None` once the bus is
/// dropped.
pub async fn next_event(receiver: &mut broadcast::Receiver<RelayEvent>) -> Option<RelayEvent> {
    loop {
        match receiver.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
