//! Mirror bus events onto the queue backend's pub/sub channels.
//!
//! [`ChannelForwarder`] subscribes to the [`EventBus`](crate::bus::EventBus)
//! and publishes every received [`RelayEvent`] on the channel matching its
//! kind. It runs as a long-lived background task and stops when cancelled
//! or when the bus is dropped.

use std::sync::Arc;

use cellcast_store::keys;
use cellcast_store::Backend;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::bus::{RelayEvent, RelayEventKind};

pub struct ChannelForwarder;

impl ChannelForwarder {
    /// Channel name an event is published on.
    pub fn channel_for(event: &RelayEvent) -> &'static str {
        match event.kind {
            RelayEventKind::JobFinished { .. } => keys::CHANNEL_JOB_RESULTS,
            RelayEventKind::StreamControl { .. } => keys::CHANNEL_CONTROL,
            RelayEventKind::FrameProcessed { .. } => keys::CHANNEL_FRAMES,
        }
    }

    pub async fn run(
        backend: Arc<Backend>,
        mut receiver: broadcast::Receiver<RelayEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => received,
            };

            match event {
                Ok(event) => {
                    if let Err(e) = Self::forward(&backend, &event).await {
                        tracing::error!(
                            error = %e,
                            event = event.kind.name(),
                            "Failed to forward event",
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Channel forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::info!("Channel forwarder stopped");
    }

    async fn forward(
        backend: &Backend,
        event: &RelayEvent,
    ) -> Result<(), cellcast_store::StoreError> {
        let message = serde_json::to_string(event)?;
        backend.publish(Self::channel_for(event), &message).await
    }
}
