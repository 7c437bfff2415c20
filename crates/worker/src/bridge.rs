//! TCP listener multiplexing many worker connections.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::BridgeError;
use crate::processor::MessageProcessor;

/// Longest accepted line; a longer one closes the connection.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Pause after a failed `accept` (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Cheap, cloneable view of a running bridge for health reporting.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    local_addr: SocketAddr,
    active: Arc<AtomicUsize>,
}

impl BridgeHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

pub struct WorkerBridge {
    listener: TcpListener,
    processor: Arc<dyn MessageProcessor>,
    tracker: TaskTracker,
    handle: BridgeHandle,
}

impl WorkerBridge {
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        processor: Arc<dyn MessageProcessor>,
    ) -> Result<Self, BridgeError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            processor,
            tracker: TaskTracker::new(),
            handle: BridgeHandle {
                local_addr,
                active: Arc::new(AtomicUsize::new(0)),
            },
        })
    }

    pub fn handle(&self) -> BridgeHandle {
        self.handle.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr
    }

    pub fn active_connections(&self) -> usize {
        self.handle.active_connections()
    }

    /// Accept workers until `cancel` fires, then wait up to `drain_timeout`
    /// for open connections to wind down. Returns `true` if they all did.
    pub async fn serve(self, cancel: CancellationToken, drain_timeout: Duration) -> bool {
        tracing::info!(addr = %self.handle.local_addr, "Worker bridge listening");

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let processor = Arc::clone(&self.processor);
                    let cancel = cancel.clone();
                    let guard = ActiveGuard::enter(&self.handle.active);
                    self.tracker.spawn(async move {
                        let _guard = guard;
                        tracing::info!(%peer, "Worker connected");
                        match handle_connection(stream, processor.as_ref(), cancel).await {
                            Ok(()) => tracing::info!(%peer, "Worker disconnected"),
                            Err(e) => {
                                tracing::warn!(%peer, error = %e, "Worker connection closed on error")
                            }
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept worker connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }

        drop(self.listener);
        self.tracker.close();
        let drained = tokio::time::timeout(drain_timeout, self.tracker.wait())
            .await
            .is_ok();
        if drained {
            tracing::info!("Worker bridge stopped");
        } else {
            tracing::warn!(
                remaining = self.handle.active_connections(),
                "Worker connections did not close before the deadline",
            );
        }
        drained
    }
}

async fn handle_connection(
    stream: TcpStream,
    processor: &dyn MessageProcessor,
    cancel: CancellationToken,
) -> Result<(), BridgeError> {
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = lines.next() => next,
        };

        let message = match next {
            Some(line) => line?,
            None => return Ok(()),
        };
        tracing::debug!(len = message.len(), "Worker message received");

        let Some(reply) = processor.process(&message)?.filter(|r| !r.is_empty()) else {
            continue;
        };
        // A peer that stops reading must not hold the connection past cancel.
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            sent = lines.send(reply) => sent?,
        }
    }
}

/// Counts a connection as active for as long as it lives.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
