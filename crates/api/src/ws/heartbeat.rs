use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::ws::manager::WsManager;

const PING_PERIOD: Duration = Duration::from_secs(30);

/// Ping every registered connection each [`PING_PERIOD`] until `cancel`
/// fires. Connections whose writer is gone are dropped from the registry.
pub fn start_heartbeat(ws_manager: Arc<WsManager>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let before = ws_manager.connection_count().await;
                    ws_manager.ping_all().await;
                    let after = ws_manager.connection_count().await;
                    tracing::debug!(connections = after, dropped = before.saturating_sub(after), "Heartbeat");
                }
            }
        }
        tracing::info!("Heartbeat stopped");
    })
}
