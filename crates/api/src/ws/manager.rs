use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message};
use cellcast_core::types::{JobId, StreamId, Timestamp};
use tokio::sync::{mpsc, RwLock};

/// Close code sent to every client when the server shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code for a connection whose work is done.
pub const CLOSE_NORMAL: u16 = 1000;

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// What a connection was opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionScope {
    Task(JobId),
    Stream(StreamId),
    Unscoped,
}

/// Metadata for a single WebSocket connection.
pub struct WsConnection {
    pub scope: ConnectionScope,
    /// Channel sender for outbound messages to this connection.
    pub sender: WsSender,
    pub connected_at: Timestamp,
}

/// Registry of every open WebSocket connection.
///
/// Fan-out never holds the map lock while sending: it copies the senders
/// first, sends to the copy, then removes the connections whose channel
/// turned out to be closed.
pub struct WsManager {
    connections: RwLock<HashMap<String, WsConnection>>,
}

impl WsManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the receiver half of the message channel so the caller can
    /// forward messages to the WebSocket sink.
    pub async fn add(
        &self,
        conn_id: String,
        scope: ConnectionScope,
    ) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = WsConnection {
            scope,
            sender: tx,
            connected_at: chrono::Utc::now(),
        };
        self.connections.write().await.insert(conn_id, conn);
        rx
    }

    /// Remove a connection by its ID. Unknown IDs are ignored.
    pub async fn remove(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    pub async fn scope_of(&self, conn_id: &str) -> Option<ConnectionScope> {
        self.connections.read().await.get(conn_id).map(|c| c.scope)
    }

    /// Connection IDs opened for `scope`.
    pub async fn connections_for(&self, scope: ConnectionScope) -> Vec<String> {
        self.connections
            .read()
            .await
            .iter()
            .filter(|(_, conn)| conn.scope == scope)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Queue `message` for one connection. Returns `false` if the
    /// connection is unknown or its channel is closed; a closed one is
    /// removed.
    pub async fn send_to(&self, conn_id: &str, message: Message) -> bool {
        let sender = match self.connections.read().await.get(conn_id) {
            Some(conn) => conn.sender.clone(),
            None => return false,
        };
        if sender.send(message).is_ok() {
            return true;
        }
        self.remove(conn_id).await;
        false
    }

    /// Send `message` to every connection except `exclude`.
    ///
    /// A failed send does not stop delivery to the rest; the failing
    /// connection is removed once the fan-out is done. Returns the number
    /// of connections the message was delivered to.
    pub async fn broadcast(&self, message: Message, exclude: Option<&str>) -> usize {
        let snapshot = self.snapshot(exclude).await;

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (conn_id, sender) in snapshot {
            if sender.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(conn_id);
            }
        }

        self.prune(dead).await;
        delivered
    }

    /// Return the current number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Ping frame to every connected client, dropping the ones whose
    /// channel has closed.
    pub async fn ping_all(&self) {
        let snapshot = self.snapshot(None).await;
        let dead: Vec<String> = snapshot
            .into_iter()
            .filter(|(_, sender)| sender.send(Message::Ping(Bytes::new())).is_err())
            .map(|(conn_id, _)| conn_id)
            .collect();
        self.prune(dead).await;
    }

    /// Send a `1001 Server shutdown` Close frame to every connection, then
    /// clear the map. Returns how many connections were closed.
    pub async fn shutdown_all(&self) -> usize {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.send(close_message(CLOSE_GOING_AWAY, "Server shutdown"));
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket connections");
        count
    }

    async fn snapshot(&self, exclude: Option<&str>) -> Vec<(String, WsSender)> {
        self.connections
            .read()
            .await
            .iter()
            .filter(|(id, _)| Some(id.as_str()) != exclude)
            .map(|(id, conn)| (id.clone(), conn.sender.clone()))
            .collect()
    }

    async fn prune(&self, dead: Vec<String>) {
        if dead.is_empty() {
            return;
        }
        let mut conns = self.connections.write().await;
        for conn_id in &dead {
            conns.remove(conn_id);
        }
        tracing::debug!(removed = dead.len(), "Dropped closed WebSocket connections");
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}

/// A Close frame with `code` and `reason`.
pub fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}
