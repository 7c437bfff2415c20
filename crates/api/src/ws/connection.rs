//! Socket plumbing shared by the task and stream handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use cellcast_core::messages::ClientMessage;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::task::JoinHandle;

use crate::ws::manager::{close_message, ConnectionScope, WsManager};

/// How long a finished connection may take to flush queued frames.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// A registered connection: the outbound side goes through the registry
/// channel and a dedicated sender task, the inbound side stays with the
/// handler.
pub struct Connection {
    pub id: String,
    ws_manager: Arc<WsManager>,
    send_task: JoinHandle<()>,
}

impl Connection {
    /// Register `socket` under a fresh connection id.
    pub async fn open(
        socket: WebSocket,
        ws_manager: Arc<WsManager>,
        scope: ConnectionScope,
    ) -> (Self, SplitStream<WebSocket>) {
        let id = uuid::Uuid::new_v4().to_string();
        let mut rx = ws_manager.add(id.clone(), scope).await;
        let (mut sink, stream) = socket.split();

        let sender_id = id.clone();
        let send_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() {
                    tracing::debug!(conn_id = %sender_id, "WebSocket sink closed");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        tracing::info!(conn_id = %id, ?scope, "WebSocket connected");
        (
            Self {
                id,
                ws_manager,
                send_task,
            },
            stream,
        )
    }

    pub async fn send(&self, message: Message) -> bool {
        self.ws_manager.send_to(&self.id, message).await
    }

    pub async fn send_json(&self, message: &ClientMessage) -> bool {
        self.send(Message::Text(message.to_json().into())).await
    }

    /// Relay `text` to every other connection.
    pub async fn broadcast_text(&self, text: &str) -> usize {
        let message = ClientMessage::broadcast(&self.id, text);
        self.ws_manager
            .broadcast(Message::Text(message.to_json().into()), Some(&self.id))
            .await
    }

    pub async fn close(&self, code: u16, reason: &str) {
        self.send(close_message(code, reason)).await;
    }

    /// Unregister and let the sender task drain what is already queued.
    pub async fn finish(self) {
        self.ws_manager.remove(&self.id).await;
        let mut send_task = self.send_task;
        if tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task).await.is_err() {
            send_task.abort();
        }
        tracing::info!(conn_id = %self.id, "WebSocket disconnected");
    }
}

/// What the handler should do with one inbound message.
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    /// Ping, pong and anything else that needs no reaction.
    Ignored,
    /// The peer closed, errored or went away.
    Closed,
}

impl Inbound {
    pub fn from_next(next: Option<Result<Message, axum::Error>>, conn_id: &str) -> Self {
        match next {
            Some(Ok(Message::Text(text))) => Inbound::Text(text.as_str().to_owned()),
            Some(Ok(Message::Binary(bytes))) => Inbound::Binary(bytes.to_vec()),
            Some(Ok(Message::Close(_))) | None => Inbound::Closed,
            Some(Ok(Message::Pong(_))) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
                Inbound::Ignored
            }
            Some(Ok(Message::Ping(_))) => Inbound::Ignored,
            Some(Err(e)) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                Inbound::Closed
            }
        }
    }
}

/// Text that asks the server to end the connection.
pub fn is_exit_command(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("exit")
}
