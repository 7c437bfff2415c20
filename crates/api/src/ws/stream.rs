//! `GET /ws/stream/{stream_id}`: live frame transform session.
//!
//! Binary messages carry raw frames (see [`cellcast_pipeline::codec`]) and
//! are answered with the transformed frame. Text messages are either
//! control commands, the `exit` command, or chat relayed to the other
//! connections.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use cellcast_core::messages::{ClientMessage, MSG_TYPE_CONTROL};
use cellcast_core::stream::StreamConfig;
use cellcast_core::submission::TransformKind;
use cellcast_core::types::StreamId;
use cellcast_events::bus::next_event;
use cellcast_events::{RelayEvent, RelayEventKind};
use cellcast_pipeline::{codec, FrameProcessor, StreamSession, WorkerPool};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;
use crate::ws::connection::{is_exit_command, Connection, Inbound};
use crate::ws::manager::{ConnectionScope, CLOSE_NORMAL};

pub const COMMAND_SET_TRANSFORM: &str = "set_transform";
pub const COMMAND_STOP: &str = "stop";

/// A control command sent as JSON text on a stream connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum StreamCommand {
    SetTransform { transform: TransformKind },
    Stop,
}

#[derive(Deserialize)]
struct ControlEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    command: StreamCommand,
}

impl StreamCommand {
    /// `None` unless `text` is a well-formed control message.
    pub fn parse(text: &str) -> Option<Self> {
        let envelope: ControlEnvelope = serde_json::from_str(text).ok()?;
        (envelope.kind == MSG_TYPE_CONTROL).then_some(envelope.command)
    }

    fn name(&self) -> &'static str {
        match self {
            StreamCommand::SetTransform { .. } => COMMAND_SET_TRANSFORM,
            StreamCommand::Stop => COMMAND_STOP,
        }
    }

    /// Rebuild a command from a bus event published by another connection.
    fn from_event(command: &str, payload: &serde_json::Value) -> Option<Self> {
        match command {
            COMMAND_STOP => Some(StreamCommand::Stop),
            COMMAND_SET_TRANSFORM => payload
                .get("transform")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .map(|transform| StreamCommand::SetTransform { transform }),
            _ => None,
        }
    }
}

pub async fn stream_ws_handler(
    ws: WebSocketUpgrade,
    Path(stream_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let token = state.ws_tasks.token();
    ws.on_upgrade(move |socket| async move {
        let _token = token;
        handle_stream_socket(socket, state, stream_id).await;
    })
}

async fn handle_stream_socket(socket: WebSocket, state: AppState, raw_id: String) {
    let parsed = raw_id.parse::<StreamId>().ok();
    let scope = parsed.map_or(ConnectionScope::Unscoped, ConnectionScope::Stream);
    let (conn, mut inbound) = Connection::open(socket, state.ws_manager.clone(), scope).await;

    let config = match parsed {
        Some(id) => match state.backend.get_stream(id).await {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(stream_id = %id, error = %e, "Failed to load stream");
                None
            }
        },
        None => None,
    };
    let Some(mut config) = config else {
        conn.send_json(&ClientMessage::error(format!("Unknown stream {raw_id}")))
            .await;
        conn.close(CLOSE_NORMAL, "Unknown stream").await;
        conn.finish().await;
        return;
    };

    let stream_id = config.stream_id;
    let mut processor = FrameProcessor::new(
        StreamSession::from_config(&config),
        WorkerPool::new(state.config.transform_workers),
    );
    let mut events = state.event_bus.subscribe();
    let mut bus_open = true;

    conn.send_json(&ClientMessage::status(format!(
        "Stream {stream_id} ready ({})",
        config.transform.as_str()
    )))
    .await;

    loop {
        tokio::select! {
            _ = state.closing.cancelled() => break,

            next = inbound.next() => match Inbound::from_next(next, &conn.id) {
                Inbound::Binary(bytes) => {
                    handle_frame(&state, &conn, &mut processor, stream_id, &bytes).await;
                }
                Inbound::Text(text) if is_exit_command(&text) => {
                    conn.close(CLOSE_NORMAL, "Bye").await;
                    break;
                }
                Inbound::Text(text) => match StreamCommand::parse(&text) {
                    Some(command) => {
                        publish_command(&state, &conn, stream_id, &command);
                        if apply_command(&state, &conn, &mut processor, &mut config, command).await {
                            break;
                        }
                    }
                    None => {
                        conn.broadcast_text(&text).await;
                    }
                },
                Inbound::Ignored => {}
                Inbound::Closed => break,
            },

            event = next_event(&mut events), if bus_open => match event {
                Some(event) => {
                    if let Some(command) = command_for(&event, stream_id, &conn.id) {
                        if apply_command(&state, &conn, &mut processor, &mut config, command).await {
                            break;
                        }
                    }
                }
                None => bus_open = false,
            },
        }
    }

    processor.close();
    let outcome = processor.outcome();
    tracing::info!(
        stream_id = %stream_id,
        frames = outcome.total(),
        transformed = outcome.transformed,
        skipped = outcome.skipped,
        failed = outcome.failed,
        "Stream session ended",
    );
    conn.finish().await;
}

async fn handle_frame(
    state: &AppState,
    conn: &Connection,
    processor: &mut FrameProcessor,
    stream_id: StreamId,
    bytes: &[u8],
) {
    let frame = match codec::decode(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(stream_id = %stream_id, error = %e, "Dropping undecodable frame");
            conn.send_json(&ClientMessage::error(format!("Invalid frame: {e}")))
                .await;
            return;
        }
    };

    let out = processor.process(frame).await;
    let pts = out.pts;
    conn.send(Message::Binary(codec::encode(&out).into())).await;
    state
        .event_bus
        .publish(RelayEvent::frame_processed(stream_id, pts));
}

/// Announce a locally received command to other connections on the stream.
fn publish_command(state: &AppState, conn: &Connection, stream_id: StreamId, command: &StreamCommand) {
    let mut payload = json!({ "origin": conn.id });
    if let StreamCommand::SetTransform { transform } = command {
        payload["transform"] = json!(transform);
    }
    state
        .event_bus
        .publish(RelayEvent::stream_control(stream_id, command.name()).with_payload(payload));
}

/// The command carried by `event`, if it targets this stream and came from
/// another connection.
fn command_for(event: &RelayEvent, stream_id: StreamId, conn_id: &str) -> Option<StreamCommand> {
    let RelayEventKind::StreamControl {
        stream_id: target,
        command,
    } = &event.kind
    else {
        return None;
    };
    if *target != stream_id || event.payload.get("origin").and_then(|v| v.as_str()) == Some(conn_id) {
        return None;
    }
    StreamCommand::from_event(command, &event.payload)
}

/// Apply `command`. Returns `true` when the connection should end.
async fn apply_command(
    state: &AppState,
    conn: &Connection,
    processor: &mut FrameProcessor,
    config: &mut StreamConfig,
    command: StreamCommand,
) -> bool {
    match command {
        StreamCommand::SetTransform { transform } => {
            processor.set_transform(transform);
            config.transform = transform;
            if let Err(e) = state.backend.put_stream(config).await {
                tracing::warn!(stream_id = %config.stream_id, error = %e, "Failed to persist stream transform");
            }
            tracing::info!(stream_id = %config.stream_id, transform = transform.as_str(), "Stream transform changed");
            conn.send_json(&ClientMessage::status(format!(
                "Transform set to {}",
                transform.as_str()
            )))
            .await;
            false
        }
        StreamCommand::Stop => {
            conn.send_json(&ClientMessage::status("Stream stopped")).await;
            conn.close(CLOSE_NORMAL, "Stream stopped").await;
            true
        }
    }
}
