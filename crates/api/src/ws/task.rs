//! `GET /ws/{task_id}`: wait for one job's result.

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use cellcast_core::job::{JobOutcome, JobState};
use cellcast_core::messages::ClientMessage;
use cellcast_core::types::JobId;
use cellcast_events::bus::next_event;
use futures::StreamExt;

use crate::state::AppState;
use crate::ws::connection::{is_exit_command, Connection, Inbound};
use crate::ws::manager::{ConnectionScope, CLOSE_NORMAL};

/// HTTP handler that upgrades the connection to a task-scoped WebSocket.
pub async fn task_ws_handler(
    ws: WebSocketUpgrade,
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let token = state.ws_tasks.token();
    ws.on_upgrade(move |socket| async move {
        let _token = token;
        handle_task_socket(socket, state, task_id).await;
    })
}

/// Drive one task connection:
///   1. Announce the connection.
///   2. Reject ids that name no job.
///   3. Wait for the result via the event bus, re-checking the store on
///      every poll tick, while relaying inbound text to other clients.
///   4. Deliver the outcome and close normally.
async fn handle_task_socket(socket: WebSocket, state: AppState, raw_id: String) {
    let parsed = raw_id.parse::<JobId>().ok();
    let scope = parsed.map_or(ConnectionScope::Unscoped, ConnectionScope::Task);
    let (conn, mut inbound) = Connection::open(socket, state.ws_manager.clone(), scope).await;

    conn.send_json(&ClientMessage::status(format!(
        "WebSocket connected for task {raw_id}"
    )))
    .await;

    // Subscribe before the first store check so a completion in between is
    // not missed.
    let mut events = state.event_bus.subscribe();

    let job_id = match parsed {
        Some(id) => match state.backend.get_job(id).await {
            Ok(Some(_)) => Some(id),
            Ok(None) => None,
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Failed to load job");
                None
            }
        },
        None => None,
    };
    let Some(job_id) = job_id else {
        conn.send_json(&ClientMessage::error(format!("Unknown task {raw_id}")))
            .await;
        conn.close(CLOSE_NORMAL, "Unknown task").await;
        conn.finish().await;
        return;
    };

    let mut poll = tokio::time::interval(state.config.result_poll_interval());
    let mut bus_open = true;

    loop {
        tokio::select! {
            _ = state.closing.cancelled() => break,

            next = inbound.next() => match Inbound::from_next(next, &conn.id) {
                Inbound::Text(text) if is_exit_command(&text) => {
                    conn.close(CLOSE_NORMAL, "Bye").await;
                    break;
                }
                Inbound::Text(text) => {
                    let delivered = conn.broadcast_text(&text).await;
                    tracing::debug!(conn_id = %conn.id, delivered, "Relayed client message");
                }
                Inbound::Binary(_) | Inbound::Ignored => {}
                Inbound::Closed => break,
            },

            event = next_event(&mut events), if bus_open => match event {
                Some(event) if event.finished_job() == Some(job_id) => {
                    if deliver_if_finished(&state, &conn, job_id).await {
                        break;
                    }
                }
                Some(_) => {}
                None => bus_open = false,
            },

            _ = poll.tick() => {
                if deliver_if_finished(&state, &conn, job_id).await {
                    break;
                }
            }
        }
    }

    conn.finish().await;
}

/// Send the outcome and a normal Close if the job is finished.
async fn deliver_if_finished(state: &AppState, conn: &Connection, job_id: JobId) -> bool {
    let outcome = match state.backend.get_result(job_id).await {
        Ok(Some(outcome)) => outcome,
        Ok(None) => return false,
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Result lookup failed, will retry");
            return false;
        }
    };

    conn.send_json(&outcome_message(&outcome)).await;
    conn.close(CLOSE_NORMAL, "Task complete").await;
    tracing::info!(job_id = %job_id, conn_id = %conn.id, state = %outcome.state, "Delivered task result");
    true
}

fn outcome_message(outcome: &JobOutcome) -> ClientMessage {
    match outcome.state {
        JobState::Failed => ClientMessage::error(
            outcome
                .error
                .clone()
                .unwrap_or_else(|| "Task failed".to_string()),
        ),
        _ => ClientMessage::result(serde_json::to_value(outcome).unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn completed_outcome_becomes_result_message() {
        let outcome = JobOutcome::completed(uuid::Uuid::nil(), json!({"mode": "inversion"}));
        let msg = outcome_message(&outcome);
        assert_eq!(msg.kind, "result");
        let data = msg.data.unwrap();
        assert_eq!(data["state"], "completed");
        assert_eq!(data["result"]["mode"], "inversion");
    }

    #[test]
    fn failed_outcome_becomes_error_message() {
        let outcome = JobOutcome::failed(uuid::Uuid::nil(), "Unknown mode 'x'");
        let msg = outcome_message(&outcome);
        assert_eq!(msg.kind, "error");
        assert_eq!(msg.message.as_deref(), Some("Unknown mode 'x'"));
    }
}
