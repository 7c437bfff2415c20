//! Handlers for live stream negotiation.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use cellcast_core::stream::StreamConfig;
use cellcast_core::submission::{StreamOffer, TransformKind};
use cellcast_core::types::StreamId;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StreamCreated {
    pub stream_id: StreamId,
    pub websocket_url: String,
    pub transform: TransformKind,
    pub target_fps: u32,
    pub response_status: &'static str,
}

/// POST /offer
///
/// Persist a stream configuration and return the stream-scoped WebSocket
/// URL that frames are exchanged on.
pub async fn create_offer(
    State(state): State<AppState>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> AppResult<Json<StreamCreated>> {
    if !state.is_accepting() {
        return Err(AppError::ServiceUnavailable("Server is shutting down".into()));
    }

    let Json(body) = body?;
    let offer = StreamOffer::from_json(body)?;
    let config = StreamConfig::from_offer(&offer);
    state.backend.put_stream(&config).await?;

    tracing::info!(
        stream_id = %config.stream_id,
        transform = config.transform.as_str(),
        target_fps = config.target_fps,
        "Stream offered",
    );

    Ok(Json(StreamCreated {
        stream_id: config.stream_id,
        websocket_url: state.config.stream_ws_url(config.stream_id),
        transform: config.transform,
        target_fps: config.target_fps,
        response_status: "ok",
    }))
}
