pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Routes for task submission. Mounted behind the submission throttle.
///
/// ```text
/// POST /tasks                   submit_task
/// ```
pub fn submission_routes() -> Router<AppState> {
    Router::new().route("/tasks", post(handlers::tasks::submit_task))
}

/// Every other client-facing route.
///
/// ```text
/// GET  /ws/{task_id}            WebSocket (task result)
/// POST /offer                   create_offer
/// GET  /ws/stream/{stream_id}   WebSocket (frame stream)
/// POST /api/sparam              save_parameters
/// ```
pub fn client_routes() -> Router<AppState> {
    Router::new()
        .route("/ws/{task_id}", get(ws::task_ws_handler))
        .route("/offer", post(handlers::streams::create_offer))
        .route("/ws/stream/{stream_id}", get(ws::stream_ws_handler))
        .route("/api/sparam", post(handlers::parameters::save_parameters))
}
