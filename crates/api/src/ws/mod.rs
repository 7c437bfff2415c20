//! WebSocket infrastructure for task and stream clients.
//!
//! Provides the connection registry, heartbeat, and the HTTP upgrade
//! handlers used by Axum routes.

pub mod connection;
mod heartbeat;
pub mod manager;
pub mod stream;
pub mod task;

pub use heartbeat::start_heartbeat;
pub use manager::{ConnectionScope, WsManager};
pub use stream::stream_ws_handler;
pub use task::task_ws_handler;
