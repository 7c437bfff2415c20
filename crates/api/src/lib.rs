//! Cellcast relay server library.
//!
//! Exposes the building blocks (config, state, error handling, routes,
//! WebSocket registry, dispatcher, lifecycle) so integration tests and the
//! binary entrypoint share one assembly.

pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod parameters;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
