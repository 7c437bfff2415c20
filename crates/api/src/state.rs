use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cellcast_events::EventBus;
use cellcast_store::Backend;
use cellcast_worker::BridgeHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ServerConfig;
use crate::middleware::rate_limit::SubmitLimiter;
use crate::parameters::ParameterRegistry;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind an `Arc` or is a handle.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Queue, job store and stream store.
    pub backend: Arc<Backend>,
    /// WebSocket connection registry.
    pub ws_manager: Arc<WsManager>,
    pub event_bus: Arc<EventBus>,
    pub parameters: Arc<ParameterRegistry>,
    pub submit_limiter: Arc<SubmitLimiter>,
    /// Cleared once shutdown begins; submissions then get 503.
    pub accepting: Arc<AtomicBool>,
    /// Fired when shutdown closes client connections.
    pub closing: CancellationToken,
    /// Every upgraded WebSocket handler runs under this tracker.
    pub ws_tasks: TaskTracker,
    /// Present when the worker listener is running.
    pub worker_bridge: Option<BridgeHandle>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        backend: Arc<Backend>,
        parameters: Arc<ParameterRegistry>,
    ) -> Self {
        let submit_limiter = Arc::new(SubmitLimiter::per_second(config.submit_rate_per_sec));
        Self {
            config: Arc::new(config),
            backend,
            ws_manager: Arc::new(WsManager::new()),
            event_bus: Arc::new(EventBus::default()),
            parameters,
            submit_limiter,
            accepting: Arc::new(AtomicBool::new(true)),
            closing: CancellationToken::new(),
            ws_tasks: TaskTracker::new(),
            worker_bridge: None,
        }
    }

    pub fn with_worker_bridge(mut self, handle: BridgeHandle) -> Self {
        self.worker_bridge = Some(handle);
        self
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }
}
