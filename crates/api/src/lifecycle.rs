//! Startup and phased shutdown of every long-lived component.
//!
//! [`Lifecycle::start`] wires the backend, parameter registry, worker
//! bridge, HTTP server and background tasks together. [`Lifecycle::shutdown`]
//! tears them down in five phases, each under the configured deadline:
//!
//! 1. `accepting`: new submissions get 503 and the consumer loop stops
//!    after its current pop.
//! 2. `servers`: the HTTP server and worker bridge stop accepting and drain.
//! 3. `connections`: every WebSocket gets `1001 Server shutdown` and its
//!    handler is awaited.
//! 4. `background`: heartbeat, channel forwarder, reconnect and consumer
//!    tasks are cancelled and awaited; stragglers are aborted and reaped.
//! 5. `store`: the queue backend is closed.
//!
//! A phase that fails or times out is recorded in the [`ShutdownReport`]
//! and the next phase runs regardless.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cellcast_core::error::CoreError;
use cellcast_events::ChannelForwarder;
use cellcast_store::Backend;
use cellcast_worker::{BridgeError, EchoProcessor, WorkerBridge};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::engine::{JobDispatcher, JobExecutor, ModeExecutor};
use crate::parameters::ParameterRegistry;
use crate::router::build_app_router;
use crate::state::AppState;
use crate::ws::start_heartbeat;

/// How long to wait for an aborted task to unwind.
const REAP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to bind HTTP listener: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start worker bridge: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Failed to load mode parameters: {0}")]
    Parameters(#[from] CoreError),
}

/// What happened during [`Lifecycle::shutdown`].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub completed: Vec<&'static str>,
    pub timed_out: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
    /// WebSocket connections closed in the `connections` phase.
    pub closed_connections: usize,
    /// Background tasks that had to be aborted.
    pub aborted_tasks: Vec<&'static str>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty() && self.failed.is_empty() && self.aborted_tasks.is_empty()
    }
}

pub struct Lifecycle {
    state: AppState,
    http_addr: SocketAddr,
    worker_addr: Option<SocketAddr>,
    /// Stops the consumer loop.
    consumer: CancellationToken,
    /// Stops the HTTP server and worker bridge.
    servers: CancellationToken,
    /// Stops heartbeat, forwarder and reconnect.
    background: CancellationToken,
    http: JoinHandle<()>,
    bridge: Option<JoinHandle<bool>>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Lifecycle {
    /// Bring up every component from `config`.
    pub async fn start(config: ServerConfig) -> Result<Self, StartupError> {
        let backend = Backend::connect(config.backend_config()).await;
        let parameters = Arc::new(ParameterRegistry::load(config.parameters_path.clone()).await?);

        let bridge = WorkerBridge::bind(
            (config.host.as_str(), config.worker_port),
            Arc::new(EchoProcessor),
        )
        .await?;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;

        let executor: Arc<dyn JobExecutor> = Arc::new(ModeExecutor::new(Arc::clone(&parameters)));
        let state = AppState::new(config, backend, parameters).with_worker_bridge(bridge.handle());

        Ok(Self::launch(state, listener, Some(bridge), executor)?)
    }

    /// Spawn the HTTP server on `listener` plus all background tasks around
    /// an already assembled `state`.
    pub fn launch(
        state: AppState,
        listener: TcpListener,
        bridge: Option<WorkerBridge>,
        executor: Arc<dyn JobExecutor>,
    ) -> std::io::Result<Self> {
        let http_addr = listener.local_addr()?;
        let consumer = CancellationToken::new();
        let servers = CancellationToken::new();
        let background = CancellationToken::new();
        let drain_timeout = state.config.shutdown_timeout();

        // --- HTTP ---
        let app = build_app_router(state.clone(), &state.config);
        let http_cancel = servers.clone();
        let http = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(http_cancel.cancelled_owned())
                .await
            {
                tracing::error!(error = %e, "HTTP server error");
            }
        });
        tracing::info!(addr = %http_addr, "HTTP server listening");

        // --- Worker bridge ---
        let worker_addr = bridge.as_ref().map(WorkerBridge::local_addr);
        let bridge = bridge.map(|bridge| tokio::spawn(bridge.serve(servers.clone(), drain_timeout)));

        // --- Background tasks ---
        let dispatcher = JobDispatcher::new(
            Arc::clone(&state.backend),
            executor,
            Arc::clone(&state.event_bus),
            state.config.queue_pop_timeout(),
        );
        let consumer_cancel = consumer.clone();
        let tasks = vec![
            (
                "dispatcher",
                tokio::spawn(async move { dispatcher.run(consumer_cancel).await }),
            ),
            (
                "heartbeat",
                start_heartbeat(Arc::clone(&state.ws_manager), background.clone()),
            ),
            (
                "forwarder",
                tokio::spawn(ChannelForwarder::run(
                    Arc::clone(&state.backend),
                    state.event_bus.subscribe(),
                    background.clone(),
                )),
            ),
            (
                "reconnect",
                tokio::spawn(Arc::clone(&state.backend).run_reconnect(background.clone())),
            ),
        ];

        Ok(Self {
            state,
            http_addr,
            worker_addr,
            consumer,
            servers,
            background,
            http,
            bridge,
            tasks,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn worker_addr(&self) -> Option<SocketAddr> {
        self.worker_addr
    }

    /// Run the five shutdown phases. Each is bounded by the configured
    /// shutdown timeout.
    pub async fn shutdown(self) -> ShutdownReport {
        let started = Instant::now();
        let deadline = self.state.config.shutdown_timeout();
        let mut report = ShutdownReport::default();
        tracing::info!(deadline_secs = deadline.as_secs(), "Shutting down");

        let Self {
            state,
            consumer,
            servers,
            background,
            mut http,
            mut bridge,
            mut tasks,
            ..
        } = self;

        // (a) Stop taking work.
        run_phase(&mut report, "accepting", deadline, async {
            state.stop_accepting();
            consumer.cancel();
            Ok(())
        })
        .await;

        // (b) Stop servers.
        run_phase(&mut report, "servers", deadline, async {
            servers.cancel();
            if let Err(e) = (&mut http).await {
                return Err(format!("HTTP server task failed: {e}"));
            }
            if let Some(bridge) = bridge.as_mut() {
                match bridge.await {
                    Ok(true) => {}
                    Ok(false) => return Err("worker connections did not drain".into()),
                    Err(e) => return Err(format!("worker bridge task failed: {e}")),
                }
            }
            Ok(())
        })
        .await;
        if !http.is_finished() {
            abort_and_reap("http", http).await;
        }
        if let Some(bridge) = bridge.filter(|b| !b.is_finished()) {
            abort_and_reap("bridge", bridge).await;
        }

        // (c) Close client connections.
        let mut closed = 0;
        run_phase(&mut report, "connections", deadline, async {
            closed = state.ws_manager.shutdown_all().await;
            state.closing.cancel();
            state.ws_tasks.close();
            state.ws_tasks.wait().await;
            Ok(())
        })
        .await;
        report.closed_connections = closed;

        // (d) Cancel background tasks.
        run_phase(&mut report, "background", deadline, async {
            background.cancel();
            let mut failed = Vec::new();
            for (name, handle) in tasks.iter_mut() {
                if let Err(e) = handle.await {
                    failed.push(format!("{name}: {e}"));
                }
            }
            if failed.is_empty() {
                Ok(())
            } else {
                Err(failed.join("; "))
            }
        })
        .await;
        for (name, handle) in tasks {
            if !handle.is_finished() {
                abort_and_reap(name, handle).await;
                report.aborted_tasks.push(name);
            }
        }

        // (e) Release the store.
        run_phase(&mut report, "store", deadline, async {
            state.backend.close().await;
            Ok(())
        })
        .await;

        report.elapsed = started.elapsed();
        if report.is_clean() {
            tracing::info!(
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Graceful shutdown complete",
            );
        } else {
            tracing::warn!(
                elapsed_ms = report.elapsed.as_millis() as u64,
                timed_out = ?report.timed_out,
                failed = ?report.failed,
                aborted = ?report.aborted_tasks,
                "Shutdown finished with problems",
            );
        }
        report
    }
}

/// Abort `handle` and wait briefly for the task to be dropped, so nothing it
/// owns outlives shutdown.
async fn abort_and_reap<T>(name: &'static str, handle: JoinHandle<T>) {
    handle.abort();
    match tokio::time::timeout(REAP_TIMEOUT, handle).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) if e.is_cancelled() => {}
        Ok(Err(e)) => tracing::warn!(task = name, error = %e, "Aborted task failed"),
        Err(_) => tracing::warn!(task = name, "Aborted task did not stop"),
    }
}

async fn run_phase<F>(report: &mut ShutdownReport, name: &'static str, deadline: Duration, phase: F)
where
    F: Future<Output = Result<(), String>>,
{
    match tokio::time::timeout(deadline, phase).await {
        Ok(Ok(())) => {
            tracing::info!(phase = name, "Shutdown phase complete");
            report.completed.push(name);
        }
        Ok(Err(e)) => {
            tracing::error!(phase = name, error = %e, "Shutdown phase failed");
            report.failed.push((name, e));
        }
        Err(_) => {
            tracing::warn!(
                phase = name,
                deadline_ms = deadline.as_millis() as u64,
                "Shutdown phase timed out",
            );
            report.timed_out.push(name);
        }
    }
}
