#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cellcast_api::config::ServerConfig;
use cellcast_api::engine::{JobExecutor, ModeExecutor};
use cellcast_api::lifecycle::Lifecycle;
use cellcast_api::parameters::ParameterRegistry;
use cellcast_api::router::build_app_router;
use cellcast_api::state::AppState;
use cellcast_store::Backend;
use cellcast_worker::{EchoProcessor, WorkerBridge};
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tokio::net::TcpListener;
use tower::ServiceExt;

/// Build a test `ServerConfig` with short timeouts.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        cors_origins: vec!["http://localhost:5173".into()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 2,
        queue_pop_timeout_ms: 50,
        result_poll_interval_ms: 50,
        submit_rate_per_sec: 100,
        ..ServerConfig::default()
    }
}

/// State over a memory backend and the builtin parameter catalog.
pub fn test_state() -> AppState {
    state_with(test_config(), Backend::memory_only())
}

pub fn state_with(config: ServerConfig, backend: Arc<Backend>) -> AppState {
    AppState::new(config, backend, Arc::new(ParameterRegistry::builtin()))
}

/// The same router the server runs, over `state`.
pub fn build_test_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    build_app_router(state, &config)
}

/// Start a full server on an ephemeral port whose `websocket_url`s point
/// back at it.
pub async fn start_server(backend: Arc<Backend>) -> Lifecycle {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ServerConfig {
        public_ws_base: Some(format!("ws://{addr}")),
        ..test_config()
    };
    let state = state_with(config, backend);
    let executor: Arc<dyn JobExecutor> =
        Arc::new(ModeExecutor::new(Arc::clone(&state.parameters)));
    Lifecycle::launch(state, listener, None, executor).unwrap()
}

/// Like [`start_server`], with a worker bridge on an ephemeral port and a
/// caller-chosen executor and shutdown deadline.
pub async fn start_server_with_bridge(
    executor: Arc<dyn JobExecutor>,
    shutdown_timeout_secs: u64,
) -> Lifecycle {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ServerConfig {
        public_ws_base: Some(format!("ws://{addr}")),
        shutdown_timeout_secs,
        ..test_config()
    };
    let bridge = WorkerBridge::bind("127.0.0.1:0", Arc::new(EchoProcessor))
        .await
        .unwrap();
    let state = state_with(config, Backend::memory_only()).with_worker_bridge(bridge.handle());
    Lifecycle::launch(state, listener, Some(bridge), executor).unwrap()
}

pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

pub async fn post_json(
    app: Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, text) = send(app, request).await;
    (status, serde_json::from_str(&text).unwrap())
}

pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, text) = send(app, request).await;
    (status, serde_json::from_str(&text).unwrap())
}

/// A small PNG, base64 encoded.
pub fn png_base64(width: u32, height: u32) -> String {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 20) as u8, (y * 20) as u8, 128]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    STANDARD.encode(buf)
}

/// Wait until `check` holds, polling every 10 ms for up to two seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
