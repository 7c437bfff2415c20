use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use cellcast_core::error::CoreError;
use cellcast_core::types::{JobId, StreamId};
use cellcast_store::reconnect::ReconnectConfig;
use cellcast_store::{BackendConfig, FallbackPolicy};

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for HTTP and the worker listener (default: `127.0.0.1`).
    pub host: String,
    /// HTTP port (default: `8082`).
    pub port: u16,
    /// Worker line-protocol port (default: `50003`).
    pub worker_port: u16,
    pub redis_host: String,
    pub redis_port: u16,
    /// Prefix of every returned `websocket_url`. Derived from host and port
    /// when unset.
    pub public_ws_base: Option<String>,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// Deadline for each shutdown phase.
    pub shutdown_timeout_secs: u64,
    pub queue_pop_timeout_ms: u64,
    pub result_poll_interval_ms: u64,
    /// Kernel worker threads per stream.
    pub transform_workers: usize,
    pub submit_rate_per_sec: u32,
    /// Retry the durable backend after a fallback, starting at this delay.
    pub backend_reconnect_secs: Option<u64>,
    /// Mode parameter catalog file; saved parameters are written back here.
    pub parameters_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8082,
            worker_port: 50003,
            redis_host: "localhost".into(),
            redis_port: 6379,
            public_ws_base: None,
            cors_origins: vec!["http://localhost:5173".into()],
            request_timeout_secs: 30,
            shutdown_timeout_secs: 5,
            queue_pop_timeout_ms: 1000,
            result_poll_interval_ms: 250,
            transform_workers: 3,
            submit_rate_per_sec: 10,
            backend_reconnect_secs: None,
            parameters_path: None,
            log_format: LogFormat::Text,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                 |
    /// |---------------------------|-------------------------|
    /// | `HOST`                    | `127.0.0.1`             |
    /// | `PORT`                    | `8082`                  |
    /// | `WORKER_PORT`             | `50003`                 |
    /// | `REDIS_HOST`              | `localhost`             |
    /// | `REDIS_PORT`              | `6379`                  |
    /// | `PUBLIC_WS_BASE`          | `ws://{HOST}:{PORT}`    |
    /// | `CORS_ORIGINS`            | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`   | `5`                     |
    /// | `QUEUE_POP_TIMEOUT_MS`    | `1000`                  |
    /// | `RESULT_POLL_INTERVAL_MS` | `250`                   |
    /// | `TRANSFORM_WORKERS`       | `3`                     |
    /// | `SUBMIT_RATE_PER_SEC`     | `10`                    |
    /// | `BACKEND_RECONNECT_SECS`    | unset (sticky fallback) |
    /// | `PARAMETERS_PATH`         | unset (builtin catalog) |
    /// | `LOG_FORMAT`              | `text`                  |
    ///
    /// A malformed value is a [`CoreError::Validation`] naming the variable.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let cors_origins: Vec<String> = match lookup("CORS_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.cors_origins,
        };

        let log_format = match lookup("LOG_FORMAT") {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port)?,
            worker_port: parse_or(&lookup, "WORKER_PORT", defaults.worker_port)?,
            redis_host: lookup("REDIS_HOST").unwrap_or(defaults.redis_host),
            redis_port: parse_or(&lookup, "REDIS_PORT", defaults.redis_port)?,
            public_ws_base: lookup("PUBLIC_WS_BASE").filter(|s| !s.trim().is_empty()),
            cors_origins,
            request_timeout_secs: parse_or(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            )?,
            shutdown_timeout_secs: parse_or(
                &lookup,
                "SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout_secs,
            )?,
            queue_pop_timeout_ms: parse_or(
                &lookup,
                "QUEUE_POP_TIMEOUT_MS",
                defaults.queue_pop_timeout_ms,
            )?,
            result_poll_interval_ms: parse_or(
                &lookup,
                "RESULT_POLL_INTERVAL_MS",
                defaults.result_poll_interval_ms,
            )?,
            transform_workers: parse_or(&lookup, "TRANSFORM_WORKERS", defaults.transform_workers)?,
            submit_rate_per_sec: parse_or(
                &lookup,
                "SUBMIT_RATE_PER_SEC",
                defaults.submit_rate_per_sec,
            )?,
            backend_reconnect_secs: parse_opt(&lookup, "BACKEND_RECONNECT_SECS")?,
            parameters_path: lookup("PARAMETERS_PATH").map(PathBuf::from),
            log_format,
        })
    }

    pub fn backend_config(&self) -> BackendConfig {
        let config = BackendConfig::new(&self.redis_host, self.redis_port);
        match self.backend_reconnect_secs {
            Some(secs) => config.with_policy(FallbackPolicy::Reconnect(ReconnectConfig::starting_at(
                Duration::from_secs(secs),
            ))),
            None => config,
        }
    }

    pub fn ws_base(&self) -> String {
        match &self.public_ws_base {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("ws://{}:{}", self.host, self.port),
        }
    }

    pub fn task_ws_url(&self, id: JobId) -> String {
        format!("{}/ws/{id}", self.ws_base())
    }

    pub fn stream_ws_url(&self, id: StreamId) -> String {
        format!("{}/ws/stream/{id}", self.ws_base())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn queue_pop_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_pop_timeout_ms)
    }

    pub fn result_poll_interval(&self) -> Duration {
        Duration::from_millis(self.result_poll_interval_ms.max(1))
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(lookup, key)?.unwrap_or(default))
}

fn parse_opt<T, F>(lookup: &F, key: &str) -> Result<Option<T>, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| CoreError::Validation(format!("{key} must be a valid number: {e}")))
        })
        .transpose()
}
