//! Submission throttling.
//!
//! A token bucket shared by every submission request. Requests over the
//! limit wait for a token instead of being rejected.

use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::state::AppState;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket refilled continuously at `rate` tokens per second, with a
/// burst capacity of `rate`.
#[derive(Debug)]
pub struct SubmitLimiter {
    rate: f64,
    bucket: Mutex<Bucket>,
}

impl SubmitLimiter {
    /// A rate of zero is treated as one per second.
    pub fn per_second(rate: u32) -> Self {
        let rate = f64::from(rate.max(1));
        Self {
            rate,
            bucket: Mutex::new(Bucket {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take a token, sleeping until one is available. Returns the time
    /// spent waiting.
    ///
    /// The bucket stays locked while a caller sleeps, so waiters are served
    /// in arrival order.
    pub async fn acquire(&self) -> Duration {
        let mut bucket = self.bucket.lock().await;
        let mut waited = Duration::ZERO;

        loop {
            self.refill(&mut bucket);
            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                return waited;
            }

            let wait = Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate);
            tokio::time::sleep(wait).await;
            waited += wait;
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.rate);
        bucket.last_refill = now;
    }
}

/// Route middleware holding each request until the limiter admits it.
pub async fn throttle_submissions(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let waited = state.submit_limiter.acquire().await;
    if !waited.is_zero() {
        tracing::debug!(
            waited_ms = waited.as_millis() as u64,
            path = %request.uri().path(),
            "Submission throttled",
        );
    }
    next.run(request).await
}
