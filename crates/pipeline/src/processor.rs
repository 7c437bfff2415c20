//! The per-frame algorithm: shed, adapt, transform, smooth, re-time.

use std::sync::Arc;
use std::time::Instant;

use cellcast_core::submission::TransformKind;
use image::RgbImage;

use crate::error::TransformError;
use crate::frame::Frame;
use crate::kernels::{combine_and, scale_to, Kernel, KernelSet};
use crate::pool::WorkerPool;
use crate::session::StreamSession;

/// Source of processing-latency timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Running tally of what happened to each inbound frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub transformed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub passed_through: u64,
}

impl ProcessOutcome {
    pub fn total(&self) -> u64 {
        self.transformed + self.skipped + self.failed + self.passed_through
    }
}

pub struct FrameProcessor {
    session: StreamSession,
    pool: WorkerPool,
    kernels: KernelSet,
    clock: Arc<dyn Clock>,
    outcome: ProcessOutcome,
}

impl FrameProcessor {
    pub fn new(session: StreamSession, pool: WorkerPool) -> Self {
        Self {
            session,
            pool,
            kernels: KernelSet::default(),
            clock: Arc::new(SystemClock),
            outcome: ProcessOutcome::default(),
        }
    }

    pub fn with_kernels(mut self, kernels: KernelSet) -> Self {
        self.kernels = kernels;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    pub fn set_transform(&mut self, transform: TransformKind) {
        self.session.set_transform(transform);
    }

    pub fn outcome(&self) -> ProcessOutcome {
        self.outcome
    }

    /// Stop accepting kernel work. Later frames are forwarded unchanged.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Produce the outbound frame for `frame`.
    ///
    /// Never fails: a shed or failed frame is forwarded unchanged. The
    /// returned frame always carries the input's `pts` and `time_base`.
    pub async fn process(&mut self, frame: Frame) -> Frame {
        let sequence = self.session.begin_frame();

        if self.session.transform() == TransformKind::Passthrough {
            self.outcome.passed_through += 1;
            return frame;
        }

        if self.session.should_skip() {
            self.outcome.skipped += 1;
            return frame;
        }

        let started = self.clock.now();
        let result = self.transform(&frame).await;
        let latency = self.clock.now().saturating_duration_since(started);
        self.session.record_latency(latency);

        match result {
            Ok(image) => {
                self.outcome.transformed += 1;
                let smoothed = self.session.smooth(image);
                frame.with_image(smoothed)
            }
            Err(e) => {
                self.outcome.failed += 1;
                tracing::warn!(
                    stream_id = %self.session.stream_id(),
                    sequence,
                    error = %e,
                    "Frame transform failed, forwarding original",
                );
                frame
            }
        }
    }

    async fn transform(&mut self, frame: &Frame) -> Result<RgbImage, TransformError> {
        let seconds = frame.seconds();
        let (width, height) = (frame.width(), frame.height());

        match self.session.transform() {
            TransformKind::Passthrough => Ok(frame.image.clone()),
            TransformKind::Rotate => {
                let kernel = Arc::clone(&self.kernels.rotate);
                let image = frame.image.clone();
                self.pool.run(move || kernel.apply(&image, seconds)).await
            }
            TransformKind::Edges => {
                self.session.adapt_quality();
                let (sw, sh) = self.session.scaled_dimensions(width, height);
                let kernel = Arc::clone(&self.kernels.edges);
                let image = frame.image.clone();
                self.pool
                    .run(move || {
                        let scaled = scale_to(&image, sw, sh);
                        let out = kernel.apply(&scaled, seconds)?;
                        Ok(scale_to(&out, width, height))
                    })
                    .await
            }
            TransformKind::Cartoon => {
                self.session.adapt_quality();
                let (sw, sh) = self.session.scaled_dimensions(width, height);
                let image = frame.image.clone();
                let scaled = Arc::new(self.pool.run(move || Ok(scale_to(&image, sw, sh))).await?);

                let color = self.run_channel(&self.kernels.color, &scaled, seconds);
                let mask = self.run_channel(&self.kernels.edge_mask, &scaled, seconds);
                let (color, mask) = tokio::join!(color, mask);
                let (color, mask) = (color?, mask?);

                self.pool
                    .run(move || {
                        let combined = combine_and(&color, &mask)?;
                        Ok(scale_to(&combined, width, height))
                    })
                    .await
            }
        }
    }

    fn run_channel(
        &self,
        kernel: &Arc<dyn Kernel>,
        image: &Arc<RgbImage>,
        seconds: f64,
    ) -> impl std::future::Future<Output = Result<RgbImage, TransformError>> + '_ {
        let kernel = Arc::clone(kernel);
        let image = Arc::clone(image);
        self.pool.run(move || kernel.apply(&image, seconds))
    }
}

impl Drop for FrameProcessor {
    fn drop(&mut self) {
        self.pool.close();
    }
}
