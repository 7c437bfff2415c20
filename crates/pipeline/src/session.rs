//! Per-stream adaptive state.
//!
//! A [`StreamSession`] is plain data owned by exactly one
//! [`FrameProcessor`](crate::processor::FrameProcessor). It decides whether
//! a frame is shed, how far to downscale, and how to smooth the output; it
//! performs no I/O and never touches pixels outside [`StreamSession::smooth`].

use std::collections::VecDeque;
use std::time::Duration;

use cellcast_core::stream::StreamConfig;
use cellcast_core::submission::{TransformKind, DEFAULT_TARGET_FPS};
use cellcast_core::types::StreamId;
use image::RgbImage;

use crate::kernels::blend;

/// Samples kept for the trailing mean latency.
pub const LATENCY_WINDOW: usize = 10;

/// Processed frames kept for temporal smoothing.
pub const RING_CAPACITY: usize = 30;

/// Under overload only every n-th frame is transformed.
pub const SKIP_THRESHOLD: u64 = 5;

pub const MIN_QUALITY: f64 = 0.5;
pub const MAX_QUALITY: f64 = 1.0;
pub const QUALITY_STEP: f64 = 0.1;

#[derive(Debug)]
pub struct StreamSession {
    stream_id: StreamId,
    transform: TransformKind,
    target_interval: Duration,
    quality_scale: f64,
    frame_count: u64,
    skip_threshold: u64,
    latencies: VecDeque<Duration>,
    ring: VecDeque<RgbImage>,
}

impl StreamSession {
    pub fn new(stream_id: StreamId, transform: TransformKind, target_fps: u32) -> Self {
        let fps = if target_fps == 0 {
            DEFAULT_TARGET_FPS
        } else {
            target_fps
        };
        Self {
            stream_id,
            transform,
            target_interval: Duration::from_secs(1) / fps,
            quality_scale: MAX_QUALITY,
            frame_count: 0,
            skip_threshold: SKIP_THRESHOLD,
            latencies: VecDeque::with_capacity(LATENCY_WINDOW),
            ring: VecDeque::with_capacity(RING_CAPACITY),
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.stream_id, config.transform, config.target_fps)
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn transform(&self) -> TransformKind {
        self.transform
    }

    /// Switch transforms mid-stream. Smoothing restarts so frames of two
    /// different transforms are never blended together.
    pub fn set_transform(&mut self, transform: TransformKind) {
        if self.transform != transform {
            self.transform = transform;
            self.ring.clear();
        }
    }

    pub fn target_interval(&self) -> Duration {
        self.target_interval
    }

    pub fn quality_scale(&self) -> f64 {
        self.quality_scale
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn buffered_frames(&self) -> usize {
        self.ring.len()
    }

    /// Count an inbound frame and return its 1-based sequence number.
    pub fn begin_frame(&mut self) -> u64 {
        self.frame_count += 1;
        self.frame_count
    }

    /// `None` until the first latency sample.
    pub fn mean_latency(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let total: Duration = self.latencies.iter().sum();
        Some(total / self.latencies.len() as u32)
    }

    /// Shed the current frame when the mean latency exceeds twice the frame
    /// interval, except on every `skip_threshold`-th frame.
    pub fn should_skip(&self) -> bool {
        match self.mean_latency() {
            Some(mean) => {
                mean > self.target_interval * 2 && self.frame_count % self.skip_threshold != 0
            }
            None => false,
        }
    }

    /// Step the quality scale down when behind, up otherwise, and return it.
    pub fn adapt_quality(&mut self) -> f64 {
        let behind = self
            .mean_latency()
            .is_some_and(|mean| mean > self.target_interval);
        self.quality_scale = if behind {
            (self.quality_scale - QUALITY_STEP).max(MIN_QUALITY)
        } else {
            (self.quality_scale + QUALITY_STEP).min(MAX_QUALITY)
        };
        // Keep the scale on the 0.1 grid despite float drift.
        self.quality_scale = (self.quality_scale * 10.0).round() / 10.0;
        self.quality_scale
    }

    /// Dimensions to process at for the current quality scale.
    pub fn scaled_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        if self.quality_scale >= MAX_QUALITY {
            return (width, height);
        }
        let scale = |v: u32| ((f64::from(v) * self.quality_scale) as u32).max(1);
        (scale(width), scale(height))
    }

    pub fn record_latency(&mut self, latency: Duration) {
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    /// Buffer a processed image and return what should be emitted: the
    /// image itself until the ring is full, then the average of it and the
    /// previous one.
    pub fn smooth(&mut self, image: RgbImage) -> RgbImage {
        if self
            .ring
            .back()
            .is_some_and(|last| last.dimensions() != image.dimensions())
        {
            // Resolution changed; earlier frames cannot be blended.
            self.ring.clear();
        }

        if self.ring.len() == RING_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(image);

        let current = &self.ring[self.ring.len() - 1];
        if self.ring.len() < RING_CAPACITY {
            return current.clone();
        }
        let previous = &self.ring[self.ring.len() - 2];
        blend(previous, current).unwrap_or_else(|_| current.clone())
    }
}
