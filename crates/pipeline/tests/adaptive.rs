//! Whole-pipeline behaviour under controlled latency.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cellcast_core::submission::TransformKind;
use cellcast_pipeline::kernels::{Kernel, KernelSet};
use cellcast_pipeline::session::SKIP_THRESHOLD;
use cellcast_pipeline::{
    Clock, Frame, FrameProcessor, StreamSession, TimeBase, TransformError, WorkerPool,
};
use image::{Rgb, RgbImage};

/// Every reading is `step` later than the previous one.
struct SteppingClock {
    now: Mutex<Instant>,
    step: Duration,
}

impl Clock for SteppingClock {
    fn now(&self) -> Instant {
        let mut now = self.now.lock().unwrap();
        *now += self.step;
        *now
    }
}

fn overloaded_clock(target_fps: u32) -> Arc<SteppingClock> {
    // Three frame intervals per transformed frame, well past the 2x shed line.
    Arc::new(SteppingClock {
        now: Mutex::new(Instant::now()),
        step: Duration::from_secs(1) / target_fps * 3,
    })
}

struct Invert;

impl Kernel for Invert {
    fn name(&self) -> &'static str {
        "invert"
    }

    fn apply(&self, image: &RgbImage, _seconds: f64) -> Result<RgbImage, TransformError> {
        let mut out = image.clone();
        image::imageops::invert(&mut out);
        Ok(out)
    }
}

fn frame(seq: i64) -> Frame {
    Frame::new(
        RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])),
        seq * 3_000,
        TimeBase::new(1, 90_000),
    )
}

// ---------------------------------------------------------------------------
// Test: overload shedding
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transformed_fraction_converges_to_one_in_skip_threshold() {
    let session = StreamSession::new(uuid::Uuid::new_v4(), TransformKind::Edges, 30);
    let mut processor =
        FrameProcessor::new(session, WorkerPool::default()).with_clock(overloaded_clock(30));

    let frames = 200;
    for seq in 0..frames {
        processor.process(frame(seq)).await;
    }

    let outcome = processor.outcome();
    assert_eq!(outcome.total(), frames as u64);
    assert_eq!(outcome.failed, 0);

    let fraction = outcome.transformed as f64 / frames as f64;
    let expected = 1.0 / SKIP_THRESHOLD as f64;
    assert!(
        (fraction - expected).abs() < 0.02,
        "transformed fraction {fraction} should be near {expected}"
    );
}

#[tokio::test]
async fn overload_drives_quality_to_floor() {
    let session = StreamSession::new(uuid::Uuid::new_v4(), TransformKind::Cartoon, 30);
    let mut processor =
        FrameProcessor::new(session, WorkerPool::default()).with_clock(overloaded_clock(30));

    for seq in 0..40 {
        processor.process(frame(seq)).await;
    }
    assert_eq!(processor.session().quality_scale(), 0.5);
}

// ---------------------------------------------------------------------------
// Test: timing invariant
// ---------------------------------------------------------------------------

#[tokio::test]
async fn emitted_frames_keep_pts_and_time_base_on_every_path() {
    let kernels = KernelSet {
        edges: Arc::new(Invert),
        ..KernelSet::default()
    };
    let session = StreamSession::new(uuid::Uuid::new_v4(), TransformKind::Edges, 30);
    let mut processor = FrameProcessor::new(session, WorkerPool::default())
        .with_kernels(kernels)
        .with_clock(overloaded_clock(30));

    // Long enough to hit shed, transformed and smoothed frames.
    for seq in 0..80 {
        let input = frame(seq);
        let out = processor.process(input.clone()).await;
        assert_eq!(out.pts, input.pts);
        assert_eq!(out.time_base, input.time_base);
        assert_eq!(out.image.dimensions(), input.image.dimensions());
    }

    let outcome = processor.outcome();
    assert!(outcome.skipped > 0);
    assert!(outcome.transformed > 0);
}

#[tokio::test]
async fn switching_transform_mid_stream_takes_effect() {
    let kernels = KernelSet {
        edges: Arc::new(Invert),
        ..KernelSet::default()
    };
    let session = StreamSession::new(uuid::Uuid::new_v4(), TransformKind::Passthrough, 30);
    let mut processor = FrameProcessor::new(session, WorkerPool::default()).with_kernels(kernels);

    let input = frame(0);
    assert_eq!(processor.process(input.clone()).await, input);

    processor.set_transform(TransformKind::Edges);
    let out = processor.process(frame(1)).await;
    assert_eq!(out.image.get_pixel(0, 0).0, [245, 235, 225]);
}
