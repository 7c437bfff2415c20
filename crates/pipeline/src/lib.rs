//! Adaptive per-stream frame transform pipeline.
//!
//! A [`FrameProcessor`] owns one stream's [`StreamSession`] state and a
//! bounded [`WorkerPool`]. Each inbound [`Frame`] either passes straight
//! through (overload shedding) or is transformed off the async runtime,
//! smoothed against the previous output, and emitted with its original
//! timestamp and time base.

pub mod codec;
pub mod error;
pub mod frame;
pub mod kernels;
pub mod pool;
pub mod processor;
pub mod session;

pub use error::TransformError;
pub use frame::{Frame, TimeBase};
pub use kernels::{Kernel, KernelSet};
pub use pool::WorkerPool;
pub use processor::{Clock, FrameProcessor, ProcessOutcome, SystemClock};
pub use session::StreamSession;
