#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Kernel '{kernel}' failed: {message}")]
    Kernel {
        kernel: &'static str,
        message: String,
    },

    #[error("Worker pool task failed: {0}")]
    Pool(String),

    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Frame codec error: {0}")]
    Codec(String),

    #[error("Dimension mismatch: {left_width}x{left_height} vs {right_width}x{right_height}")]
    DimensionMismatch {
        left_width: u32,
        left_height: u32,
        right_width: u32,
        right_height: u32,
    },
}

impl TransformError {
    pub(crate) fn mismatch(left: (u32, u32), right: (u32, u32)) -> Self {
        TransformError::DimensionMismatch {
            left_width: left.0,
            left_height: left.1,
            right_width: right.0,
            right_height: right.1,
        }
    }
}
