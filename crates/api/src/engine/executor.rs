//! Job execution seam.
//!
//! The consumer loop hands every dequeued job to a [`JobExecutor`]. The
//! default [`ModeExecutor`] resolves the job's mode parameters and decodes
//! the submitted image; the numerical processing itself belongs to the
//! client that receives the result.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cellcast_core::job::Job;
use serde_json::json;

use crate::parameters::ParameterRegistry;

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Unknown mode '{0}'")]
    UnknownMode(String),

    #[error("Image could not be decoded: {0}")]
    ImageDecode(String),

    #[error("Processing failed: {0}")]
    Internal(String),
}

#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Produce the result document for `job`.
    async fn execute(&self, job: &Job) -> Result<serde_json::Value, ProcessingError>;
}

pub struct ModeExecutor {
    parameters: Arc<ParameterRegistry>,
}

impl ModeExecutor {
    pub fn new(parameters: Arc<ParameterRegistry>) -> Self {
        Self { parameters }
    }
}

#[async_trait]
impl JobExecutor for ModeExecutor {
    async fn execute(&self, job: &Job) -> Result<serde_json::Value, ProcessingError> {
        let mode = &job.payload.mode;
        let parameters = self
            .parameters
            .get(mode)
            .await
            .ok_or_else(|| ProcessingError::UnknownMode(mode.clone()))?;

        let bytes = job
            .payload
            .image_bytes()
            .map_err(|e| ProcessingError::ImageDecode(e.to_string()))?;

        let gray = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&bytes).map(|img| img.to_luma8())
        })
        .await
        .map_err(|e| ProcessingError::Internal(format!("decoder task failed: {e}")))?
        .map_err(|e| ProcessingError::ImageDecode(e.to_string()))?;

        let (width, height) = gray.dimensions();
        tracing::debug!(job_id = %job.id, mode = %mode, width, height, "Decoded job image");

        Ok(json!({
            "mode": mode,
            "parameters": parameters,
            "image": {
                "width": width,
                "height": height,
                "format": "gray8",
                "data": STANDARD.encode(gray.into_raw()),
            },
        }))
    }
}
