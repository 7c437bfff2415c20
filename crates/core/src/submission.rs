//! Client submission documents, validated once at the HTTP boundary.
//!
//! Downstream code (queue, consumer loop, executor) receives these already
//! validated and never re-checks field presence or types.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::CoreError;

/// Body of `POST /tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct TaskSubmission {
    /// Name of the processing mode; its parameters come from the catalog.
    #[validate(length(min = 1, max = 64, message = "must be 1-64 characters"))]
    pub mode: String,

    /// Base64 image, either bare or as a `data:<mime>;base64,` URL.
    #[validate(custom(function = "validate_image_data"))]
    pub image: String,
}

impl TaskSubmission {
    /// Parse and validate an untyped JSON body.
    pub fn from_json(value: serde_json::Value) -> Result<Self, CoreError> {
        let submission: TaskSubmission = serde_json::from_value(value)
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        submission.validate()?;
        Ok(submission)
    }

    /// Decode the image field into raw encoded bytes (PNG, JPEG, ...).
    pub fn image_bytes(&self) -> Result<Vec<u8>, CoreError> {
        STANDARD
            .decode(strip_data_url(&self.image))
            .map_err(|e| CoreError::Validation(format!("image is not valid base64: {e}")))
    }
}

/// Return the base64 portion of a data URL, or the input unchanged.
pub fn strip_data_url(value: &str) -> &str {
    match value.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => value,
    }
}

fn validate_image_data(value: &str) -> Result<(), ValidationError> {
    let data = strip_data_url(value).trim();
    if data.is_empty() {
        return Err(ValidationError::new("empty").with_message("must not be empty".into()));
    }
    if STANDARD.decode(data).is_err() {
        return Err(ValidationError::new("base64").with_message("must be base64 encoded".into()));
    }
    Ok(())
}

/// Frame transform applied by a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Cartoon,
    Edges,
    Rotate,
    #[serde(rename = "none")]
    Passthrough,
}

impl TransformKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransformKind::Cartoon => "cartoon",
            TransformKind::Edges => "edges",
            TransformKind::Rotate => "rotate",
            TransformKind::Passthrough => "none",
        }
    }
}

/// Default cadence when the client does not ask for one.
pub const DEFAULT_TARGET_FPS: u32 = 30;

/// Body of `POST /offer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct StreamOffer {
    pub mode: TransformKind,

    #[validate(range(min = 1, max = 120, message = "must be between 1 and 120"))]
    #[serde(default)]
    pub target_fps: Option<u32>,

    /// Sent by the browser client (`"videoStream"`); accepted and ignored.
    #[serde(default, rename = "requestType", skip_serializing)]
    pub request_type: Option<String>,
}

impl StreamOffer {
    pub fn from_json(value: serde_json::Value) -> Result<Self, CoreError> {
        let offer: StreamOffer = serde_json::from_value(value)
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        offer.validate()?;
        Ok(offer)
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps.unwrap_or(DEFAULT_TARGET_FPS)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_bare_base64() {
        let sub = TaskSubmission::from_json(json!({"mode": "edge_detect", "image": "aGVsbG8="}))
            .unwrap();
        assert_eq!(sub.image_bytes().unwrap(), b"hello");
    }

    #[test]
    fn accepts_data_url() {
        let sub = TaskSubmission::from_json(json!({
            "mode": "inversion",
            "image": "data:image/png;base64,aGVsbG8="
        }))
        .unwrap();
        assert_eq!(sub.image_bytes().unwrap(), b"hello");
    }

    #[test]
    fn missing_mode_is_rejected() {
        let err = TaskSubmission::from_json(json!({"image": "aGVsbG8="})).unwrap_err();
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("mode"));
    }

    #[test]
    fn wrong_type_is_rejected() {
        let err = TaskSubmission::from_json(json!({"mode": 7, "image": "aGVsbG8="})).unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn garbage_image_is_rejected() {
        let err = TaskSubmission::from_json(json!({"mode": "edge_detect", "image": "%%%"}))
            .unwrap_err();
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("image"));
    }

    #[test]
    fn empty_mode_is_rejected() {
        let err = TaskSubmission::from_json(json!({"mode": "", "image": "aGVsbG8="})).unwrap_err();
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("mode"));
    }

    #[test]
    fn offer_defaults_to_thirty_fps() {
        let offer = StreamOffer::from_json(json!({"requestType": "videoStream", "mode": "cartoon"}))
            .unwrap();
        assert_eq!(offer.mode, TransformKind::Cartoon);
        assert_eq!(offer.target_fps(), DEFAULT_TARGET_FPS);
    }

    #[test]
    fn offer_rejects_out_of_range_fps() {
        let err = StreamOffer::from_json(json!({"mode": "edges", "target_fps": 0})).unwrap_err();
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("target_fps"));
    }

    #[test]
    fn offer_rejects_unknown_transform() {
        let err = StreamOffer::from_json(json!({"mode": "sepia"})).unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn passthrough_is_spelled_none() {
        let kind: TransformKind = serde_json::from_value(json!("none")).unwrap();
        assert_eq!(kind, TransformKind::Passthrough);
        assert_eq!(kind.as_str(), "none");
    }
}
