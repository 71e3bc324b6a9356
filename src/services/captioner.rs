//! Captioning backend abstraction.
//!
//! The HTTP layer only sees this boundary; the real engine, the degraded-mode
//! stand-in and the test doubles all live behind it.

use async_trait::async_trait;
use image::DynamicImage;
use thiserror::Error;

/// Caption returned to clients when no model could be loaded at startup.
pub const MODEL_NOT_LOADED_CAPTION: &str = "Model not loaded. Please try again later.";

#[derive(Debug, Error)]
pub enum CaptionError {
    /// No model is loaded; the service is running degraded.
    #[error("no captioning model is loaded")]
    Unavailable,

    /// Generation was attempted and failed.
    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait ImageCaptioner: Send + Sync {
    /// Generate a caption for a decoded three-channel image.
    async fn caption(&self, image: &DynamicImage) -> Result<String, CaptionError>;

    /// Whether a real model backs this captioner.
    fn is_loaded(&self) -> bool;
}

/// Stand-in installed when model loading fails at startup. Requests still
/// succeed; the caption reports the model as unavailable.
pub struct UnavailableCaptioner;

#[async_trait]
impl ImageCaptioner for UnavailableCaptioner {
    async fn caption(&self, _image: &DynamicImage) -> Result<String, CaptionError> {
        Err(CaptionError::Unavailable)
    }

    fn is_loaded(&self) -> bool {
        false
    }
}

/// Fixed-output captioner for tests.
pub struct MockCaptioner {
    caption: String,
}

impl MockCaptioner {
    pub fn new(caption: impl Into<String>) -> Self {
        Self {
            caption: caption.into(),
        }
    }
}

#[async_trait]
impl ImageCaptioner for MockCaptioner {
    async fn caption(&self, _image: &DynamicImage) -> Result<String, CaptionError> {
        Ok(self.caption.clone())
    }

    fn is_loaded(&self) -> bool {
        true
    }
}

/// Always-failing captioner for exercising the generation-error path in tests.
pub struct FailingCaptioner {
    reason: String,
}

impl FailingCaptioner {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ImageCaptioner for FailingCaptioner {
    async fn caption(&self, _image: &DynamicImage) -> Result<String, CaptionError> {
        Err(CaptionError::Failed(self.reason.clone()))
    }

    fn is_loaded(&self) -> bool {
        true
    }
}
