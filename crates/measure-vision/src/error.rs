//! Error types for vision operations.

use measure_models::ModelError;
use thiserror::Error;

/// Result type for vision operations.
pub type VisionResult<T> = Result<T, VisionError>;

/// Errors that can occur during frame analysis.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(#[from] ModelError),

    #[error("Detection failed: {0}")]
    DetectionFailed(String),

    #[error("Malformed worker response: {0}")]
    MalformedResponse(String),

    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("Worker returned error: {0}")]
    WorkerFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VisionError {
    /// Create a detection failure error.
    pub fn detection_failed(message: impl Into<String>) -> Self {
        Self::DetectionFailed(message.into())
    }

    /// Create a malformed response error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Create a worker unavailable error.
    pub fn worker_unavailable(message: impl Into<String>) -> Self {
        Self::WorkerUnavailable(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether a retry through another backend could succeed.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, VisionError::WorkerUnavailable(_))
    }
}
