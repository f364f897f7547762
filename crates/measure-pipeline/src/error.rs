//! Pipeline error types.

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Tick timed out after {0} ms")]
    TickTimeout(u64),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Vision error: {0}")]
    Vision(#[from] measure_vision::VisionError),
}

impl PipelineError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Failures contained within one tick; the loop keeps running.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TickTimeout(_) | PipelineError::Vision(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::TickTimeout(_) => "timeout",
            PipelineError::ConfigError(_) => "config",
            PipelineError::Vision(measure_vision::VisionError::MalformedResponse(_)) => "malformed_response",
            PipelineError::Vision(_) => "vision",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use measure_vision::VisionError;

    #[test]
    fn test_transient_classification() {
        assert!(PipelineError::TickTimeout(50).is_transient());
        assert!(PipelineError::from(VisionError::malformed("short")).is_transient());
        assert!(!PipelineError::config_error("bad").is_transient());
    }

    #[test]
    fn test_kind_labels() {
        let err = PipelineError::from(VisionError::malformed("short"));
        assert_eq!(err.kind(), "malformed_response");
        assert_eq!(PipelineError::TickTimeout(5).kind(), "timeout");
    }
}
