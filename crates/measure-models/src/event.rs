//! Events published to the consuming UI/automation layer.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::capture_state::CaptureState;
use crate::frame::Point;
use crate::measurement::MeasurementSample;

/// Pipeline output events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Smoothed detection for the latest tick.
    DetectionUpdated {
        base_point: Point,
        tip_point: Point,
        girth_pixels: f64,
        confidence: f64,
        quality_score: f64,
        curvature_deg: Option<f64>,
    },
    /// The subject was lost after a previous detection.
    DetectionLost { timestamp: f64 },
    CaptureStateChanged { state: CaptureState, timestamp: f64 },
    CaptureFired {
        sample: MeasurementSample,
        captured_at: DateTime<Utc>,
    },
    /// The frame source stopped delivering frames.
    SourceUnavailable { timestamp: f64 },
    SourceResumed { timestamp: f64 },
}

impl PipelineEvent {
    /// Event name used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::DetectionUpdated { .. } => "detection_updated",
            PipelineEvent::DetectionLost { .. } => "detection_lost",
            PipelineEvent::CaptureStateChanged { .. } => "capture_state_changed",
            PipelineEvent::CaptureFired { .. } => "capture_fired",
            PipelineEvent::SourceUnavailable { .. } => "source_unavailable",
            PipelineEvent::SourceResumed { .. } => "source_resumed",
        }
    }
}
