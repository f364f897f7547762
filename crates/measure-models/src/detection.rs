//! Detection candidates and fused per-tick results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::frame::Point;

/// Clamp a confidence score into [0, 1], mapping NaN to 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A detection produced at a single resample scale.
///
/// Endpoints and widths are already mapped back to full-frame pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionCandidate {
    pub endpoint_a: Point,
    pub endpoint_b: Point,
    pub width_samples: Vec<f64>,
    pub raw_confidence: f64,
    pub scale: f64,
    /// Angle between the two halves of the centerline, degrees.
    pub curvature_deg: Option<f64>,
}

impl DetectionCandidate {
    /// Pixel distance between the two endpoints.
    pub fn length_pixels(&self) -> f64 {
        self.endpoint_a.distance(&self.endpoint_b)
    }

    /// Median cross-section width, or 0 when no widths were sampled.
    pub fn girth_pixels(&self) -> f64 {
        if self.width_samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.width_samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }
}

/// The single fused detection for a tick.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DetectionResult {
    Found {
        base_point: Point,
        tip_point: Point,
        girth_pixels: f64,
        confidence: f64,
        curvature_deg: Option<f64>,
    },
    #[default]
    NotFound,
}

impl DetectionResult {
    /// Confidence of the result; 0 for `NotFound`.
    pub fn confidence(&self) -> f64 {
        match self {
            DetectionResult::Found { confidence, .. } => *confidence,
            DetectionResult::NotFound => 0.0,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, DetectionResult::Found { .. })
    }

    /// Base-to-tip pixel length; 0 for `NotFound`.
    pub fn length_pixels(&self) -> f64 {
        match self {
            DetectionResult::Found {
                base_point,
                tip_point,
                ..
            } => base_point.distance(tip_point),
            DetectionResult::NotFound => 0.0,
        }
    }

    /// Scale every coordinate and width, e.g. frame space to overlay space.
    pub fn scaled(&self, factor: f64) -> DetectionResult {
        match self {
            DetectionResult::Found {
                base_point,
                tip_point,
                girth_pixels,
                confidence,
                curvature_deg,
            } => DetectionResult::Found {
                base_point: base_point.scaled(factor),
                tip_point: tip_point.scaled(factor),
                girth_pixels: girth_pixels * factor,
                confidence: *confidence,
                curvature_deg: *curvature_deg,
            },
            DetectionResult::NotFound => DetectionResult::NotFound,
        }
    }
}
