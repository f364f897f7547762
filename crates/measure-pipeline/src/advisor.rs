//! Advisory prediction and correction hints.
//!
//! Reads detector and history outputs and never writes back. Consumers
//! may apply a correction, which then re-enters as a normal detection.

use measure_models::{DetectionResult, Point, QualityReport};
use measure_vision::EdgeCache;
use serde::{Deserialize, Serialize};

use crate::history::{OutlierFlag, StabilityWindow, MIN_STABLE_SAMPLES};
use crate::stats::{coefficient_of_variation, linear_slope, mean};

/// Samples averaged for the prediction.
pub const PREDICTION_HISTORY: usize = 5;
pub const HISTORY_WEIGHT: f64 = 0.7;
pub const CURRENT_WEIGHT: f64 = 0.3;

/// Corrections are only offered above this detection confidence.
pub const CORRECTION_MIN_CONFIDENCE: f64 = 0.6;

/// Relative slope per sample treated as a real trend.
pub const TREND_THRESHOLD: f64 = 0.02;
pub const CONSISTENCY_WARNING: f64 = 0.7;

const PERSPECTIVE_CORRECTION_BELOW: f64 = 0.6;
const PERSPECTIVE_HIGH_SEVERITY_BELOW: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictedMeasurement {
    pub length_units: f64,
    pub girth_units: f64,
}

/// Endpoints snapped to the cached edge reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointCorrection {
    pub base_point: Point,
    pub tip_point: Point,
    /// Detection confidence the correction was derived from.
    pub confidence: f64,
    /// Whether either endpoint actually moved.
    pub adjusted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionSeverity {
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveCorrection {
    pub scale_adjustment: f64,
    pub angle_deg: f64,
    pub severity: CorrectionSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    /// Length slope per sample relative to the mean length.
    pub relative_slope: f64,
    pub significant: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Consistency {
    pub score: f64,
    pub warning: bool,
}

/// Everything the advisor has to say about one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    pub predicted: Option<PredictedMeasurement>,
    pub correction: Option<PointCorrection>,
    pub outlier: Option<OutlierFlag>,
    pub trend: Option<Trend>,
    pub consistency: Option<Consistency>,
    pub perspective: Option<PerspectiveCorrection>,
}

impl Advice {
    pub fn is_empty(&self) -> bool {
        self == &Advice::default()
    }
}

/// Read-only view of pipeline state handed to the advisor.
pub struct AdviceInput<'a> {
    /// Fused detection before smoothing.
    pub detection: &'a DetectionResult,
    pub units_per_pixel: Option<f64>,
    pub window: &'a StabilityWindow,
    pub edges: &'a EdgeCache,
    pub quality: &'a QualityReport,
}

#[derive(Debug, Clone, Copy)]
pub struct Advisor {
    snap_radius: u32,
}

impl Advisor {
    pub fn new(snap_radius: u32) -> Self {
        Self { snap_radius }
    }

    pub fn advise(&self, input: &AdviceInput<'_>) -> Advice {
        Advice {
            predicted: predict(input.detection, input.units_per_pixel, input.window),
            correction: self.correct(input.detection, input.edges),
            outlier: input.window.outlier(),
            trend: trend(input.window),
            consistency: consistency(input.window),
            perspective: perspective_correction(input.quality.environment.perspective),
        }
    }

    fn correct(&self, detection: &DetectionResult, edges: &EdgeCache) -> Option<PointCorrection> {
        let DetectionResult::Found {
            base_point,
            tip_point,
            confidence,
            ..
        } = detection
        else {
            return None;
        };
        if *confidence <= CORRECTION_MIN_CONFIDENCE {
            return None;
        }
        let base = edges.snap(*base_point, self.snap_radius);
        let tip = edges.snap(*tip_point, self.snap_radius);
        Some(PointCorrection {
            adjusted: base != *base_point || tip != *tip_point,
            base_point: base,
            tip_point: tip,
            confidence: *confidence,
        })
    }
}

/// Blend recent history with the current raw detection.
fn predict(
    detection: &DetectionResult,
    units_per_pixel: Option<f64>,
    window: &StabilityWindow,
) -> Option<PredictedMeasurement> {
    let DetectionResult::Found { girth_pixels, .. } = detection else {
        return None;
    };
    let scale = units_per_pixel?;
    let length = detection.length_pixels() * scale;
    let girth = girth_pixels * scale;

    let recent = window.recent(PREDICTION_HISTORY);
    if recent.is_empty() {
        return Some(PredictedMeasurement {
            length_units: length,
            girth_units: girth,
        });
    }
    let lengths: Vec<f64> = recent.iter().map(|s| s.length_units).collect();
    let girths: Vec<f64> = recent.iter().map(|s| s.girth_units).collect();
    Some(PredictedMeasurement {
        length_units: HISTORY_WEIGHT * mean(&lengths) + CURRENT_WEIGHT * length,
        girth_units: HISTORY_WEIGHT * mean(&girths) + CURRENT_WEIGHT * girth,
    })
}

fn trend(window: &StabilityWindow) -> Option<Trend> {
    if window.len() < MIN_STABLE_SAMPLES {
        return None;
    }
    let lengths = window.lengths();
    let avg = mean(&lengths);
    if avg.abs() < f64::EPSILON {
        return None;
    }
    let relative_slope = linear_slope(&lengths) / avg;
    Some(Trend {
        relative_slope,
        significant: relative_slope.abs() > TREND_THRESHOLD,
    })
}

fn consistency(window: &StabilityWindow) -> Option<Consistency> {
    if window.len() < 2 {
        return None;
    }
    let cv = (coefficient_of_variation(&window.lengths())
        + coefficient_of_variation(&window.girths()))
        / 2.0;
    let score = (1.0 - cv).clamp(0.0, 1.0);
    Some(Consistency {
        score,
        warning: score < CONSISTENCY_WARNING,
    })
}

fn perspective_correction(perspective: f64) -> Option<PerspectiveCorrection> {
    if !(perspective < PERSPECTIVE_CORRECTION_BELOW) {
        return None;
    }
    let perspective = perspective.clamp(0.0, 1.0);
    Some(PerspectiveCorrection {
        scale_adjustment: 1.0 / (perspective + 0.3),
        angle_deg: perspective.acos().to_degrees(),
        severity: if perspective < PERSPECTIVE_HIGH_SEVERITY_BELOW {
            CorrectionSeverity::High
        } else {
            CorrectionSeverity::Medium
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use measure_models::MeasurementSample;

    fn found(confidence: f64) -> DetectionResult {
        DetectionResult::Found {
            base_point: Point::new(10.0, 10.0),
            tip_point: Point::new(10.0, 60.0),
            girth_pixels: 20.0,
            confidence,
            curvature_deg: None,
        }
    }

    fn window_of(lengths: &[f64]) -> StabilityWindow {
        let mut window = StabilityWindow::new(10.0);
        for (i, length) in lengths.iter().enumerate() {
            window.insert(MeasurementSample::new(i as f64 * 0.1, *length, 2.0, 0.9));
        }
        window
    }

    fn advise(detection: &DetectionResult, window: &StabilityWindow, edges: &EdgeCache) -> Advice {
        let quality = QualityReport {
            environment: measure_models::EnvironmentalFactors {
                perspective: 0.9,
                ..Default::default()
            },
            ..Default::default()
        };
        Advisor::new(18).advise(&AdviceInput {
            detection,
            units_per_pixel: Some(0.1),
            window,
            edges,
            quality: &quality,
        })
    }

    #[test]
    fn test_prediction_blends_history_and_current() {
        // Current detection: 50 px * 0.1 = 5.0 units.
        let window = window_of(&[6.0, 6.0, 6.0]);
        let advice = advise(&found(0.9), &window, &EdgeCache::new());
        let predicted = advice.predicted.unwrap();
        assert!((predicted.length_units - (0.7 * 6.0 + 0.3 * 5.0)).abs() < 1e-9);
        assert!((predicted.girth_units - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_prediction_without_history_uses_current() {
        let advice = advise(&found(0.9), &StabilityWindow::new(1.5), &EdgeCache::new());
        assert!((advice.predicted.unwrap().length_units - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_correction_requires_confidence() {
        let window = StabilityWindow::new(1.5);
        assert!(advise(&found(0.6), &window, &EdgeCache::new()).correction.is_none());
        let correction = advise(&found(0.8), &window, &EdgeCache::new()).correction.unwrap();
        assert_eq!(correction.confidence, 0.8);
        assert!(!correction.adjusted);
    }

    #[test]
    fn test_correction_snaps_to_edges() {
        let mut map = GrayImage::new(100, 100);
        map.put_pixel(12, 10, Luma([255]));
        let mut edges = EdgeCache::new();
        edges.push(map);

        let correction = advise(&found(0.9), &StabilityWindow::new(1.5), &edges)
            .correction
            .unwrap();
        assert!(correction.adjusted);
        assert_eq!(correction.base_point, Point::new(12.0, 10.0));
        assert_eq!(correction.tip_point, Point::new(10.0, 60.0));
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn test_trend_and_consistency() {
        let rising = window_of(&[5.0, 5.5, 6.0, 6.5]);
        let advice = advise(&found(0.9), &rising, &EdgeCache::new());
        assert!(advice.trend.unwrap().significant);

        let steady = window_of(&[5.0, 5.0, 5.0]);
        let advice = advise(&found(0.9), &steady, &EdgeCache::new());
        assert!(!advice.trend.unwrap().significant);
        let consistency = advice.consistency.unwrap();
        assert_eq!(consistency.score, 1.0);
        assert!(!consistency.warning);
    }

    #[test]
    fn test_perspective_correction() {
        assert!(perspective_correction(0.8).is_none());
        let medium = perspective_correction(0.5).unwrap();
        assert_eq!(medium.severity, CorrectionSeverity::Medium);
        assert!((medium.scale_adjustment - 1.25).abs() < 1e-9);
        assert!((medium.angle_deg - 60.0).abs() < 1e-9);
        assert_eq!(perspective_correction(0.2).unwrap().severity, CorrectionSeverity::High);
    }

    #[test]
    fn test_not_found_has_no_prediction() {
        let advice = advise(&DetectionResult::NotFound, &StabilityWindow::new(1.5), &EdgeCache::new());
        assert!(advice.is_empty());
    }
}
