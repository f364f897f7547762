//! Temporal smoothing of per-tick detections.
//!
//! Exponential smoothing towards each new detection. Still images snap
//! (alpha 1.0); live ticks use the configured alpha to damp jitter.
//! Endpoints are matched to the previous tick so base and tip never swap.

use measure_models::{DetectionResult, Point};

/// Input kind driving the smoothing factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Live,
    Still,
}

impl InputMode {
    /// Smoothing factor for this mode.
    pub fn alpha(&self, live_alpha: f64) -> f64 {
        match self {
            InputMode::Live => live_alpha.clamp(f64::EPSILON, 1.0),
            InputMode::Still => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Smoothed {
    base: Point,
    tip: Point,
    girth: f64,
    curvature: Option<f64>,
}

/// Exponential smoother for `Found` detections.
#[derive(Debug, Clone, Default)]
pub struct Stabilizer {
    current: Option<Smoothed>,
}

impl Stabilizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn has_estimate(&self) -> bool {
        self.current.is_some()
    }

    /// Blend `result` into the running estimate.
    ///
    /// `NotFound` clears the estimate. Confidence passes through unsmoothed.
    pub fn update(&mut self, result: &DetectionResult, alpha: f64) -> DetectionResult {
        let DetectionResult::Found {
            base_point,
            tip_point,
            girth_pixels,
            confidence,
            curvature_deg,
        } = result
        else {
            self.reset();
            return DetectionResult::NotFound;
        };

        let (mut base, mut tip) = (*base_point, *tip_point);
        let next = match self.current {
            // Alpha 1 snaps to the new detection as-is.
            Some(prev) if alpha < 1.0 => {
                let kept = prev.base.distance(&base) + prev.tip.distance(&tip);
                let swapped = prev.base.distance(&tip) + prev.tip.distance(&base);
                if swapped < kept {
                    std::mem::swap(&mut base, &mut tip);
                }
                Smoothed {
                    base: prev.base.lerp(&base, alpha),
                    tip: prev.tip.lerp(&tip, alpha),
                    girth: prev.girth + (girth_pixels - prev.girth) * alpha,
                    curvature: match (prev.curvature, curvature_deg) {
                        (Some(p), Some(c)) => Some(p + (c - p) * alpha),
                        (_, c) => *c,
                    },
                }
            }
            _ => Smoothed {
                base,
                tip,
                girth: *girth_pixels,
                curvature: *curvature_deg,
            },
        };
        self.current = Some(next);

        DetectionResult::Found {
            base_point: next.base,
            tip_point: next.tip,
            girth_pixels: next.girth,
            confidence: *confidence,
            curvature_deg: next.curvature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(base: (f64, f64), tip: (f64, f64), girth: f64) -> DetectionResult {
        DetectionResult::Found {
            base_point: Point::new(base.0, base.1),
            tip_point: Point::new(tip.0, tip.1),
            girth_pixels: girth,
            confidence: 0.9,
            curvature_deg: None,
        }
    }

    #[test]
    fn test_first_update_passes_through() {
        let mut stabilizer = Stabilizer::new();
        let input = found((0.0, 100.0), (0.0, 0.0), 20.0);
        assert_eq!(stabilizer.update(&input, 0.35), input);
    }

    #[test]
    fn test_live_alpha_damps_jumps() {
        let mut stabilizer = Stabilizer::new();
        stabilizer.update(&found((0.0, 100.0), (0.0, 0.0), 20.0), 0.35);
        let out = stabilizer.update(&found((10.0, 100.0), (10.0, 0.0), 30.0), 0.35);
        match out {
            DetectionResult::Found { base_point, girth_pixels, .. } => {
                assert!((base_point.x - 3.5).abs() < 1e-9);
                assert!((girth_pixels - 23.5).abs() < 1e-9);
            }
            DetectionResult::NotFound => panic!("expected found"),
        }
    }

    #[test]
    fn test_still_mode_snaps() {
        let mut stabilizer = Stabilizer::new();
        stabilizer.update(&found((0.0, 100.0), (0.0, 0.0), 20.0), 1.0);
        let input = found((10.0, 90.0), (10.0, 5.0), 25.0);
        let alpha = InputMode::Still.alpha(0.35);
        assert_eq!(stabilizer.update(&input, alpha), input);
    }

    #[test]
    fn test_endpoints_do_not_swap() {
        let mut stabilizer = Stabilizer::new();
        stabilizer.update(&found((0.0, 100.0), (0.0, 0.0), 20.0), 0.5);
        let out = stabilizer.update(&found((0.0, 0.0), (0.0, 100.0), 20.0), 0.5);
        match out {
            DetectionResult::Found { base_point, tip_point, .. } => {
                assert_eq!(base_point, Point::new(0.0, 100.0));
                assert_eq!(tip_point, Point::new(0.0, 0.0));
            }
            DetectionResult::NotFound => panic!("expected found"),
        }
    }

    #[test]
    fn test_not_found_resets() {
        let mut stabilizer = Stabilizer::new();
        stabilizer.update(&found((0.0, 100.0), (0.0, 0.0), 20.0), 0.35);
        assert_eq!(stabilizer.update(&DetectionResult::NotFound, 0.35), DetectionResult::NotFound);
        assert!(!stabilizer.has_estimate());
    }
}
