//! Multi-scale subject detector.
//!
//! Each scale resamples the frame, segments the subject and measures its
//! largest region. Scales run in parallel on the rayon pool; the fused
//! result is the candidate with the highest scale-adjusted confidence.
//!
//! # Confidence
//! `raw = 0.45 * elongation + 0.25 * area + 0.30 * solidity`, then
//! `adjusted = raw * penalty(scale)` where the penalty peaks at 1.0 for
//! native resolution and never drops below 0.8.

use image::GrayImage;
use measure_models::{clamp_confidence, DetectParams, DetectionCandidate, DetectionResult, Frame, Point};
use rayon::prelude::*;
use tracing::debug;

use crate::imageops::{edge_map, resample, to_gray};
use crate::lines::{longest_segment, LineSegment};
use crate::region::{analyze_region, RegionGeometry};
use crate::segment::{largest_component, segment_foreground};

/// Smallest side, in pixels, of a resampled frame worth analyzing.
pub const MIN_SIDE: u32 = 16;

/// Regions smaller than this never count, whatever the area fraction.
pub const MIN_REGION_PIXELS: usize = 20;

const ELONGATION_WEIGHT: f64 = 0.45;
const AREA_WEIGHT: f64 = 0.25;
const SOLIDITY_WEIGHT: f64 = 0.30;

/// Line fallback confidence never exceeds half of the region maximum.
pub const LINE_CONFIDENCE_CAP: f64 = 0.5;

/// Minimum fallback line length as a share of the shorter frame side.
const MIN_LINE_FRACTION: f64 = 0.15;

/// Confidence multiplier for a resample scale: 1.0 at native resolution,
/// decreasing with distance from it, floored at 0.8.
pub fn scale_penalty(scale: f64) -> f64 {
    (1.0 - (scale - 1.0).abs() * 0.3).clamp(0.8, 1.0)
}

/// How a candidate was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Region,
    Line,
}

/// A per-scale candidate with its penalized confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: DetectionCandidate,
    pub adjusted_confidence: f64,
    pub source: CandidateSource,
}

/// Fused detection plus the per-scale evidence behind it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionOutcome {
    pub result: DetectionResult,
    pub candidates: Vec<ScoredCandidate>,
}

impl DetectionOutcome {
    pub fn used_fallback(&self) -> bool {
        self.best().map_or(false, |c| c.source == CandidateSource::Line)
    }

    /// Highest adjusted confidence, earliest scale on ties.
    pub fn best(&self) -> Option<&ScoredCandidate> {
        self.candidates.iter().fold(None, |best: Option<&ScoredCandidate>, c| match best {
            Some(b) if b.adjusted_confidence >= c.adjusted_confidence => Some(b),
            _ => Some(c),
        })
    }
}

/// Stateless multi-scale detector.
#[derive(Debug, Clone, Default)]
pub struct MultiScaleDetector;

impl MultiScaleDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detect the subject in `frame`.
    pub fn detect(&self, frame: &Frame, params: &DetectParams) -> DetectionOutcome {
        let gray = to_gray(frame);
        let candidates: Vec<ScoredCandidate> = params
            .scales
            .par_iter()
            .filter_map(|scale| detect_at_scale(&gray, *scale, params.region_min_area_fraction))
            .collect();

        let mut outcome = DetectionOutcome {
            result: DetectionResult::NotFound,
            candidates,
        };
        if let Some(best) = outcome.best() {
            if best.adjusted_confidence > params.confidence_floor {
                outcome.result = fuse(best);
            }
        }

        debug!(
            candidates = outcome.candidates.len(),
            found = outcome.result.is_found(),
            confidence = outcome.result.confidence(),
            fallback = outcome.used_fallback(),
            "Multi-scale detection complete"
        );
        outcome
    }
}

fn fuse(best: &ScoredCandidate) -> DetectionResult {
    let c = &best.candidate;
    // Base is the lower endpoint on screen; left-most when level.
    let (base_point, tip_point) = if (c.endpoint_a.y - c.endpoint_b.y).abs() < 1.0 {
        if c.endpoint_a.x <= c.endpoint_b.x {
            (c.endpoint_a, c.endpoint_b)
        } else {
            (c.endpoint_b, c.endpoint_a)
        }
    } else if c.endpoint_a.y > c.endpoint_b.y {
        (c.endpoint_a, c.endpoint_b)
    } else {
        (c.endpoint_b, c.endpoint_a)
    };
    DetectionResult::Found {
        base_point,
        tip_point,
        girth_pixels: c.girth_pixels(),
        confidence: clamp_confidence(best.adjusted_confidence),
        curvature_deg: c.curvature_deg,
    }
}

fn detect_at_scale(gray: &GrayImage, scale: f64, min_area_fraction: f64) -> Option<ScoredCandidate> {
    if !scale.is_finite() || scale <= 0.0 {
        return None;
    }
    let scaled = resample(gray, scale, MIN_SIDE)?;
    let (w, h) = scaled.dimensions();
    let total = (w as usize * h as usize) as f64;
    // Effective scale after rounding to whole pixels.
    let sx = w as f64 / gray.width() as f64;
    let sy = h as f64 / gray.height() as f64;
    let to_frame = |p: Point| Point::new((p.x + 0.5) / sx - 0.5, (p.y + 0.5) / sy - 0.5);

    let region = segment_foreground(&scaled)
        .and_then(|mask| largest_component(&mask))
        .filter(|r| r.area() >= MIN_REGION_PIXELS && r.area() as f64 >= min_area_fraction * total);

    let (candidate, source) = match region.as_ref().and_then(analyze_region) {
        Some(geometry) => {
            let raw = region_confidence(&geometry, total);
            let width_scale = (sx + sy) / 2.0;
            let candidate = DetectionCandidate {
                endpoint_a: to_frame(geometry.endpoint_a),
                endpoint_b: to_frame(geometry.endpoint_b),
                width_samples: geometry.width_samples.iter().map(|w| w / width_scale).collect(),
                raw_confidence: raw,
                scale,
                curvature_deg: geometry.curvature_deg,
            };
            (candidate, CandidateSource::Region)
        }
        None => {
            let edges = edge_map(&scaled);
            let segment = longest_segment(&edges, MIN_LINE_FRACTION * w.min(h) as f64)?;
            let candidate = DetectionCandidate {
                endpoint_a: to_frame(segment.start),
                endpoint_b: to_frame(segment.end),
                width_samples: Vec::new(),
                raw_confidence: line_confidence(&segment, w, h),
                scale,
                curvature_deg: None,
            };
            (candidate, CandidateSource::Line)
        }
    };

    let adjusted = candidate.raw_confidence * scale_penalty(scale);
    Some(ScoredCandidate {
        adjusted_confidence: clamp_confidence(adjusted),
        candidate,
        source,
    })
}

/// Fixed blend of shape terms, clamped to [0, 1].
pub fn region_confidence(geometry: &RegionGeometry, frame_pixels: f64) -> f64 {
    let elongation = ((geometry.elongation - 1.0) / 3.0).clamp(0.0, 1.0);
    let fraction = if frame_pixels > 0.0 {
        geometry.area as f64 / frame_pixels
    } else {
        0.0
    };
    let area = if fraction < 0.15 {
        fraction / 0.15
    } else if fraction <= 0.6 {
        1.0
    } else {
        ((1.0 - fraction) / 0.4).max(0.0)
    };
    clamp_confidence(
        ELONGATION_WEIGHT * elongation + AREA_WEIGHT * area + SOLIDITY_WEIGHT * geometry.solidity,
    )
}

/// Longer lines score higher, up to the fallback cap.
pub fn line_confidence(segment: &LineSegment, width: u32, height: u32) -> f64 {
    let reference = 0.5 * width.max(height) as f64;
    if reference <= 0.0 {
        return 0.0;
    }
    clamp_confidence(LINE_CONFIDENCE_CAP * (segment.length() / reference).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn bar_frame(w: u32, h: u32, rect: (u32, u32, u32, u32)) -> Frame {
        let mut frame = Frame::filled(w, h, [40, 40, 50, 255], 0.0).unwrap();
        let (rx, ry, rw, rh) = rect;
        for y in ry..ry + rh {
            for x in rx..rx + rw {
                frame.set_pixel(x, y, [210, 180, 160, 255]);
            }
        }
        frame
    }

    #[test]
    fn test_scale_penalty_never_increases() {
        for scale in [0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 3.0] {
            let p = scale_penalty(scale);
            assert!(p <= 1.0 && p >= 0.8, "scale {scale} penalty {p}");
        }
        assert_eq!(scale_penalty(1.0), 1.0);
        assert!(scale_penalty(0.75) > scale_penalty(0.5));
        assert!(scale_penalty(1.25) > scale_penalty(1.5));
        assert_eq!(scale_penalty(0.1), 0.8);
    }

    #[test]
    fn test_detects_horizontal_bar() {
        let frame = bar_frame(160, 120, (30, 50, 100, 20));
        let outcome = MultiScaleDetector::new().detect(&frame, &DetectParams::default());

        match outcome.result {
            DetectionResult::Found {
                base_point,
                tip_point,
                girth_pixels,
                confidence,
                curvature_deg,
            } => {
                assert!(confidence > 0.8, "confidence {confidence}");
                assert!((base_point.distance(&tip_point) - 99.0).abs() < 3.0);
                assert!((girth_pixels - 20.0).abs() < 2.0, "girth {girth_pixels}");
                assert!(base_point.x < tip_point.x);
                assert!(curvature_deg.unwrap() < 5.0);
            }
            DetectionResult::NotFound => panic!("expected a detection"),
        }
        assert!(!outcome.used_fallback());
    }

    #[test]
    fn test_adjusted_never_exceeds_raw() {
        let frame = bar_frame(160, 120, (20, 30, 40, 60));
        let outcome = MultiScaleDetector::new().detect(&frame, &DetectParams::default());
        assert!(!outcome.candidates.is_empty());
        for scored in &outcome.candidates {
            assert!(scored.adjusted_confidence <= scored.candidate.raw_confidence);
            assert!((0.0..=1.0).contains(&scored.adjusted_confidence));
        }
        let confidence = outcome.result.confidence();
        assert!((0.0..=1.0).contains(&confidence));
    }

    #[test]
    fn test_uniform_frame_not_found() {
        let frame = Frame::filled(64, 48, [128, 128, 128, 255], 0.0).unwrap();
        let outcome = MultiScaleDetector::new().detect(&frame, &DetectParams::default());
        assert_eq!(outcome.result, DetectionResult::NotFound);
        assert_eq!(outcome.result.confidence(), 0.0);
    }

    #[test]
    fn test_floor_rejects_weak_candidates() {
        let frame = bar_frame(160, 120, (30, 50, 100, 20));
        let params = DetectParams {
            confidence_floor: 0.99,
            ..Default::default()
        };
        let outcome = MultiScaleDetector::new().detect(&frame, &params);
        assert!(!outcome.candidates.is_empty());
        assert_eq!(outcome.result, DetectionResult::NotFound);
    }

    #[test]
    fn test_thin_line_uses_fallback() {
        let mut frame = Frame::filled(160, 120, [230, 230, 230, 255], 0.0).unwrap();
        for x in 20..140 {
            frame.set_pixel(x, 60, [20, 20, 20, 255]);
        }
        let params = DetectParams {
            scales: vec![1.0],
            confidence_floor: 0.1,
            ..Default::default()
        };
        let outcome = MultiScaleDetector::new().detect(&frame, &params);
        assert!(outcome.used_fallback());
        let confidence = outcome.result.confidence();
        assert!(confidence > 0.1 && confidence <= LINE_CONFIDENCE_CAP);
        assert!((outcome.result.length_pixels() - 119.0).abs() < 6.0);
    }
}
