//! Frame quality and environment scoring.
//!
//! Purely advisory: every score is in [0, 1], higher is better, and
//! nothing here can fail a tick.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::filter3x3;
use measure_models::{EnvironmentalFactors, Frame, QualityMetrics, QualityReport, Suggestion};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::imageops::{histogram, sobel, to_gray};

/// Frames retained for motion scoring.
pub const FRAME_HISTORY_CAPACITY: usize = 5;

/// Frames compared for stability, current frame included.
const STABILITY_FRAMES: usize = 3;

/// Byte stride of the sparse frame difference (every 4th pixel).
const DIFF_STRIDE: usize = 16;

const OPTIMAL_BRIGHTNESS: f64 = 130.0;

/// Sobel magnitude (scaled to 0..=255) above which an edge counts as strong.
const STRONG_EDGE: f64 = 50.0;

/// Orientation tolerance, degrees, for axis-aligned edges.
const AXIS_TOLERANCE_DEG: f64 = 2.0;

const LAPLACIAN: [f32; 9] = [0.0, 1.0, 0.0, 1.0, -4.0, 1.0, 0.0, 1.0, 0.0];

/// Bounded history of recent frames, oldest first.
#[derive(Debug, Clone, Default)]
pub struct FrameHistory {
    frames: VecDeque<Arc<Frame>>,
}

impl FrameHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Arc<Frame>) {
        if self.frames.len() == FRAME_HISTORY_CAPACITY {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<Frame>> {
        self.frames.iter()
    }
}

/// Weighted overall score from quality and environment terms.
pub fn quality_score(metrics: &QualityMetrics, env: &EnvironmentalFactors) -> f64 {
    (metrics.sharpness * 0.25
        + metrics.contrast * 0.15
        + metrics.exposure * 0.15
        + metrics.color_balance * 0.10
        + env.lighting * 0.20
        + env.stability * 0.15)
        .clamp(0.0, 1.0)
}

/// Score `frame` against the preceding frames in `history`.
pub fn analyze_quality(frame: &Frame, history: &FrameHistory) -> QualityReport {
    let gray = to_gray(frame);
    let hist = histogram(&gray);
    let total = gray.as_raw().len().max(1) as f64;
    let mean = gray.as_raw().iter().map(|v| *v as f64).sum::<f64>() / total;

    let metrics = QualityMetrics {
        sharpness: (laplacian_variance(&gray) / 1000.0).clamp(0.0, 1.0),
        contrast: contrast(&hist),
        exposure: brightness_score(mean),
        color_balance: color_balance(frame),
    };
    let environment = EnvironmentalFactors {
        lighting: lighting(&gray, mean),
        stability: stability(frame, history),
        perspective: perspective(&gray),
        background_noise: background_noise(&hist, total),
    };

    let quality_score = quality_score(&metrics, &environment);
    QualityReport {
        suggestions: suggestions(&metrics, &environment, None),
        metrics,
        environment,
        quality_score,
    }
}

/// Hints for the operator, most impactful first.
pub fn suggestions(
    metrics: &QualityMetrics,
    env: &EnvironmentalFactors,
    detection_confidence: Option<f64>,
) -> Vec<Suggestion> {
    let mut out = Vec::new();
    if env.lighting < 0.4 {
        out.push(Suggestion::IncreaseLighting);
    } else if env.lighting > 0.9 {
        out.push(Suggestion::ReduceGlare);
    }
    if env.stability < 0.5 {
        out.push(Suggestion::HoldSteady);
    }
    if metrics.sharpness < 0.4 {
        out.push(Suggestion::ImproveFocus);
    }
    if metrics.contrast < 0.3 {
        out.push(Suggestion::IncreaseContrast);
    }
    if detection_confidence.map_or(false, |c| c < 0.3) {
        out.push(Suggestion::RepositionSubject);
    }
    if env.perspective < 0.6 {
        out.push(Suggestion::AdjustAngle);
    }
    if env.background_noise < 0.5 {
        out.push(Suggestion::SimplifyBackground);
    }
    out
}

/// Recompute suggestions once the fused detection confidence is known.
pub fn with_detection_confidence(mut report: QualityReport, confidence: f64) -> QualityReport {
    report.suggestions = suggestions(&report.metrics, &report.environment, Some(confidence));
    report
}

fn brightness_score(mean: f64) -> f64 {
    (1.0 - (mean - OPTIMAL_BRIGHTNESS).abs() / OPTIMAL_BRIGHTNESS).clamp(0.0, 1.0)
}

fn contrast(hist: &[u64; 256]) -> f64 {
    match (hist.iter().position(|c| *c > 0), hist.iter().rposition(|c| *c > 0)) {
        (Some(min), Some(max)) => (max - min) as f64 / 255.0,
        _ => 0.0,
    }
}

fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let response: ImageBuffer<Luma<f32>, Vec<f32>> = filter3x3(gray, &LAPLACIAN);
    let values: Vec<f64> = response.into_raw().into_iter().map(f64::from).collect();
    variance(&values)
}

fn color_balance(frame: &Frame) -> f64 {
    let mut sums = [0.0f64; 3];
    let mut count = 0.0;
    for px in frame.pixels().chunks_exact(4) {
        sums[0] += px[0] as f64;
        sums[1] += px[1] as f64;
        sums[2] += px[2] as f64;
        count += 1.0;
    }
    if count == 0.0 {
        return 0.0;
    }
    let means = sums.map(|s| s / count);
    let gray_mean = means.iter().sum::<f64>() / 3.0;
    let deviation = means.iter().map(|m| (m - gray_mean).abs()).sum::<f64>() / 3.0;
    (1.0 - deviation / 50.0).clamp(0.0, 1.0)
}

fn lighting(gray: &GrayImage, mean: f64) -> f64 {
    let values: Vec<f64> = gray.as_raw().iter().map(|v| *v as f64).collect();
    let spread = (variance(&values).sqrt() / 64.0).clamp(0.0, 1.0);
    (0.6 * brightness_score(mean) + 0.4 * spread).clamp(0.0, 1.0)
}

/// Motion between consecutive frames among the last few, sparse-sampled.
fn stability(frame: &Frame, history: &FrameHistory) -> f64 {
    let mut recent: Vec<&Frame> = history
        .iter()
        .rev()
        .take(STABILITY_FRAMES - 1)
        .map(|f| f.as_ref())
        .collect();
    recent.reverse();
    recent.push(frame);
    if recent.len() < 2 {
        return 0.5;
    }
    let total: f64 = recent.windows(2).map(|pair| frame_difference(pair[0], pair[1])).sum();
    let average = total / (recent.len() - 1) as f64;
    (1.0 - average / 50.0).clamp(0.0, 1.0)
}

/// Mean summed RGB difference over sampled pixels; size changes count as 50.
pub fn frame_difference(a: &Frame, b: &Frame) -> f64 {
    if !a.same_dimensions(b) {
        return 50.0;
    }
    let (pa, pb) = (a.pixels(), b.pixels());
    let mut total = 0.0;
    let mut samples = 0usize;
    for i in (0..pa.len()).step_by(DIFF_STRIDE) {
        total += (pa[i] as f64 - pb[i] as f64).abs()
            + (pa[i + 1] as f64 - pb[i + 1] as f64).abs()
            + (pa[i + 2] as f64 - pb[i + 2] as f64).abs();
        samples += 1;
    }
    if samples == 0 {
        0.0
    } else {
        total / samples as f64
    }
}

/// Share of strong edges running horizontally or vertically.
fn perspective(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.5;
    }
    let (sx, sy) = sobel(gray);
    let (mut aligned, mut strong) = (0usize, 0usize);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = sx.get_pixel(x, y)[0] as f64;
            let gy = sy.get_pixel(x, y)[0] as f64;
            if (gx * gx + gy * gy).sqrt() / 4.0 <= STRONG_EDGE {
                continue;
            }
            strong += 1;
            let angle = gy.atan2(gx).to_degrees().rem_euclid(180.0);
            let near = |target: f64| (angle - target).abs() <= AXIS_TOLERANCE_DEG;
            if near(0.0) || near(90.0) || near(180.0) {
                aligned += 1;
            }
        }
    }
    if strong == 0 {
        return 0.5;
    }
    (aligned as f64 / strong as f64 * 2.0).clamp(0.0, 1.0)
}

/// Low-entropy scenes read as clean backgrounds.
fn background_noise(hist: &[u64; 256], total: f64) -> f64 {
    let entropy: f64 = hist
        .iter()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = *c as f64 / total;
            -p * p.log2()
        })
        .sum();
    (1.0 - (entropy / 8.0) * 0.7).clamp(0.0, 1.0)
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(w: u32, h: u32, shift: u32) -> Frame {
        let mut frame = Frame::filled(w, h, [0, 0, 0, 255], 0.0).unwrap();
        for y in 0..h {
            for x in 0..w {
                if ((x + shift) / 4 + y / 4) % 2 == 0 {
                    frame.set_pixel(x, y, [255, 255, 255, 255]);
                }
            }
        }
        frame
    }

    #[test]
    fn test_scores_are_bounded() {
        let frame = checker(32, 32, 0);
        let report = analyze_quality(&frame, &FrameHistory::new());
        for score in [
            report.metrics.sharpness,
            report.metrics.contrast,
            report.metrics.exposure,
            report.metrics.color_balance,
            report.environment.lighting,
            report.environment.stability,
            report.environment.perspective,
            report.environment.background_noise,
            report.quality_score,
        ] {
            assert!((0.0..=1.0).contains(&score), "score {score}");
        }
        assert!((report.metrics.contrast - 1.0).abs() < 1e-9);
        assert!(report.metrics.sharpness > 0.9);
    }

    #[test]
    fn test_stability_neutral_without_history() {
        let frame = checker(16, 16, 0);
        let report = analyze_quality(&frame, &FrameHistory::new());
        assert_eq!(report.environment.stability, 0.5);
    }

    #[test]
    fn test_stability_drops_with_motion() {
        let mut history = FrameHistory::new();
        history.push(Arc::new(checker(32, 32, 0)));
        let still = analyze_quality(&checker(32, 32, 0), &history);
        assert!((still.environment.stability - 1.0).abs() < 1e-9);

        let moved = analyze_quality(&checker(32, 32, 4), &history);
        assert!(moved.environment.stability < 0.5);
    }

    #[test]
    fn test_size_change_counts_as_motion() {
        let a = checker(16, 16, 0);
        let b = checker(8, 8, 0);
        assert_eq!(frame_difference(&a, &b), 50.0);
    }

    #[test]
    fn test_exposure_peaks_near_optimal() {
        let mid = Frame::filled(8, 8, [130, 130, 130, 255], 0.0).unwrap();
        let dark = Frame::filled(8, 8, [10, 10, 10, 255], 0.0).unwrap();
        let history = FrameHistory::new();
        let mid_report = analyze_quality(&mid, &history);
        let dark_report = analyze_quality(&dark, &history);
        assert!(mid_report.metrics.exposure > 0.99);
        assert!(dark_report.metrics.exposure < 0.1);
        assert!(dark_report.suggestions.contains(&Suggestion::IncreaseLighting));
        assert!((mid_report.metrics.color_balance - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_stability_uses_most_recent_frames() {
        let mut history = FrameHistory::new();
        history.push(Arc::new(checker(32, 32, 4)));
        history.push(Arc::new(checker(32, 32, 4)));
        history.push(Arc::new(checker(32, 32, 0)));
        history.push(Arc::new(checker(32, 32, 0)));
        let report = analyze_quality(&checker(32, 32, 0), &history);
        assert!((report.environment.stability - 1.0).abs() < 1e-9);
        let newest = history.iter().rev().next().unwrap();
        assert!(Arc::ptr_eq(newest, history.iter().last().unwrap()));
    }

    #[test]
    fn test_uniform_frame_has_no_sharpness() {
        let flat = Frame::filled(16, 16, [90, 90, 90, 255], 0.0).unwrap();
        let report = analyze_quality(&flat, &FrameHistory::new());
        assert_eq!(report.metrics.sharpness, 0.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = FrameHistory::new();
        for _ in 0..8 {
            history.push(Arc::new(checker(8, 8, 0)));
        }
        assert_eq!(history.len(), FRAME_HISTORY_CAPACITY);
    }

    #[test]
    fn test_low_confidence_suggests_repositioning() {
        let report = analyze_quality(&checker(16, 16, 0), &FrameHistory::new());
        let report = with_detection_confidence(report, 0.1);
        assert!(report.suggestions.contains(&Suggestion::RepositionSubject));
    }
}
