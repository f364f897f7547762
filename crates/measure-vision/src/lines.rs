//! Straight-line fallback over an edge map.
//!
//! Used when segmentation finds no usable region: a Hough accumulator picks
//! the dominant line, and the longest contiguous run of edge pixels on it
//! gives the axis endpoints.

use image::GrayImage;
use measure_models::Point;

/// Edge strength required for a pixel to vote.
pub const EDGE_VOTE_THRESHOLD: u8 = 64;

/// Largest gap, in pixels, bridged inside one segment.
const MAX_GAP: f64 = 3.0;

/// Distance from the line within which a pixel counts as on it.
const INLIER_DISTANCE: f64 = 1.5;

/// Cap on voting pixels; larger sets are strided.
const MAX_VOTERS: usize = 20_000;

const THETA_BINS: usize = 180;

/// A detected straight segment.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSegment {
    pub start: Point,
    pub end: Point,
    /// Edge pixels supporting the segment.
    pub support: usize,
}

impl LineSegment {
    pub fn length(&self) -> f64 {
        self.start.distance(&self.end)
    }
}

/// Longest dominant line segment, if any is at least `min_length` long.
pub fn longest_segment(edges: &GrayImage, min_length: f64) -> Option<LineSegment> {
    let (w, h) = edges.dimensions();
    let mut voters: Vec<(f64, f64)> = edges
        .enumerate_pixels()
        .filter(|(_, _, px)| px[0] >= EDGE_VOTE_THRESHOLD)
        .map(|(x, y, _)| (x as f64, y as f64))
        .collect();
    if voters.len() < 2 {
        return None;
    }
    if voters.len() > MAX_VOTERS {
        let stride = voters.len().div_ceil(MAX_VOTERS);
        voters = voters.into_iter().step_by(stride).collect();
    }

    let diag = diagonal(w, h);
    let rho_bins = diag * 2 + 1;
    let trig: Vec<(f64, f64)> = (0..THETA_BINS)
        .map(|i| {
            let theta = (i as f64).to_radians();
            (theta.cos(), theta.sin())
        })
        .collect();

    let mut accumulator = vec![0u32; THETA_BINS * rho_bins];
    for (x, y) in &voters {
        for (ti, (c, s)) in trig.iter().enumerate() {
            let rho = (x * c + y * s).round() as i64 + diag as i64;
            accumulator[ti * rho_bins + rho as usize] += 1;
        }
    }

    // First maximum in (theta, rho) order keeps the choice deterministic.
    let (best_idx, best_votes) = accumulator
        .iter()
        .enumerate()
        .fold((0usize, 0u32), |best, (i, v)| if *v > best.1 { (i, *v) } else { best });
    if best_votes < 2 {
        return None;
    }
    let (cos, sin) = trig[best_idx / rho_bins];
    let rho = (best_idx % rho_bins) as f64 - diag as f64;

    // Project inliers onto the line direction.
    let direction = (-sin, cos);
    let foot = (rho * cos, rho * sin);
    let mut positions: Vec<f64> = voters
        .iter()
        .filter(|(x, y)| (x * cos + y * sin - rho).abs() <= INLIER_DISTANCE)
        .map(|(x, y)| (x - foot.0) * direction.0 + (y - foot.1) * direction.1)
        .collect();
    positions.sort_by(|a, b| a.total_cmp(b));

    let mut best_run: Option<(f64, f64, usize)> = None;
    let mut run_start = 0usize;
    for i in 1..=positions.len() {
        let run_ends = i == positions.len() || positions[i] - positions[i - 1] > MAX_GAP;
        if run_ends {
            let (a, b) = (positions[run_start], positions[i - 1]);
            let count = i - run_start;
            if best_run.map_or(true, |(ba, bb, _)| b - a > bb - ba) {
                best_run = Some((a, b, count));
            }
            run_start = i;
        }
    }

    let (a, b, support) = best_run?;
    if b - a < min_length {
        return None;
    }
    let at = |t: f64| Point::new(foot.0 + t * direction.0, foot.1 + t * direction.1);
    Some(LineSegment {
        start: at(a),
        end: at(b),
        support,
    })
}

/// Image diagonal in whole pixels, the largest possible |rho|.
fn diagonal(width: u32, height: u32) -> usize {
    (width as f64).hypot(height as f64).ceil() as usize
}
