//! Temporal edge cache for snap-to-edge point correction.
//!
//! Keeps the last few edge maps in overlay space and folds them into one
//! reference map with a per-pixel maximum, so an edge that flickers out of
//! a single frame still attracts nearby points.

use image::GrayImage;
use measure_models::Point;
use std::collections::VecDeque;
use tracing::debug;

/// Maps retained before the oldest is evicted.
pub const EDGE_CACHE_CAPACITY: usize = 4;

/// Minimum reference intensity for a snap target.
pub const SNAP_THRESHOLD: u8 = 200;

/// Ring of recent edge maps plus their combined maximum.
#[derive(Debug, Clone, Default)]
pub struct EdgeCache {
    maps: VecDeque<GrayImage>,
    combined: Option<GrayImage>,
}

impl EdgeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a map, evicting the oldest at capacity. A map with different
    /// dimensions restarts the ring.
    pub fn push(&mut self, map: GrayImage) {
        if let Some(current) = self.maps.front() {
            if current.dimensions() != map.dimensions() {
                debug!(
                    old = ?current.dimensions(),
                    new = ?map.dimensions(),
                    "Edge cache dimensions changed, clearing"
                );
                self.clear();
            }
        }
        if self.maps.len() == EDGE_CACHE_CAPACITY {
            self.maps.pop_front();
        }
        self.maps.push_back(map);
        self.combined = self.combine();
    }

    pub fn clear(&mut self) {
        self.maps.clear();
        self.combined = None;
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.maps.front().map(|m| m.dimensions())
    }

    /// Per-pixel maximum of all retained maps.
    pub fn reference(&self) -> Option<&GrayImage> {
        self.combined.as_ref()
    }

    fn combine(&self) -> Option<GrayImage> {
        let mut iter = self.maps.iter();
        let mut combined = iter.next()?.clone();
        for map in iter {
            for (dst, src) in combined.iter_mut().zip(map.as_raw()) {
                *dst = (*dst).max(*src);
            }
        }
        Some(combined)
    }

    /// Move `point` to the nearest strong edge within `radius` pixels on
    /// each axis. Row-major scan; the first of equally near pixels wins.
    /// Returns `point` unchanged when nothing qualifies.
    pub fn snap(&self, point: Point, radius: u32) -> Point {
        let Some(reference) = self.combined.as_ref() else {
            return point;
        };
        let (w, h) = reference.dimensions();
        if !point.x.is_finite() || !point.y.is_finite() {
            return point;
        }

        let r = radius as i64;
        let cx = point.x.round() as i64;
        let cy = point.y.round() as i64;
        let x0 = cx.saturating_sub(r).max(0);
        let x1 = cx.saturating_add(r).min(w as i64 - 1);
        let y0 = cy.saturating_sub(r).max(0);
        let y1 = cy.saturating_add(r).min(h as i64 - 1);

        let mut best: Option<(f64, i64, i64)> = None;
        for y in y0..=y1 {
            for x in x0..=x1 {
                if reference.get_pixel(x as u32, y as u32)[0] < SNAP_THRESHOLD {
                    continue;
                }
                let d2 = (x as f64 - point.x).powi(2) + (y as f64 - point.y).powi(2);
                if best.map_or(true, |(bd, _, _)| d2 < bd) {
                    best = Some((d2, x, y));
                }
            }
        }
        match best {
            Some((_, x, y)) => Point::new(x as f64, y as f64),
            None => point,
        }
    }
}
