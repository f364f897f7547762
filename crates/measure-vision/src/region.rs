//! Shape analysis for a segmented region.
//!
//! Principal axis from second-order central moments, extreme points by
//! projection onto that axis, perpendicular cross-section widths, convex
//! hull solidity and a centerline bend estimate.

use measure_models::Point;

use crate::segment::Region;

/// Number of cross-sections sampled along the axis.
pub const CROSS_SECTIONS: usize = 9;

/// Fraction of the axis skipped at each end when sampling widths.
const END_MARGIN: f64 = 0.1;

/// Second-order central moments of a pixel set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub cx: f64,
    pub cy: f64,
    pub mu20: f64,
    pub mu02: f64,
    pub mu11: f64,
}

impl Moments {
    pub fn from_pixels(pixels: &[(u32, u32)]) -> Option<Self> {
        if pixels.is_empty() {
            return None;
        }
        let n = pixels.len() as f64;
        let (sx, sy) = pixels
            .iter()
            .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + *x as f64, sy + *y as f64));
        let (cx, cy) = (sx / n, sy / n);

        let (mut mu20, mut mu02, mut mu11) = (0.0, 0.0, 0.0);
        for (x, y) in pixels {
            let dx = *x as f64 - cx;
            let dy = *y as f64 - cy;
            mu20 += dx * dx;
            mu02 += dy * dy;
            mu11 += dx * dy;
        }
        Some(Self {
            cx,
            cy,
            mu20: mu20 / n,
            mu02: mu02 / n,
            mu11: mu11 / n,
        })
    }

    /// Orientation of the major axis in radians.
    pub fn orientation(&self) -> f64 {
        0.5 * (2.0 * self.mu11).atan2(self.mu20 - self.mu02)
    }

    /// Eigenvalues of the covariance matrix, major first.
    pub fn eigenvalues(&self) -> (f64, f64) {
        let mean = (self.mu20 + self.mu02) / 2.0;
        let spread = (((self.mu20 - self.mu02) / 2.0).powi(2) + self.mu11.powi(2)).sqrt();
        (mean + spread, (mean - spread).max(0.0))
    }

    /// Ratio of major to minor standard deviation.
    pub fn elongation(&self) -> f64 {
        let (major, minor) = self.eigenvalues();
        // Single-pixel-wide shapes still have a quantisation width.
        (major / minor.max(1.0 / 12.0)).sqrt()
    }
}

/// Measured geometry of one region, in the coordinates of its image.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionGeometry {
    pub endpoint_a: Point,
    pub endpoint_b: Point,
    pub width_samples: Vec<f64>,
    pub elongation: f64,
    pub solidity: f64,
    pub area: usize,
    pub curvature_deg: Option<f64>,
}

/// Analyze a region's shape. `None` for empty regions.
pub fn analyze_region(region: &Region) -> Option<RegionGeometry> {
    let moments = Moments::from_pixels(&region.pixels)?;
    let theta = moments.orientation();
    let axis = (theta.cos(), theta.sin());
    let normal = (-theta.sin(), theta.cos());

    let project = |x: u32, y: u32| {
        let dx = x as f64 - moments.cx;
        let dy = y as f64 - moments.cy;
        (dx * axis.0 + dy * axis.1, dx * normal.0 + dy * normal.1)
    };

    let mut t_min = f64::INFINITY;
    let mut t_max = f64::NEG_INFINITY;
    for (x, y) in &region.pixels {
        let (t, _) = project(*x, *y);
        t_min = t_min.min(t);
        t_max = t_max.max(t);
    }

    // Per unit-length slice along the axis: extent across it.
    let bins = (t_max - t_min).floor() as usize + 1;
    let bin_of = |t: f64| (((t - t_min) + 1e-9).floor().max(0.0) as usize).min(bins - 1);
    let mut extents = vec![(f64::INFINITY, f64::NEG_INFINITY); bins];
    for (x, y) in &region.pixels {
        let (t, u) = project(*x, *y);
        let bin = bin_of(t);
        let (lo, hi) = &mut extents[bin];
        *lo = lo.min(u);
        *hi = hi.max(u);
    }

    let at = |t: f64| Point::new(moments.cx + t * axis.0, moments.cy + t * axis.1);

    let span = t_max - t_min;
    let mut width_samples = Vec::with_capacity(CROSS_SECTIONS);
    let mut centers = Vec::with_capacity(CROSS_SECTIONS);
    for i in 0..CROSS_SECTIONS {
        let frac = END_MARGIN + (1.0 - 2.0 * END_MARGIN) * i as f64 / (CROSS_SECTIONS - 1) as f64;
        let t = t_min + span * frac;
        let (lo, hi) = extents[bin_of(t)];
        if lo.is_finite() && hi.is_finite() {
            width_samples.push(hi - lo + 1.0);
            let mid = (lo + hi) / 2.0;
            let on_axis = at(t);
            centers.push(Point::new(on_axis.x + mid * normal.0, on_axis.y + mid * normal.1));
        }
    }

    Some(RegionGeometry {
        endpoint_a: at(t_min),
        endpoint_b: at(t_max),
        width_samples,
        elongation: moments.elongation(),
        solidity: solidity(region),
        area: region.area(),
        curvature_deg: centerline_bend(&centers),
    })
}

/// Largest angle, in degrees, between the chord of the centerline and the
/// direction from its first point to any interior point.
pub fn centerline_bend(centers: &[Point]) -> Option<f64> {
    if centers.len() < 3 {
        return None;
    }
    let first = centers[0];
    let last = centers[centers.len() - 1];
    let chord = (last.x - first.x, last.y - first.y);
    let chord_len = (chord.0 * chord.0 + chord.1 * chord.1).sqrt();
    if chord_len < f64::EPSILON {
        return None;
    }

    let mut max_angle: f64 = 0.0;
    for c in &centers[1..centers.len() - 1] {
        let v = (c.x - first.x, c.y - first.y);
        let v_len = (v.0 * v.0 + v.1 * v.1).sqrt();
        if v_len < f64::EPSILON {
            continue;
        }
        let cos = ((v.0 * chord.0 + v.1 * chord.1) / (v_len * chord_len)).clamp(-1.0, 1.0);
        max_angle = max_angle.max(cos.acos().to_degrees());
    }
    Some(max_angle)
}

/// Region area divided by the area of its convex hull.
pub fn solidity(region: &Region) -> f64 {
    if region.pixels.is_empty() {
        return 0.0;
    }
    // Row extremes are enough to bound the hull; use pixel corners so a
    // filled rectangle has a solidity of exactly 1.
    let mut rows: std::collections::BTreeMap<u32, (u32, u32)> = Default::default();
    for (x, y) in &region.pixels {
        let entry = rows.entry(*y).or_insert((*x, *x));
        entry.0 = entry.0.min(*x);
        entry.1 = entry.1.max(*x);
    }
    let mut points = Vec::with_capacity(rows.len() * 4);
    for (y, (lo, hi)) in rows {
        let (y, lo, hi) = (y as i64, lo as i64, hi as i64);
        points.extend_from_slice(&[(lo, y), (lo, y + 1), (hi + 1, y), (hi + 1, y + 1)]);
    }
    let hull_area = polygon_area(&convex_hull(points));
    if hull_area <= 0.0 {
        return 0.0;
    }
    (region.area() as f64 / hull_area).min(1.0)
}

/// Andrew's monotone chain. Returns hull vertices counter-clockwise.
pub fn convex_hull(mut points: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    points.sort_unstable();
    points.dedup();
    if points.len() < 3 {
        return points;
    }
    let cross = |o: (i64, i64), a: (i64, i64), b: (i64, i64)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };

    let mut lower: Vec<(i64, i64)> = Vec::new();
    for p in &points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], *p) <= 0 {
            lower.pop();
        }
        lower.push(*p);
    }
    let mut upper: Vec<(i64, i64)> = Vec::new();
    for p in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], *p) <= 0 {
            upper.pop();
        }
        upper.push(*p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Shoelace area.
pub fn polygon_area(vertices: &[(i64, i64)]) -> f64 {
    if vertices.len() < 3 {
        return 0.0;
    }
    let twice: i64 = vertices
        .iter()
        .zip(vertices.iter().cycle().skip(1))
        .map(|(a, b)| a.0 * b.1 - b.0 * a.1)
        .sum();
    twice.abs() as f64 / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_region(x0: u32, y0: u32, w: u32, h: u32) -> Region {
        let mut pixels = Vec::new();
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                pixels.push((x, y));
            }
        }
        Region { pixels }
    }

    #[test]
    fn test_horizontal_rectangle_geometry() {
        let region = rect_region(10, 20, 60, 10);
        let geometry = analyze_region(&region).unwrap();

        let (a, b) = (geometry.endpoint_a, geometry.endpoint_b);
        assert!((a.distance(&b) - 59.0).abs() < 0.5);
        assert!((a.y - 24.5).abs() < 0.5);
        assert!(geometry.width_samples.iter().all(|w| (w - 10.0).abs() < 0.5));
        assert!((geometry.solidity - 1.0).abs() < 1e-9);
        assert!(geometry.elongation > 5.0);
        assert!(geometry.curvature_deg.unwrap() < 1.0);
    }

    #[test]
    fn test_vertical_rectangle_axis() {
        let region = rect_region(30, 5, 8, 50);
        let geometry = analyze_region(&region).unwrap();
        let dx = (geometry.endpoint_a.x - geometry.endpoint_b.x).abs();
        let dy = (geometry.endpoint_a.y - geometry.endpoint_b.y).abs();
        assert!(dx < 1.0);
        assert!((dy - 49.0).abs() < 0.5);
    }

    #[test]
    fn test_l_shape_has_lower_solidity() {
        let mut region = rect_region(0, 0, 40, 5);
        region.pixels.extend(rect_region(0, 5, 5, 35).pixels);
        let s = solidity(&region);
        assert!(s < 0.75, "solidity {s}");
    }

    #[test]
    fn test_centerline_bend() {
        let straight = [Point::new(0.0, 0.0), Point::new(5.0, 0.0), Point::new(10.0, 0.0)];
        assert!(centerline_bend(&straight).unwrap() < 1e-9);

        let bent = [Point::new(0.0, 0.0), Point::new(5.0, 5.0), Point::new(10.0, 0.0)];
        assert!((centerline_bend(&bent).unwrap() - 45.0).abs() < 1e-6);
        assert!(centerline_bend(&bent[..2]).is_none());
    }

    #[test]
    fn test_hull_of_square() {
        let hull = convex_hull(vec![(0, 0), (4, 0), (4, 4), (0, 4), (2, 2)]);
        assert_eq!(hull.len(), 4);
        assert_eq!(polygon_area(&hull), 16.0);
    }
}
