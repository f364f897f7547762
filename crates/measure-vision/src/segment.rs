//! Foreground segmentation and connected components.
//!
//! # Algorithm
//! 1. Otsu threshold over the grayscale image
//! 2. Foreground polarity: the class that owns fewer border pixels
//! 3. 3x3 morphological opening to drop speckle
//! 4. 4-connected component labelling, keeping the largest region

use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::morphology::open;
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::imageops::histogram;

/// Frames whose gray range is below this are treated as contrast-free.
pub const MIN_CONTRAST: u8 = 24;

/// Mask value for foreground pixels.
pub const FOREGROUND: u8 = 255;

/// Pixel coordinates of one connected region.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Region {
    pub pixels: Vec<(u32, u32)>,
}

impl Region {
    pub fn area(&self) -> usize {
        self.pixels.len()
    }

    /// Render the region as a 0/255 mask of the given size.
    pub fn to_mask(&self, width: u32, height: u32) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        for &(x, y) in &self.pixels {
            if x < width && y < height {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
        mask
    }
}

/// Segment the subject from the background as a 0/255 mask.
///
/// Returns `None` for frames without enough contrast to separate classes.
pub fn segment_foreground(gray: &GrayImage) -> Option<GrayImage> {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return None;
    }
    let hist = histogram(gray);
    let min = hist.iter().position(|c| *c > 0)? as u8;
    let max = hist.iter().rposition(|c| *c > 0)? as u8;
    if max - min < MIN_CONTRAST {
        return None;
    }

    // Pixels strictly above the level form the bright class.
    let threshold = otsu_level(gray);
    let bright = |x: u32, y: u32| gray.get_pixel(x, y)[0] > threshold;

    let mut border_bright = 0usize;
    let mut border_total = 0usize;
    for x in 0..w {
        for y in [0, h - 1] {
            border_total += 1;
            border_bright += bright(x, y) as usize;
        }
    }
    for y in 1..h - 1 {
        for x in [0, w - 1] {
            border_total += 1;
            border_bright += bright(x, y) as usize;
        }
    }
    let foreground_is_bright = border_bright * 2 <= border_total;

    let mask = GrayImage::from_fn(w, h, |x, y| {
        Luma([if bright(x, y) == foreground_is_bright { FOREGROUND } else { 0 }])
    });
    Some(open(&mask, Norm::LInf, 1))
}

/// Largest 4-connected region of a 0/255 mask.
pub fn largest_component(mask: &GrayImage) -> Option<Region> {
    let labels = connected_components(mask, Connectivity::Four, Luma([0u8]));
    let mut areas: Vec<usize> = Vec::new();
    for label in labels.pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if areas.len() <= label {
            areas.resize(label + 1, 0);
        }
        areas[label] += 1;
    }
    // Ties go to the lowest label, which is the first region in scan order.
    let (best, _) = areas
        .iter()
        .enumerate()
        .filter(|(_, area)| **area > 0)
        .fold(None, |best: Option<(usize, usize)>, (label, area)| match best {
            Some((_, top)) if top >= *area => best,
            _ => Some((label, *area)),
        })?;

    let pixels = labels
        .enumerate_pixels()
        .filter(|(_, _, label)| label[0] as usize == best)
        .map(|(x, y, _)| (x, y))
        .collect();
    Some(Region { pixels })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_image(w: u32, h: u32, rect: (u32, u32, u32, u32), fg: u8, bg: u8) -> GrayImage {
        let (rx, ry, rw, rh) = rect;
        GrayImage::from_fn(w, h, |x, y| {
            let inside = x >= rx && x < rx + rw && y >= ry && y < ry + rh;
            image::Luma([if inside { fg } else { bg }])
        })
    }

    fn count(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p[0] == FOREGROUND).count()
    }

    fn is_set(mask: &GrayImage, x: u32, y: u32) -> bool {
        mask.get_pixel(x, y)[0] == FOREGROUND
    }

    #[test]
    fn test_uniform_frame_has_no_foreground() {
        let gray = GrayImage::from_pixel(32, 32, image::Luma([128]));
        assert!(segment_foreground(&gray).is_none());
    }

    #[test]
    fn test_bright_subject_on_dark_background() {
        let gray = rect_image(40, 30, (10, 10, 20, 8), 220, 30);
        let mask = segment_foreground(&gray).unwrap();
        assert!(is_set(&mask, 15, 12));
        assert!(!is_set(&mask, 2, 2));
        assert_eq!(count(&mask), 160);
    }

    #[test]
    fn test_dark_subject_on_bright_background() {
        let gray = rect_image(40, 30, (10, 10, 20, 8), 30, 220);
        let mask = segment_foreground(&gray).unwrap();
        assert!(is_set(&mask, 15, 12));
        assert!(!is_set(&mask, 2, 2));
    }

    #[test]
    fn test_opening_removes_speckle() {
        let mut gray = rect_image(40, 30, (10, 10, 20, 8), 220, 30);
        gray.put_pixel(35, 25, image::Luma([220]));
        let mask = segment_foreground(&gray).unwrap();
        assert!(!is_set(&mask, 35, 25));
    }

    #[test]
    fn test_largest_component_wins() {
        let mut mask = GrayImage::new(20, 20);
        for x in 0..3 {
            mask.put_pixel(x, 0, Luma([FOREGROUND]));
        }
        for y in 5..15 {
            for x in 5..10 {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
        let region = largest_component(&mask).unwrap();
        assert_eq!(region.area(), 50);
        assert!(region.pixels.contains(&(5, 5)));
        assert!(!region.pixels.contains(&(0, 0)));

        let rendered = region.to_mask(20, 20);
        assert_eq!(count(&rendered), 50);
    }

    #[test]
    fn test_empty_mask_has_no_component() {
        assert!(largest_component(&GrayImage::new(8, 8)).is_none());
    }
}
