//! Grayscale conversion, resampling and gradient maps.

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use measure_models::Frame;

/// Signed per-pixel gradient response.
pub type Gradient = ImageBuffer<Luma<i16>, Vec<i16>>;

/// Rec.601 luma of an RGB triple.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> f64 {
    0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64
}

/// Convert an RGBA frame to an 8-bit grayscale image.
pub fn to_gray(frame: &Frame) -> GrayImage {
    let data = frame
        .pixels()
        .chunks_exact(4)
        .map(|px| luma(px[0], px[1], px[2]).round().min(255.0) as u8)
        .collect();
    // Buffer length always matches the frame dimensions.
    GrayImage::from_raw(frame.width(), frame.height(), data)
        .unwrap_or_else(|| GrayImage::new(frame.width(), frame.height()))
}

/// Resample by `scale`. Returns `None` when the result would be smaller
/// than `min_side` pixels on either axis.
pub fn resample(gray: &GrayImage, scale: f64, min_side: u32) -> Option<GrayImage> {
    let (w, h) = gray.dimensions();
    let nw = (w as f64 * scale).round() as u32;
    let nh = (h as f64 * scale).round() as u32;
    if nw < min_side || nh < min_side {
        return None;
    }
    if nw == w && nh == h {
        return Some(gray.clone());
    }
    Some(imageops::resize(gray, nw, nh, FilterType::Triangle))
}

/// Horizontal and vertical Sobel responses.
pub fn sobel(gray: &GrayImage) -> (Gradient, Gradient) {
    (horizontal_sobel(gray), vertical_sobel(gray))
}

/// Sobel gradient magnitude scaled into 0..=255.
///
/// A hard black/white step produces 255; the one-pixel border is zero.
pub fn edge_map(gray: &GrayImage) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return GrayImage::new(w, h);
    }
    let (gx, gy) = sobel(gray);
    GrayImage::from_fn(w, h, |x, y| {
        if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
            return Luma([0]);
        }
        let dx = gx.get_pixel(x, y)[0] as f64;
        let dy = gy.get_pixel(x, y)[0] as f64;
        Luma([((dx * dx + dy * dy).sqrt() / 4.0).min(255.0) as u8])
    })
}

/// 256-bin intensity histogram.
pub fn histogram(gray: &GrayImage) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for px in gray.as_raw() {
        hist[*px as usize] += 1;
    }
    hist
}
