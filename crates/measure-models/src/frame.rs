//! Frame buffers and overlay-space points.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModelError, ModelResult};

/// Bytes per pixel for RGBA frames.
pub const RGBA_CHANNELS: usize = 4;

/// A point in overlay coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Linear interpolation towards `target` by `alpha`.
    pub fn lerp(&self, target: &Point, alpha: f64) -> Point {
        Point {
            x: self.x + (target.x - self.x) * alpha,
            y: self.y + (target.y - self.y) * alpha,
        }
    }

    /// Scale both coordinates.
    pub fn scaled(&self, factor: f64) -> Point {
        Point {
            x: self.x * factor,
            y: self.y * factor,
        }
    }
}

/// A single RGBA frame with its capture timestamp (seconds).
///
/// Frames are owned by the tick that produced them. The pixel buffer is
/// validated on construction so downstream code can index it freely.
#[derive(Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    timestamp: f64,
}

impl Frame {
    /// Build a frame from raw RGBA bytes.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, timestamp: f64) -> ModelResult<Self> {
        if width == 0 || height == 0 {
            return Err(ModelError::InvalidDimensions { width, height });
        }
        let expected = width as usize * height as usize * RGBA_CHANNELS;
        if pixels.len() != expected {
            return Err(ModelError::BufferSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
            timestamp,
        })
    }

    /// Build a frame filled with a single RGBA color.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4], timestamp: f64) -> ModelResult<Self> {
        let count = width as usize * height as usize;
        let pixels = rgba.iter().copied().cycle().take(count * RGBA_CHANNELS).collect();
        Self::new(width, height, pixels, timestamp)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Copy of this frame with a new timestamp.
    pub fn with_timestamp(&self, timestamp: f64) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }

    /// RGBA value at (x, y). Coordinates must be in bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = (y as usize * self.width as usize + x as usize) * RGBA_CHANNELS;
        [
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ]
    }

    /// Set the RGBA value at (x, y). Coordinates must be in bounds.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let idx = (y as usize * self.width as usize + x as usize) * RGBA_CHANNELS;
        self.pixels[idx..idx + RGBA_CHANNELS].copy_from_slice(&rgba);
    }

    pub fn same_dimensions(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rejects_wrong_buffer() {
        let err = Frame::new(4, 4, vec![0; 10], 0.0).unwrap_err();
        assert!(matches!(
            err,
            ModelError::BufferSizeMismatch { expected: 64, actual: 10 }
        ));
    }

    #[test]
    fn test_frame_rejects_zero_dimensions() {
        assert!(Frame::new(0, 4, vec![], 0.0).is_err());
    }

    #[test]
    fn test_filled_frame_pixels() {
        let mut frame = Frame::filled(3, 2, [10, 20, 30, 255], 1.5).unwrap();
        assert_eq!(frame.pixel(2, 1), [10, 20, 30, 255]);

        frame.set_pixel(1, 1, [1, 2, 3, 4]);
        assert_eq!(frame.pixel(1, 1), [1, 2, 3, 4]);
        assert_eq!(frame.timestamp(), 1.5);
    }

    #[test]
    fn test_point_lerp_and_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-9);

        let mid = a.lerp(&b, 0.5);
        assert!((mid.x - 1.5).abs() < 1e-9);
        assert!((mid.y - 2.0).abs() < 1e-9);
        assert_eq!(a.lerp(&b, 1.0), b);
    }
}
