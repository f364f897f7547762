//! Pixel-to-unit calibration input.
//!
//! Calibration is acquired elsewhere; the pipeline only reads the scale.

use std::sync::{Arc, RwLock};

/// Read-only provider of the current units-per-pixel scale.
pub trait CalibrationSource: Send + Sync {
    /// `None` while uncalibrated; samples are not recorded in that case.
    fn units_per_pixel(&self) -> Option<f64>;
}

/// A constant scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedCalibration(f64);

impl FixedCalibration {
    pub fn new(units_per_pixel: f64) -> Self {
        Self(units_per_pixel)
    }
}

impl CalibrationSource for FixedCalibration {
    fn units_per_pixel(&self) -> Option<f64> {
        (self.0.is_finite() && self.0 > 0.0).then_some(self.0)
    }
}

/// A scale that another component can update at any time.
#[derive(Debug, Clone, Default)]
pub struct SharedCalibration {
    inner: Arc<RwLock<Option<f64>>>,
}

impl SharedCalibration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, units_per_pixel: Option<f64>) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = units_per_pixel.filter(|v| v.is_finite() && *v > 0.0);
        }
    }
}

impl CalibrationSource for SharedCalibration {
    fn units_per_pixel(&self) -> Option<f64> {
        self.inner.read().ok().and_then(|guard| *guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_rejects_nonpositive() {
        assert_eq!(FixedCalibration::new(0.05).units_per_pixel(), Some(0.05));
        assert_eq!(FixedCalibration::new(0.0).units_per_pixel(), None);
        assert_eq!(FixedCalibration::new(f64::NAN).units_per_pixel(), None);
    }

    #[test]
    fn test_shared_updates_are_visible() {
        let calibration = SharedCalibration::new();
        let reader = calibration.clone();
        assert_eq!(reader.units_per_pixel(), None);
        calibration.set(Some(0.1));
        assert_eq!(reader.units_per_pixel(), Some(0.1));
        calibration.set(Some(-1.0));
        assert_eq!(reader.units_per_pixel(), None);
    }
}
