//! Calibrated measurement samples.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One accepted measurement. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MeasurementSample {
    /// Pipeline clock time in seconds.
    pub timestamp: f64,
    pub length_units: f64,
    pub girth_units: f64,
    pub confidence: f64,
}

impl MeasurementSample {
    pub fn new(timestamp: f64, length_units: f64, girth_units: f64, confidence: f64) -> Self {
        Self {
            timestamp,
            length_units,
            girth_units,
            confidence,
        }
    }
}
