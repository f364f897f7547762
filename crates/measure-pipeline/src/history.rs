//! Time-windowed measurement history and stability analysis.

use measure_models::{MeasurementSample, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::stats::{mean, range, std_deviation};

/// Samples required before the stability predicate can hold.
pub const MIN_STABLE_SAMPLES: usize = 3;

/// Samples considered by the outlier check, latest included.
pub const OUTLIER_WINDOW: usize = 5;

pub const OUTLIER_Z: f64 = 2.5;
pub const SEVERE_OUTLIER_Z: f64 = 3.5;

/// Relative noise floor for the outlier baseline spread.
const RELATIVE_SPREAD_FLOOR: f64 = 0.02;

/// Thresholds for the stability predicate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityCriteria {
    pub length_tolerance: f64,
    pub girth_tolerance: f64,
    pub min_confidence: f64,
}

impl From<&PipelineConfig> for StabilityCriteria {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            length_tolerance: config.length_tolerance,
            girth_tolerance: config.girth_tolerance,
            min_confidence: config.min_confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierSeverity {
    Moderate,
    Severe,
}

/// Advisory flag for a sample that disagrees with its predecessors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlierFlag {
    pub z_length: f64,
    pub z_girth: f64,
    pub severity: OutlierSeverity,
    /// Confidence that the sample really is an outlier, capped at 0.95.
    pub confidence: f64,
}

impl OutlierFlag {
    pub fn z_score(&self) -> f64 {
        self.z_length.max(self.z_girth)
    }
}

/// Accepted samples no older than `horizon` seconds, oldest first.
///
/// Entries are only ever appended or evicted.
#[derive(Debug, Clone)]
pub struct StabilityWindow {
    samples: VecDeque<MeasurementSample>,
    horizon: f64,
}

impl StabilityWindow {
    pub fn new(horizon: f64) -> Self {
        Self {
            samples: VecDeque::new(),
            horizon,
        }
    }

    pub fn horizon(&self) -> f64 {
        self.horizon
    }

    /// Change the horizon; takes effect on the next eviction.
    pub fn set_horizon(&mut self, horizon: f64) {
        self.horizon = horizon;
    }

    /// Append a sample and evict everything older than the horizon.
    pub fn insert(&mut self, sample: MeasurementSample) {
        self.samples.push_back(sample);
        self.evict(sample.timestamp);
    }

    /// Drop samples whose age at `now` exceeds the horizon.
    pub fn evict(&mut self, now: f64) {
        while let Some(front) = self.samples.front() {
            if now - front.timestamp > self.horizon {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&MeasurementSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MeasurementSample> {
        self.samples.iter()
    }

    /// The most recent `n` samples, oldest first.
    pub fn recent(&self, n: usize) -> Vec<MeasurementSample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).copied().collect()
    }

    pub fn lengths(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.length_units).collect()
    }

    pub fn girths(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.girth_units).collect()
    }

    /// Enough consistent, confident samples to call the measurement stable.
    pub fn is_stable(&self, criteria: &StabilityCriteria) -> bool {
        if self.samples.len() < MIN_STABLE_SAMPLES {
            return false;
        }
        let latest_confident = self
            .latest()
            .map_or(false, |s| s.confidence >= criteria.min_confidence);
        latest_confident
            && range(&self.lengths()) <= criteria.length_tolerance
            && range(&self.girths()) <= criteria.girth_tolerance
    }

    /// Check the latest sample against the ones before it.
    ///
    /// The baseline is the up to four samples preceding the latest. Its
    /// spread is floored at 2% of the baseline mean so a perfectly steady
    /// history does not turn sub-tolerance noise into outliers.
    pub fn outlier(&self) -> Option<OutlierFlag> {
        let recent = self.recent(OUTLIER_WINDOW);
        if recent.len() < MIN_STABLE_SAMPLES {
            return None;
        }
        let (latest, baseline) = recent.split_last()?;

        let z = |value: f64, series: Vec<f64>| {
            let avg = mean(&series);
            let spread = std_deviation(&series)
                .max(avg.abs() * RELATIVE_SPREAD_FLOOR)
                .max(1e-6);
            (value - avg).abs() / spread
        };
        let z_length = z(latest.length_units, baseline.iter().map(|s| s.length_units).collect());
        let z_girth = z(latest.girth_units, baseline.iter().map(|s| s.girth_units).collect());

        let worst = z_length.max(z_girth);
        if worst <= OUTLIER_Z {
            return None;
        }
        Some(OutlierFlag {
            z_length,
            z_girth,
            severity: if worst > SEVERE_OUTLIER_Z {
                OutlierSeverity::Severe
            } else {
                OutlierSeverity::Moderate
            },
            confidence: (worst / 4.0).min(0.95),
        })
    }
}
