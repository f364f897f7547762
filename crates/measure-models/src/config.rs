//! Pipeline configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Runtime configuration for detection, stability gating and capture.
///
/// Any field may change between ticks; each tick works from a snapshot
/// taken when it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PipelineConfig {
    /// Resample scales tried by the detector.
    pub scales: Vec<f64>,
    /// Minimum scale-adjusted confidence for a `Found` result.
    pub confidence_floor: f64,
    /// Tick cadence, measured from tick start.
    pub detection_interval_ms: u64,
    /// Minimum fused confidence for a sample to enter the stability window.
    pub min_confidence: f64,
    /// Stability window horizon and required hold duration.
    pub stability_seconds: f64,
    /// Allowed length spread (units) inside the window.
    pub length_tolerance: f64,
    /// Allowed girth spread (units) inside the window.
    pub girth_tolerance: f64,
    /// Minimum time between automatic captures.
    pub auto_capture_cooldown_sec: f64,
    pub auto_capture: bool,
    pub auto_detect: bool,
    /// Smoothing factor for live ticks; still images always snap.
    pub smoothing_alpha: f64,
    /// Abort a tick as failed when detection exceeds this budget.
    pub soft_timeout_ms: Option<u64>,
    /// Snap-to-edge search radius in overlay pixels.
    pub snap_radius: u32,
    /// Smallest connected region, as a share of the frame, accepted by the
    /// region detector before falling back to line detection.
    pub region_min_area_fraction: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scales: vec![0.5, 0.75, 1.0, 1.25],
            confidence_floor: 0.3,
            detection_interval_ms: 500,
            min_confidence: 0.6,
            stability_seconds: 1.5,
            length_tolerance: 0.1,
            girth_tolerance: 0.1,
            auto_capture_cooldown_sec: 10.0,
            auto_capture: true,
            auto_detect: true,
            smoothing_alpha: 0.35,
            soft_timeout_ms: None,
            snap_radius: 18,
            region_min_area_fraction: 0.01,
        }
    }
}

impl PipelineConfig {
    /// Single still image: full resolution first, no temporal smoothing.
    pub fn still_image() -> Self {
        Self {
            scales: vec![1.0, 0.75, 0.5],
            auto_capture: false,
            smoothing_alpha: 1.0,
            ..Self::default()
        }
    }

    /// Faster cadence with a bounded tick latency.
    pub fn responsive() -> Self {
        Self {
            scales: vec![0.5, 0.75, 1.0],
            detection_interval_ms: 200,
            soft_timeout_ms: Some(1_000),
            ..Self::default()
        }
    }

    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            scales: std::env::var("MEASURE_SCALES")
                .ok()
                .and_then(|s| parse_scales(&s))
                .unwrap_or(defaults.scales),
            confidence_floor: env_parse("MEASURE_CONFIDENCE_FLOOR")
                .unwrap_or(defaults.confidence_floor),
            detection_interval_ms: env_parse("MEASURE_DETECTION_INTERVAL_MS")
                .unwrap_or(defaults.detection_interval_ms),
            min_confidence: env_parse("MEASURE_MIN_CONFIDENCE").unwrap_or(defaults.min_confidence),
            stability_seconds: env_parse("MEASURE_STABILITY_SECONDS")
                .unwrap_or(defaults.stability_seconds),
            length_tolerance: env_parse("MEASURE_LENGTH_TOLERANCE")
                .unwrap_or(defaults.length_tolerance),
            girth_tolerance: env_parse("MEASURE_GIRTH_TOLERANCE")
                .unwrap_or(defaults.girth_tolerance),
            auto_capture_cooldown_sec: env_parse("MEASURE_AUTO_CAPTURE_COOLDOWN_SEC")
                .unwrap_or(defaults.auto_capture_cooldown_sec),
            auto_capture: env_parse("MEASURE_AUTO_CAPTURE").unwrap_or(defaults.auto_capture),
            auto_detect: env_parse("MEASURE_AUTO_DETECT").unwrap_or(defaults.auto_detect),
            smoothing_alpha: env_parse("MEASURE_SMOOTHING_ALPHA")
                .unwrap_or(defaults.smoothing_alpha),
            soft_timeout_ms: env_parse("MEASURE_SOFT_TIMEOUT_MS").or(defaults.soft_timeout_ms),
            snap_radius: env_parse("MEASURE_SNAP_RADIUS").unwrap_or(defaults.snap_radius),
            region_min_area_fraction: env_parse("MEASURE_REGION_MIN_AREA_FRACTION")
                .unwrap_or(defaults.region_min_area_fraction),
        }
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> ModelResult<()> {
        if self.scales.is_empty() {
            return Err(ModelError::invalid_config("at least one scale is required"));
        }
        if self.scales.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(ModelError::invalid_config("scales must be positive"));
        }
        for (name, value) in [
            ("confidence_floor", self.confidence_floor),
            ("min_confidence", self.min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ModelError::invalid_config(format!("{name} must be within [0, 1]")));
            }
        }
        if self.detection_interval_ms == 0 {
            return Err(ModelError::invalid_config("detection_interval_ms must be > 0"));
        }
        if !(self.stability_seconds > 0.0) {
            return Err(ModelError::invalid_config("stability_seconds must be > 0"));
        }
        if self.length_tolerance < 0.0 || self.girth_tolerance < 0.0 {
            return Err(ModelError::invalid_config("tolerances must be >= 0"));
        }
        if self.auto_capture_cooldown_sec < 0.0 {
            return Err(ModelError::invalid_config("auto_capture_cooldown_sec must be >= 0"));
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(ModelError::invalid_config("smoothing_alpha must be within (0, 1]"));
        }
        if !(0.0..1.0).contains(&self.region_min_area_fraction) {
            return Err(ModelError::invalid_config("region_min_area_fraction must be within [0, 1)"));
        }
        Ok(())
    }

    /// Parameters forwarded to the detector.
    pub fn detect_params(&self) -> DetectParams {
        DetectParams {
            scales: self.scales.clone(),
            confidence_floor: self.confidence_floor,
            region_min_area_fraction: self.region_min_area_fraction,
        }
    }
}

/// Detector parameters carried with each detect request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectParams {
    pub scales: Vec<f64>,
    pub confidence_floor: f64,
    pub region_min_area_fraction: f64,
}

impl Default for DetectParams {
    fn default() -> Self {
        PipelineConfig::default().detect_params()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn parse_scales(raw: &str) -> Option<Vec<f64>> {
    let scales: Option<Vec<f64>> = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>().ok())
        .collect();
    scales.filter(|s| !s.is_empty())
}
