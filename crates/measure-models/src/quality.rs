//! Frame quality and environment scores.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Per-frame image quality, each score in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct QualityMetrics {
    pub sharpness: f64,
    pub contrast: f64,
    pub exposure: f64,
    pub color_balance: f64,
}

/// Scene conditions, each score in [0, 1] where higher is better.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct EnvironmentalFactors {
    pub lighting: f64,
    pub stability: f64,
    pub perspective: f64,
    pub background_noise: f64,
}

/// Actionable hint derived from quality scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Suggestion {
    IncreaseLighting,
    ReduceGlare,
    HoldSteady,
    ImproveFocus,
    IncreaseContrast,
    AdjustAngle,
    SimplifyBackground,
    RepositionSubject,
}

impl Suggestion {
    /// Short user-facing message.
    pub fn message(&self) -> &'static str {
        match self {
            Suggestion::IncreaseLighting => "Move to a brighter area or add light",
            Suggestion::ReduceGlare => "Reduce direct light to avoid glare",
            Suggestion::HoldSteady => "Hold the camera steady",
            Suggestion::ImproveFocus => "Tap to focus or move closer",
            Suggestion::IncreaseContrast => "Use a background that contrasts with the subject",
            Suggestion::AdjustAngle => "Point the camera straight at the subject",
            Suggestion::SimplifyBackground => "Use a plain, uncluttered background",
            Suggestion::RepositionSubject => "Center the subject in the frame",
        }
    }
}

/// Full advisory report for one frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct QualityReport {
    pub metrics: QualityMetrics,
    pub environment: EnvironmentalFactors,
    /// Weighted overall score in [0, 1].
    pub quality_score: f64,
    pub suggestions: Vec<Suggestion>,
}
