//! Capture state machine states.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// State of the stability-gated auto-capture controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    /// Auto-detection disabled or the frame source is unavailable.
    #[default]
    Idle,
    /// Ticking, but not enough consistent samples yet.
    Scanning,
    /// Stability predicate holds; waiting for the hold duration.
    Stabilizing,
    /// Predicate held for the full stability duration.
    Locked,
    /// An automatic capture just fired.
    Captured,
    /// The last tick failed.
    Error,
}

impl CaptureState {
    pub const ALL: &'static [CaptureState] = &[
        CaptureState::Idle,
        CaptureState::Scanning,
        CaptureState::Stabilizing,
        CaptureState::Locked,
        CaptureState::Captured,
        CaptureState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Scanning => "scanning",
            CaptureState::Stabilizing => "stabilizing",
            CaptureState::Locked => "locked",
            CaptureState::Captured => "captured",
            CaptureState::Error => "error",
        }
    }

    /// Transient states resolve to `Scanning` at the start of the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureState::Captured | CaptureState::Error)
    }

    /// Whether ticks are scheduled in this state.
    pub fn is_active(&self) -> bool {
        !matches!(self, CaptureState::Idle)
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CaptureState {
    type Err = CaptureStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CaptureState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s.to_lowercase())
            .ok_or_else(|| CaptureStateParseError(s.to_string()))
    }
}

#[derive(Debug, Error)]
#[error("Unknown capture state: {0}")]
pub struct CaptureStateParseError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parse_roundtrip() {
        for state in CaptureState::ALL {
            assert_eq!(state.to_string().parse::<CaptureState>().unwrap(), *state);
        }
        assert!("LOCKED".parse::<CaptureState>().is_ok());
        assert!("armed".parse::<CaptureState>().is_err());
    }

    #[test]
    fn test_transient_states() {
        assert!(CaptureState::Captured.is_transient());
        assert!(CaptureState::Error.is_transient());
        assert!(!CaptureState::Locked.is_transient());
        assert!(!CaptureState::Idle.is_active());
    }
}
