//! Stability-gated auto-capture state machine.
//!
//! Evaluated once per detection tick. The controller owns the
//! stable-since and last-capture timestamps; the stability window is
//! borrowed so a capture can reset it.
//!
//! ```text
//! Idle -> Scanning -> Stabilizing -> Locked -> Captured -> Scanning
//!            ^            |                                  |
//!            +------------+         Error -> Scanning        |
//! ```

use measure_models::{CaptureState, MeasurementSample, PipelineConfig};
use tracing::{debug, info};

use crate::history::{StabilityCriteria, StabilityWindow};

/// Slack for comparing elapsed hold time against the stability duration.
const HOLD_EPSILON: f64 = 1e-6;

/// Result of evaluating one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// States entered during this evaluation, in order.
    pub transitions: Vec<CaptureState>,
    /// Sample captured this tick, if a capture fired.
    pub captured: Option<MeasurementSample>,
}

/// Hysteresis controller for automatic capture.
#[derive(Debug, Clone, Default)]
pub struct CaptureController {
    state: CaptureState,
    stable_since: Option<f64>,
    last_capture: Option<f64>,
}

impl CaptureController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn stable_since(&self) -> Option<f64> {
        self.stable_since
    }

    pub fn last_capture(&self) -> Option<f64> {
        self.last_capture
    }

    /// Hold progress towards `Locked`, as a percentage.
    pub fn stability_progress(&self, now: f64, stability_seconds: f64) -> f64 {
        match self.stable_since {
            Some(since) if stability_seconds > 0.0 => {
                ((now - since) / stability_seconds * 100.0).clamp(0.0, 100.0)
            }
            Some(_) => 100.0,
            None => 0.0,
        }
    }

    fn enter(&mut self, state: CaptureState, transitions: &mut Vec<CaptureState>) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Capture state transition");
            self.state = state;
            transitions.push(state);
        }
    }

    /// Start of a tick: `Idle` and transient states resume `Scanning`.
    pub fn begin_tick(&mut self) -> Option<CaptureState> {
        let mut transitions = Vec::new();
        if self.state == CaptureState::Idle || self.state.is_transient() {
            self.enter(CaptureState::Scanning, &mut transitions);
        }
        transitions.pop()
    }

    /// The tick's detection failed; nothing else changes.
    pub fn fail(&mut self) -> Option<CaptureState> {
        let mut transitions = Vec::new();
        self.enter(CaptureState::Error, &mut transitions);
        transitions.pop()
    }

    /// Source stopped or auto-detection was disabled.
    pub fn pause(&mut self) -> Option<CaptureState> {
        let mut transitions = Vec::new();
        self.stable_since = None;
        self.enter(CaptureState::Idle, &mut transitions);
        transitions.pop()
    }

    /// Evaluate the stability predicate and advance the state.
    ///
    /// `sample_accepted` says whether this tick added a sample. Without one
    /// the window only holds older measurements, so the subject counts as
    /// unstable and nothing is captured.
    pub fn evaluate(
        &mut self,
        now: f64,
        sample_accepted: bool,
        window: &mut StabilityWindow,
        config: &PipelineConfig,
    ) -> Evaluation {
        let mut evaluation = Evaluation::default();

        if sample_accepted && window.is_stable(&StabilityCriteria::from(config)) {
            self.stable_since.get_or_insert(now);
        } else {
            self.stable_since = None;
        }

        let next = match self.stable_since {
            None => CaptureState::Scanning,
            Some(since) if now - since + HOLD_EPSILON >= config.stability_seconds => {
                CaptureState::Locked
            }
            Some(_) => CaptureState::Stabilizing,
        };
        self.enter(next, &mut evaluation.transitions);

        if next == CaptureState::Locked && config.auto_capture && self.cooldown_elapsed(now, config) {
            let sample = window.latest().copied();
            self.last_capture = Some(now);
            self.stable_since = None;
            window.clear();
            self.enter(CaptureState::Captured, &mut evaluation.transitions);
            info!(
                timestamp = now,
                length = sample.map(|s| s.length_units),
                girth = sample.map(|s| s.girth_units),
                "Auto-capture fired"
            );
            evaluation.captured = sample;
        }
        evaluation
    }

    fn cooldown_elapsed(&self, now: f64, config: &PipelineConfig) -> bool {
        self.last_capture
            .map_or(true, |last| now - last >= config.auto_capture_cooldown_sec)
    }
}
