//! Prometheus metrics for the measurement pipeline.

use measure_models::CaptureState;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // Tick metrics
    pub const TICKS_TOTAL: &str = "measure_ticks_total";
    pub const TICK_DURATION_SECONDS: &str = "measure_tick_duration_seconds";
    pub const TICKS_DISCARDED_TOTAL: &str = "measure_ticks_discarded_total";
    pub const TICK_ERRORS_TOTAL: &str = "measure_tick_errors_total";

    // Detection metrics
    pub const DETECTION_CONFIDENCE: &str = "measure_detection_confidence";
    pub const QUALITY_SCORE: &str = "measure_quality_score";
    pub const SAMPLES_ACCEPTED_TOTAL: &str = "measure_samples_accepted_total";

    // Capture metrics
    pub const CAPTURES_TOTAL: &str = "measure_captures_total";
    pub const STATE_TRANSITIONS_TOTAL: &str = "measure_state_transitions_total";
    pub const CAPTURE_STATE: &str = "measure_capture_state";

    // Source metrics
    pub const SOURCE_UNAVAILABLE_TOTAL: &str = "measure_source_unavailable_total";
}

/// Record a finished tick.
pub fn record_tick(outcome: &str, duration_secs: f64) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::TICKS_TOTAL, &labels).increment(1);
    histogram!(names::TICK_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a tick whose result arrived after cancellation.
pub fn record_tick_discarded() {
    counter!(names::TICKS_DISCARDED_TOTAL).increment(1);
}

/// Record a failed tick by error kind.
pub fn record_tick_error(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::TICK_ERRORS_TOTAL, &labels).increment(1);
}

pub fn record_detection(confidence: f64, quality_score: f64) {
    histogram!(names::DETECTION_CONFIDENCE).record(confidence);
    gauge!(names::QUALITY_SCORE).set(quality_score);
}

pub fn record_sample_accepted() {
    counter!(names::SAMPLES_ACCEPTED_TOTAL).increment(1);
}

pub fn record_capture() {
    counter!(names::CAPTURES_TOTAL).increment(1);
}

/// Record a state transition and publish the current state as a gauge.
pub fn record_state_transition(state: CaptureState) {
    let labels = [("state", state.as_str().to_string())];
    counter!(names::STATE_TRANSITIONS_TOTAL, &labels).increment(1);
    let index = CaptureState::ALL.iter().position(|s| *s == state).unwrap_or(0);
    gauge!(names::CAPTURE_STATE).set(index as f64);
}

pub fn record_source_unavailable(source: &str) {
    let labels = [("source", source.to_string())];
    counter!(names::SOURCE_UNAVAILABLE_TOTAL, &labels).increment(1);
}
