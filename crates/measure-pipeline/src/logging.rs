//! Tracing setup and structured session logging.

use measure_models::{CaptureState, PipelineConfig, PipelineEvent};
use tracing::{debug, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use crate::pipeline::AutomationStats;

/// Initialize tracing: ANSI output for dev, JSON when `LOG_FORMAT=json`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["measure=info", "measure_vision=info", "measure_pipeline=info"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    let result = if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()
    };
    if result.is_err() {
        warn!("Tracing subscriber already installed");
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    TimeLimit,
    SourceEnded,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Requested => "requested",
            StopReason::TimeLimit => "time_limit",
            StopReason::SourceEnded => "source_ended",
        }
    }
}

/// Structured log lines for one measurement session.
///
/// A session is one run of the tick loop over one frame source. Every line
/// carries the session id and source; captures are counted as they are
/// observed so each one is logged with its ordinal and measurements.
#[derive(Debug, Clone)]
pub struct SessionLogger {
    session_id: Uuid,
    source: String,
    captures: u64,
}

impl SessionLogger {
    pub fn new(source: &str) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            source: source.to_string(),
            captures: 0,
        }
    }

    pub fn log_start(&self, config: &PipelineConfig) {
        info!(
            session_id = %self.session_id,
            source = %self.source,
            interval_ms = config.detection_interval_ms,
            stability_seconds = config.stability_seconds,
            auto_capture = config.auto_capture,
            cooldown_sec = config.auto_capture_cooldown_sec,
            "Measurement session started"
        );
    }

    pub fn log_interval_change(&self, from_ms: u64, to_ms: u64) {
        debug!(
            session_id = %self.session_id,
            from_ms,
            to_ms,
            "Tick interval changed"
        );
    }

    pub fn log_source_lost(&self, now: f64, state: CaptureState) {
        warn!(
            session_id = %self.session_id,
            source = %self.source,
            timestamp = now,
            state = %state,
            "Frame source unavailable, pausing"
        );
    }

    pub fn log_source_resumed(&self, now: f64) {
        info!(
            session_id = %self.session_id,
            source = %self.source,
            timestamp = now,
            "Frame source resumed"
        );
    }

    /// Look at an outgoing event; captures are logged and counted.
    pub fn observe(&mut self, event: &PipelineEvent) {
        if let PipelineEvent::CaptureFired { sample, captured_at } = event {
            self.captures += 1;
            info!(
                session_id = %self.session_id,
                capture = self.captures,
                length_units = sample.length_units,
                girth_units = sample.girth_units,
                confidence = sample.confidence,
                captured_at = %captured_at,
                "Measurement captured"
            );
        }
    }

    pub fn log_stopped(&self, reason: StopReason, now: f64) {
        info!(
            session_id = %self.session_id,
            reason = reason.as_str(),
            timestamp = now,
            "Measurement session stopping"
        );
    }

    /// Log completion, then the automation counters.
    pub fn log_completion(&self, stats: &AutomationStats, state: CaptureState) {
        info!(
            session_id = %self.session_id,
            source = %self.source,
            final_state = %state,
            captures = self.captures,
            "Measurement session completed"
        );
        stats.log_summary();
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Captures observed so far.
    pub fn captures(&self) -> u64 {
        self.captures
    }

    /// Span wrapping the tick loop for this session.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "session",
            session_id = %self.session_id,
            source = %self.source
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use measure_models::MeasurementSample;

    #[test]
    fn test_sessions_get_distinct_ids() {
        let a = SessionLogger::new("static");
        let b = SessionLogger::new("static");
        assert_eq!(a.source(), "static");
        assert_ne!(a.session_id(), b.session_id());
    }

    #[test]
    fn test_observe_counts_captures_only() {
        let mut logger = SessionLogger::new("replay");
        logger.observe(&PipelineEvent::DetectionLost { timestamp: 0.5 });
        logger.observe(&PipelineEvent::CaptureStateChanged {
            state: CaptureState::Locked,
            timestamp: 1.7,
        });
        assert_eq!(logger.captures(), 0);

        let fired = PipelineEvent::CaptureFired {
            sample: MeasurementSample::new(1.7, 4.95, 1.0, 0.9),
            captured_at: Utc::now(),
        };
        logger.observe(&fired);
        logger.observe(&fired);
        assert_eq!(logger.captures(), 2);
    }

    #[test]
    fn test_stop_reason_labels() {
        assert_eq!(StopReason::Requested.as_str(), "requested");
        assert_eq!(StopReason::TimeLimit.as_str(), "time_limit");
        assert_eq!(StopReason::SourceEnded.as_str(), "source_ended");
    }

    #[test]
    fn test_create_span() {
        let logger = SessionLogger::new("replay");
        let _span = logger.create_span();
    }
}
