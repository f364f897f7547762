//! Pipeline state and the per-tick entry point.
//!
//! A tick runs the only awaiting step first (detection plus edge map on the
//! vision backend), then applies everything else synchronously. If the
//! vision step fails, times out, or is cancelled, nothing is applied.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use image::GrayImage;
use measure_models::{
    CaptureState, DetectionResult, Frame, MeasurementSample, PipelineConfig, PipelineEvent,
    QualityReport,
};
use measure_vision::{analyze_quality, with_detection_confidence, EdgeCache, FrameHistory, VisionBackend};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::advisor::{Advice, AdviceInput, Advisor};
use crate::calibration::CalibrationSource;
use crate::capture::CaptureController;
use crate::control::{ControlState, PipelineHandle};
use crate::error::{PipelineError, PipelineResult};
use crate::history::StabilityWindow;
use crate::metrics;
use crate::stabilizer::{InputMode, Stabilizer};

/// Counters for one pipeline session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AutomationStats {
    pub ticks: u64,
    pub detections: u64,
    pub samples_accepted: u64,
    pub captures: u64,
    pub failed_ticks: u64,
    pub discarded_ticks: u64,
    pub last_confidence: f64,
}

impl AutomationStats {
    /// Share of applied ticks that found the subject.
    pub fn detection_rate(&self) -> f64 {
        let applied = self.ticks.saturating_sub(self.failed_ticks + self.discarded_ticks);
        if applied == 0 {
            0.0
        } else {
            self.detections as f64 / applied as f64
        }
    }

    /// Log summary statistics.
    pub fn log_summary(&self) {
        info!(
            ticks = self.ticks,
            detections = self.detections,
            samples = self.samples_accepted,
            captures = self.captures,
            failed = self.failed_ticks,
            discarded = self.discarded_ticks,
            detection_rate = format!("{:.2}", self.detection_rate()),
            "Automation statistics"
        );
    }
}

/// How a tick ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum TickOutcome {
    /// Results applied to state.
    Applied,
    /// Vision work failed; state moved to `Error`.
    Failed(String),
    /// Result arrived after cancellation and was dropped.
    Discarded,
    /// Auto-detect disabled or source unavailable; pipeline is `Idle`.
    Paused,
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::Applied => "applied",
            TickOutcome::Failed(_) => "failed",
            TickOutcome::Discarded => "discarded",
            TickOutcome::Paused => "paused",
        }
    }
}

/// Everything one tick produced.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub now: f64,
    pub outcome: TickOutcome,
    pub state: CaptureState,
    pub events: Vec<PipelineEvent>,
    /// Smoothed detection when the tick was applied.
    pub detection: Option<DetectionResult>,
    pub quality: Option<QualityReport>,
    pub advice: Option<Advice>,
}

impl TickReport {
    fn new(now: f64, outcome: TickOutcome, state: CaptureState) -> Self {
        Self {
            now,
            outcome,
            state,
            events: Vec::new(),
            detection: None,
            quality: None,
            advice: None,
        }
    }

    pub fn captured(&self) -> Option<&MeasurementSample> {
        self.events.iter().find_map(|event| match event {
            PipelineEvent::CaptureFired { sample, .. } => Some(sample),
            _ => None,
        })
    }
}

/// All mutable pipeline state. Touched only by the tick loop.
#[derive(Debug, Clone)]
pub struct PipelineState {
    frames: FrameHistory,
    edges: EdgeCache,
    stabilizer: Stabilizer,
    window: StabilityWindow,
    capture: CaptureController,
    stats: AutomationStats,
}

impl PipelineState {
    pub fn new(stability_seconds: f64) -> Self {
        Self {
            frames: FrameHistory::new(),
            edges: EdgeCache::new(),
            stabilizer: Stabilizer::new(),
            window: StabilityWindow::new(stability_seconds),
            capture: CaptureController::new(),
            stats: AutomationStats::default(),
        }
    }

    /// Drop history, caches and counters. Capture timing is kept so a
    /// reset never bypasses the cooldown.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.edges.clear();
        self.stabilizer.reset();
        self.window.clear();
        self.stats = AutomationStats::default();
    }

    pub fn frames(&self) -> &FrameHistory {
        &self.frames
    }

    pub fn edges(&self) -> &EdgeCache {
        &self.edges
    }

    pub fn window(&self) -> &StabilityWindow {
        &self.window
    }

    pub fn capture(&self) -> &CaptureController {
        &self.capture
    }

    pub fn stats(&self) -> &AutomationStats {
        &self.stats
    }
}

/// One measurement pipeline instance.
pub struct Pipeline {
    backend: Arc<dyn VisionBackend>,
    calibration: Arc<dyn CalibrationSource>,
    config_rx: watch::Receiver<PipelineConfig>,
    control: Arc<ControlState>,
    handle: PipelineHandle,
    mode: InputMode,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        backend: Arc<dyn VisionBackend>,
        calibration: Arc<dyn CalibrationSource>,
    ) -> PipelineResult<Self> {
        config
            .validate()
            .map_err(|e| PipelineError::config_error(e.to_string()))?;
        let state = PipelineState::new(config.stability_seconds);
        let (config_tx, config_rx) = watch::channel(config);
        let control = Arc::new(ControlState::default());
        let handle = PipelineHandle::new(config_tx, Arc::clone(&control));

        info!(backend = backend.name(), "Pipeline created");
        Ok(Self {
            backend,
            calibration,
            config_rx,
            control,
            handle,
            mode: InputMode::Live,
            state,
        })
    }

    pub fn with_input_mode(mut self, mode: InputMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn capture_state(&self) -> CaptureState {
        self.state.capture.state()
    }

    pub fn stats(&self) -> &AutomationStats {
        &self.state.stats
    }

    /// Percent of the hold time elapsed towards `Locked`.
    pub fn stability_progress(&self, now: f64) -> f64 {
        let stability_seconds = self.config_rx.borrow().stability_seconds;
        self.state.capture.stability_progress(now, stability_seconds)
    }

    /// Single-channel subject mask for `frame`.
    pub async fn segment(&self, frame: Arc<Frame>) -> PipelineResult<GrayImage> {
        Ok(self.backend.segment(frame).await?)
    }

    /// Enter `Idle`. Returns the state change event, if any.
    pub fn pause(&mut self, now: f64) -> Vec<PipelineEvent> {
        self.state.stabilizer.reset();
        let mut events = Vec::new();
        if let Some(state) = self.state.capture.pause() {
            push_transition(&mut events, state, now);
        }
        events
    }

    /// Run one tick on `frame` at pipeline time `now` (seconds).
    ///
    /// Never fails: errors are contained and reported via the outcome.
    pub async fn tick(&mut self, frame: Arc<Frame>, now: f64) -> TickReport {
        let started = Instant::now();
        let report = self.run_tick(frame, now).await;
        metrics::record_tick(report.outcome.as_str(), started.elapsed().as_secs_f64());
        report
    }

    async fn run_tick(&mut self, frame: Arc<Frame>, now: f64) -> TickReport {
        let _busy = self.control.begin();
        let config = self.config_rx.borrow_and_update().clone();
        if self.control.take_reset() {
            info!("Resetting pipeline state");
            self.state.reset();
        }
        self.state.stats.ticks += 1;

        if !config.auto_detect || !self.control.source_available() {
            let events = self.pause(now);
            let mut report = TickReport::new(now, TickOutcome::Paused, self.capture_state());
            report.events = events;
            return report;
        }

        let generation = self.control.generation();
        let quality = analyze_quality(&frame, &self.state.frames);
        let vision = self.run_vision(Arc::clone(&frame), &config).await;

        if self.control.generation() != generation {
            self.state.stats.discarded_ticks += 1;
            metrics::record_tick_discarded();
            warn!(timestamp = now, "Discarding tick result after cancellation");
            return TickReport::new(now, TickOutcome::Discarded, self.capture_state());
        }

        let mut events = Vec::new();
        if let Some(state) = self.state.capture.begin_tick() {
            push_transition(&mut events, state, now);
        }

        match vision {
            Ok((raw, edge_map)) => {
                let mut report = self.apply(now, frame, raw, edge_map, quality, &config, events);
                report.state = self.capture_state();
                report
            }
            Err(e) => {
                self.state.stats.failed_ticks += 1;
                metrics::record_tick_error(e.kind());
                warn!(timestamp = now, error = %e, "Tick failed");
                if let Some(state) = self.state.capture.fail() {
                    push_transition(&mut events, state, now);
                }
                let mut report =
                    TickReport::new(now, TickOutcome::Failed(e.to_string()), self.capture_state());
                report.events = events;
                report
            }
        }
    }

    async fn run_vision(
        &self,
        frame: Arc<Frame>,
        config: &PipelineConfig,
    ) -> PipelineResult<(DetectionResult, GrayImage)> {
        let params = config.detect_params();
        let work = async {
            tokio::try_join!(
                self.backend.detect(Arc::clone(&frame), params),
                self.backend.edges(Arc::clone(&frame)),
            )
            .map_err(PipelineError::from)
        };
        match config.soft_timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), work)
                .await
                .map_err(|_| PipelineError::TickTimeout(ms))?,
            None => work.await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply(
        &mut self,
        now: f64,
        frame: Arc<Frame>,
        raw: DetectionResult,
        edge_map: GrayImage,
        quality: QualityReport,
        config: &PipelineConfig,
        mut events: Vec<PipelineEvent>,
    ) -> TickReport {
        let state = &mut self.state;
        state.frames.push(frame);
        state.edges.push(edge_map);

        let had_estimate = state.stabilizer.has_estimate();
        let smoothed = state.stabilizer.update(&raw, self.mode.alpha(config.smoothing_alpha));
        let quality = with_detection_confidence(quality, smoothed.confidence());
        let units_per_pixel = self.calibration.units_per_pixel();

        state.window.set_horizon(config.stability_seconds);
        let mut sample_accepted = false;
        match &smoothed {
            DetectionResult::Found {
                base_point,
                tip_point,
                girth_pixels,
                confidence,
                curvature_deg,
            } => {
                state.stats.detections += 1;
                state.stats.last_confidence = *confidence;
                metrics::record_detection(*confidence, quality.quality_score);

                if *confidence >= config.min_confidence {
                    match units_per_pixel {
                        Some(scale) => {
                            state.window.insert(MeasurementSample::new(
                                now,
                                smoothed.length_pixels() * scale,
                                girth_pixels * scale,
                                *confidence,
                            ));
                            sample_accepted = true;
                            state.stats.samples_accepted += 1;
                            metrics::record_sample_accepted();
                        }
                        None => debug!(timestamp = now, "No calibration, sample not recorded"),
                    }
                }

                events.push(PipelineEvent::DetectionUpdated {
                    base_point: *base_point,
                    tip_point: *tip_point,
                    girth_pixels: *girth_pixels,
                    confidence: *confidence,
                    quality_score: quality.quality_score,
                    curvature_deg: *curvature_deg,
                });
            }
            DetectionResult::NotFound => {
                state.stats.last_confidence = 0.0;
                if had_estimate {
                    events.push(PipelineEvent::DetectionLost { timestamp: now });
                }
            }
        }
        state.window.evict(now);

        let advice = Advisor::new(config.snap_radius).advise(&AdviceInput {
            detection: &raw,
            units_per_pixel,
            window: &state.window,
            edges: &state.edges,
            quality: &quality,
        });
        if let Some(outlier) = &advice.outlier {
            debug!(
                z = outlier.z_score(),
                severity = ?outlier.severity,
                "Latest sample looks like an outlier"
            );
        }

        let evaluation = state
            .capture
            .evaluate(now, sample_accepted, &mut state.window, config);
        for transition in evaluation.transitions {
            push_transition(&mut events, transition, now);
        }
        if let Some(sample) = evaluation.captured {
            state.stats.captures += 1;
            metrics::record_capture();
            events.push(PipelineEvent::CaptureFired {
                sample,
                captured_at: Utc::now(),
            });
        }

        debug!(
            timestamp = now,
            found = smoothed.is_found(),
            confidence = smoothed.confidence(),
            samples = state.window.len(),
            state = %state.capture.state(),
            "Tick applied"
        );

        let mut report = TickReport::new(now, TickOutcome::Applied, state.capture.state());
        report.events = events;
        report.detection = Some(smoothed);
        report.quality = Some(quality);
        report.advice = Some(advice);
        report
    }
}

fn push_transition(events: &mut Vec<PipelineEvent>, state: CaptureState, now: f64) {
    metrics::record_state_transition(state);
    info!(state = %state, timestamp = now, "Capture state changed");
    events.push(PipelineEvent::CaptureStateChanged {
        state,
        timestamp: now,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::FixedCalibration;
    use measure_vision::InlineBackend;

    fn bar_frame() -> Arc<Frame> {
        let mut frame = Frame::filled(160, 120, [40, 40, 50, 255], 0.0).unwrap();
        for y in 50..70 {
            for x in 30..130 {
                frame.set_pixel(x, y, [210, 180, 160, 255]);
            }
        }
        Arc::new(frame)
    }

    fn pipeline(config: PipelineConfig) -> Pipeline {
        Pipeline::new(
            config,
            Arc::new(InlineBackend::new()),
            Arc::new(FixedCalibration::new(0.05)),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            stability_seconds: 0.0,
            ..Default::default()
        };
        let result = Pipeline::new(
            config,
            Arc::new(InlineBackend::new()),
            Arc::new(FixedCalibration::new(0.05)),
        );
        assert!(matches!(result, Err(PipelineError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_first_tick_scans_and_detects() {
        let mut pipeline = pipeline(PipelineConfig::default());
        let report = pipeline.tick(bar_frame(), 0.0).await;

        assert_eq!(report.outcome, TickOutcome::Applied);
        assert_eq!(report.state, CaptureState::Scanning);
        assert!(matches!(
            report.events.first(),
            Some(PipelineEvent::CaptureStateChanged {
                state: CaptureState::Scanning,
                ..
            })
        ));
        assert!(report
            .events
            .iter()
            .any(|e| matches!(e, PipelineEvent::DetectionUpdated { .. })));
        assert_eq!(pipeline.state().window().len(), 1);
        assert_eq!(pipeline.state().edges().len(), 1);
        assert_eq!(pipeline.state().frames().len(), 1);

        let sample = pipeline.state().window().latest().unwrap();
        // 99 px long, 20 px wide at 0.05 units per pixel.
        assert!((sample.length_units - 4.95).abs() < 0.2, "length {}", sample.length_units);
        assert!((sample.girth_units - 1.0).abs() < 0.1, "girth {}", sample.girth_units);
    }

    #[tokio::test]
    async fn test_uniform_frame_is_not_found() {
        let mut pipeline = pipeline(PipelineConfig::default());
        let frame = Arc::new(Frame::filled(64, 48, [90, 90, 90, 255], 0.0).unwrap());
        let report = pipeline.tick(frame, 0.0).await;
        assert_eq!(report.outcome, TickOutcome::Applied);
        assert_eq!(report.detection, Some(DetectionResult::NotFound));
        assert!(pipeline.state().window().is_empty());
    }

    #[tokio::test]
    async fn test_no_calibration_records_nothing() {
        struct Uncalibrated;
        impl CalibrationSource for Uncalibrated {
            fn units_per_pixel(&self) -> Option<f64> {
                None
            }
        }
        let mut pipeline = Pipeline::new(
            PipelineConfig::default(),
            Arc::new(InlineBackend::new()),
            Arc::new(Uncalibrated),
        )
        .unwrap();
        let report = pipeline.tick(bar_frame(), 0.0).await;
        assert!(report.detection.unwrap().is_found());
        assert!(pipeline.state().window().is_empty());
        assert_eq!(pipeline.stats().samples_accepted, 0);
    }

    #[tokio::test]
    async fn test_disabled_auto_detect_pauses() {
        let mut pipeline = pipeline(PipelineConfig::default());
        pipeline.tick(bar_frame(), 0.0).await;
        pipeline.handle().set_auto_detect(false);

        let report = pipeline.tick(bar_frame(), 0.5).await;
        assert_eq!(report.outcome, TickOutcome::Paused);
        assert_eq!(report.state, CaptureState::Idle);
        assert_eq!(pipeline.state().window().len(), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let mut pipeline = pipeline(PipelineConfig::default());
        pipeline.tick(bar_frame(), 0.0).await;
        pipeline.handle().request_reset();
        pipeline.tick(bar_frame(), 0.5).await;
        assert_eq!(pipeline.state().window().len(), 1);
        assert_eq!(pipeline.stats().ticks, 1);
    }

    #[tokio::test]
    async fn test_segment_op() {
        let pipeline = pipeline(PipelineConfig::default());
        let mask = pipeline.segment(bar_frame()).await.unwrap();
        assert_eq!(mask.dimensions(), (160, 120));
        assert!(mask.get_pixel(80, 60)[0] > 0);
        assert_eq!(mask.get_pixel(5, 5)[0], 0);
    }

    #[test]
    fn test_detection_rate() {
        let stats = AutomationStats {
            ticks: 10,
            detections: 6,
            failed_ticks: 2,
            ..Default::default()
        };
        assert!((stats.detection_rate() - 0.75).abs() < 1e-9);
        assert_eq!(AutomationStats::default().detection_rate(), 0.0);
    }
}
