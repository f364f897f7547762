//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use image::GrayImage;
use measure_models::{DetectParams, DetectionResult, Frame, PipelineConfig, PipelineEvent};
use measure_pipeline::{FixedCalibration, Pipeline};
use measure_vision::{InlineBackend, VisionBackend, VisionError, VisionResult};
use tokio::sync::Notify;

pub const UNITS_PER_PIXEL: f64 = 0.05;

/// Light elongated bar on a dark background.
pub fn bar_frame() -> Frame {
    let mut frame = Frame::filled(160, 120, [40, 40, 50, 255], 0.0).unwrap();
    for y in 50..70 {
        for x in 30..130 {
            frame.set_pixel(x, y, [210, 180, 160, 255]);
        }
    }
    frame
}

pub fn pipeline_with(config: PipelineConfig, backend: Arc<dyn VisionBackend>) -> Pipeline {
    Pipeline::new(config, backend, Arc::new(FixedCalibration::new(UNITS_PER_PIXEL))).unwrap()
}

pub fn inline_pipeline(config: PipelineConfig) -> Pipeline {
    pipeline_with(config, Arc::new(InlineBackend::new()))
}

pub fn capture_times(events: &[PipelineEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::CaptureFired { sample, .. } => Some(sample.timestamp),
            _ => None,
        })
        .collect()
}

/// Fails detection on the listed call numbers (1-based), inline otherwise.
pub struct FlakyBackend {
    inner: InlineBackend,
    calls: AtomicUsize,
    fail_on: Vec<usize>,
}

impl FlakyBackend {
    pub fn new(fail_on: Vec<usize>) -> Self {
        Self {
            inner: InlineBackend::new(),
            calls: AtomicUsize::new(0),
            fail_on,
        }
    }
}

#[async_trait]
impl VisionBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn detect(&self, frame: Arc<Frame>, params: DetectParams) -> VisionResult<DetectionResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&call) {
            return Err(VisionError::detection_failed(format!("injected failure on call {call}")));
        }
        self.inner.detect(frame, params).await
    }

    async fn edges(&self, frame: Arc<Frame>) -> VisionResult<GrayImage> {
        self.inner.edges(frame).await
    }

    async fn segment(&self, frame: Arc<Frame>) -> VisionResult<GrayImage> {
        self.inner.segment(frame).await
    }
}

/// Holds detection until the gate opens.
pub struct GatedBackend {
    inner: InlineBackend,
    pub gate: Arc<Notify>,
}

impl GatedBackend {
    pub fn new() -> Self {
        Self {
            inner: InlineBackend::new(),
            gate: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl VisionBackend for GatedBackend {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn detect(&self, frame: Arc<Frame>, params: DetectParams) -> VisionResult<DetectionResult> {
        self.gate.notified().await;
        self.inner.detect(frame, params).await
    }

    async fn edges(&self, frame: Arc<Frame>) -> VisionResult<GrayImage> {
        self.inner.edges(frame).await
    }

    async fn segment(&self, frame: Arc<Frame>) -> VisionResult<GrayImage> {
        self.inner.segment(frame).await
    }
}

/// Never finishes detection within any reasonable budget.
pub struct StalledBackend;

#[async_trait]
impl VisionBackend for StalledBackend {
    fn name(&self) -> &'static str {
        "stalled"
    }

    async fn detect(&self, _frame: Arc<Frame>, _params: DetectParams) -> VisionResult<DetectionResult> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(DetectionResult::NotFound)
    }

    async fn edges(&self, frame: Arc<Frame>) -> VisionResult<GrayImage> {
        Ok(GrayImage::new(frame.width(), frame.height()))
    }

    async fn segment(&self, frame: Arc<Frame>) -> VisionResult<GrayImage> {
        Ok(GrayImage::new(frame.width(), frame.height()))
    }
}
