//! Vision backends: where per-frame CPU work runs.
//!
//! # Backend Priority
//! 1. **Worker** - a dedicated thread fed by id-keyed requests
//! 2. **Inline** - the same algorithms on the calling task
//!
//! Both backends execute requests through [`handle_request`], so the
//! fallback path produces identical results.

use async_trait::async_trait;
use image::GrayImage;
use measure_models::{
    DetectParams, DetectionResult, Frame, ImageBuffer, WorkerData, WorkerOp, WorkerRequest,
    WorkerResponse,
};
use metrics::counter;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::detector::MultiScaleDetector;
use crate::error::{VisionError, VisionResult};
use crate::imageops::{edge_map, to_gray};
use crate::segment::{largest_component, segment_foreground};

/// Counter incremented whenever work is rerouted to the inline backend.
pub const WORKER_FALLBACK_TOTAL: &str = "measure_vision_worker_fallback_total";

/// Executes vision operations for the tick loop.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Backend name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Fused multi-scale detection.
    async fn detect(&self, frame: Arc<Frame>, params: DetectParams) -> VisionResult<DetectionResult>;

    /// Edge-intensity map in frame coordinates.
    async fn edges(&self, frame: Arc<Frame>) -> VisionResult<GrayImage>;

    /// Foreground mask of the largest region (0 or 255).
    async fn segment(&self, frame: Arc<Frame>) -> VisionResult<GrayImage>;
}

/// Run one request to completion. Shared by every backend.
pub fn handle_request(request: &WorkerRequest) -> WorkerResponse {
    let frame = request.frame.as_ref();
    match request.op {
        WorkerOp::Detect => {
            let outcome = MultiScaleDetector::new().detect(frame, &request.params);
            WorkerResponse::ok(request.id, WorkerData::Detection(outcome.result))
        }
        WorkerOp::Edges => {
            let edges = edge_map(&to_gray(frame));
            WorkerResponse::ok(request.id, WorkerData::Image(gray_buffer(edges)))
        }
        WorkerOp::Segment => {
            let gray = to_gray(frame);
            let (width, height) = gray.dimensions();
            let mask = segment_foreground(&gray)
                .and_then(|m| largest_component(&m))
                .map(|region| region.to_mask(width, height))
                .unwrap_or_else(|| GrayImage::new(width, height));
            WorkerResponse::ok(request.id, WorkerData::Image(gray_buffer(mask)))
        }
    }
}

fn gray_buffer(image: GrayImage) -> ImageBuffer {
    ImageBuffer {
        width: image.width(),
        height: image.height(),
        channels: 1,
        data: image.into_raw(),
    }
}

/// Check a response against its request and unpack the payload.
pub fn accept_response(request_id: Uuid, op: WorkerOp, width: u32, height: u32, response: WorkerResponse) -> VisionResult<WorkerData> {
    if response.id != request_id {
        return Err(VisionError::malformed(format!(
            "response id {} does not match request {}",
            response.id, request_id
        )));
    }
    let data = response.outcome.map_err(VisionError::WorkerFailed)?;
    match (op, &data) {
        (WorkerOp::Detect, WorkerData::Detection(_)) => Ok(data),
        (WorkerOp::Edges | WorkerOp::Segment, WorkerData::Image(buffer)) => {
            let channels = op.output_channels().unwrap_or(1);
            buffer
                .validate(width, height, channels)
                .map_err(|e| VisionError::malformed(e.to_string()))?;
            Ok(data)
        }
        _ => Err(VisionError::malformed(format!("unexpected payload for {op}"))),
    }
}

async fn dispatch<F, Fut>(op: WorkerOp, frame: Arc<Frame>, params: DetectParams, send: F) -> VisionResult<WorkerData>
where
    F: FnOnce(WorkerRequest) -> Fut,
    Fut: std::future::Future<Output = VisionResult<WorkerResponse>>,
{
    let request = WorkerRequest::new(op, frame, params);
    let (id, width, height) = (request.id, request.width, request.height);
    let response = send(request).await?;
    accept_response(id, op, width, height, response)
}

fn into_detection(data: WorkerData) -> VisionResult<DetectionResult> {
    match data {
        WorkerData::Detection(result) => Ok(result),
        WorkerData::Image(_) => Err(VisionError::malformed("expected detection payload")),
    }
}

fn into_gray(data: WorkerData) -> VisionResult<GrayImage> {
    match data {
        WorkerData::Image(buffer) => GrayImage::from_raw(buffer.width, buffer.height, buffer.data)
            .ok_or_else(|| VisionError::malformed("image buffer does not match its dimensions")),
        WorkerData::Detection(_) => Err(VisionError::malformed("expected image payload")),
    }
}

/// Runs every operation synchronously on the calling task.
#[derive(Debug, Clone, Default)]
pub struct InlineBackend;

impl InlineBackend {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, op: WorkerOp, frame: Arc<Frame>, params: DetectParams) -> VisionResult<WorkerData> {
        dispatch(op, frame, params, |request| async move {
            catch_unwind(AssertUnwindSafe(|| handle_request(&request)))
                .map_err(|_| VisionError::detection_failed(format!("{} panicked", request.op)))
        })
        .await
    }
}

#[async_trait]
impl VisionBackend for InlineBackend {
    fn name(&self) -> &'static str {
        "inline"
    }

    async fn detect(&self, frame: Arc<Frame>, params: DetectParams) -> VisionResult<DetectionResult> {
        into_detection(self.run(WorkerOp::Detect, frame, params).await?)
    }

    async fn edges(&self, frame: Arc<Frame>) -> VisionResult<GrayImage> {
        into_gray(self.run(WorkerOp::Edges, frame, DetectParams::default()).await?)
    }

    async fn segment(&self, frame: Arc<Frame>) -> VisionResult<GrayImage> {
        into_gray(self.run(WorkerOp::Segment, frame, DetectParams::default()).await?)
    }
}

type Handler = dyn Fn(&WorkerRequest) -> WorkerResponse + Send + Sync + 'static;
type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<WorkerResponse>>>>;

/// Offloads work to a dedicated thread.
///
/// Requests are correlated by id through a pending map; a dispatcher task
/// routes each response to its waiting caller.
pub struct WorkerBackend {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    pending: PendingMap,
}

impl WorkerBackend {
    /// Start the worker thread. Must be called inside a tokio runtime.
    pub fn spawn() -> VisionResult<Self> {
        Self::spawn_with(Arc::new(handle_request))
    }

    /// Start the worker thread with a custom request handler.
    pub fn spawn_with(handler: Arc<Handler>) -> VisionResult<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| VisionError::worker_unavailable(format!("no async runtime: {e}")))?;

        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<WorkerRequest>();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<WorkerResponse>();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        std::thread::Builder::new()
            .name("measure-vision-worker".to_string())
            .spawn(move || {
                while let Some(request) = request_rx.blocking_recv() {
                    let response = catch_unwind(AssertUnwindSafe(|| handler(&request)))
                        .unwrap_or_else(|_| {
                            WorkerResponse::error(request.id, format!("{} panicked", request.op))
                        });
                    if response_tx.send(response).is_err() {
                        break;
                    }
                }
                debug!("Vision worker thread exiting");
            })
            .map_err(|e| VisionError::worker_unavailable(format!("failed to spawn worker thread: {e}")))?;

        let routes = Arc::clone(&pending);
        runtime.spawn(async move {
            while let Some(response) = response_rx.recv().await {
                let waiter = routes.lock().ok().and_then(|mut map| map.remove(&response.id));
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(id = %response.id, "Dropping response with no pending request"),
                }
            }
            // Worker gone: fail everything still waiting.
            if let Ok(mut map) = routes.lock() {
                map.clear();
            }
        });

        info!("Vision worker thread started");
        Ok(Self {
            requests: request_tx,
            pending,
        })
    }

    /// Requests still awaiting a response.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|m| m.len()).unwrap_or(0)
    }

    async fn send(&self, request: WorkerRequest) -> VisionResult<WorkerResponse> {
        let id = request.id;
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| VisionError::internal("pending map poisoned"))?
            .insert(id, tx);

        if self.requests.send(request).is_err() {
            if let Ok(mut map) = self.pending.lock() {
                map.remove(&id);
            }
            return Err(VisionError::worker_unavailable("worker thread has stopped"));
        }
        rx.await
            .map_err(|_| VisionError::worker_unavailable("worker dropped the request"))
    }

    async fn run(&self, op: WorkerOp, frame: Arc<Frame>, params: DetectParams) -> VisionResult<WorkerData> {
        dispatch(op, frame, params, |request| self.send(request)).await
    }
}

#[async_trait]
impl VisionBackend for WorkerBackend {
    fn name(&self) -> &'static str {
        "worker"
    }

    async fn detect(&self, frame: Arc<Frame>, params: DetectParams) -> VisionResult<DetectionResult> {
        into_detection(self.run(WorkerOp::Detect, frame, params).await?)
    }

    async fn edges(&self, frame: Arc<Frame>) -> VisionResult<GrayImage> {
        into_gray(self.run(WorkerOp::Edges, frame, DetectParams::default()).await?)
    }

    async fn segment(&self, frame: Arc<Frame>) -> VisionResult<GrayImage> {
        into_gray(self.run(WorkerOp::Segment, frame, DetectParams::default()).await?)
    }
}

/// Prefers a worker and degrades to inline execution when it is gone.
pub struct FallbackBackend {
    primary: Option<Arc<dyn VisionBackend>>,
    inline: InlineBackend,
}

impl FallbackBackend {
    pub fn new(primary: Option<Arc<dyn VisionBackend>>) -> Self {
        Self {
            primary,
            inline: InlineBackend::new(),
        }
    }

    fn note_fallback(&self, op: WorkerOp, error: &VisionError) {
        warn!(
            op = %op,
            error = %error,
            "Vision worker unavailable, running inline. Performance may be reduced."
        );
        counter!(WORKER_FALLBACK_TOTAL, "op" => op.as_str()).increment(1);
    }
}

#[async_trait]
impl VisionBackend for FallbackBackend {
    fn name(&self) -> &'static str {
        match &self.primary {
            Some(primary) => primary.name(),
            None => self.inline.name(),
        }
    }

    async fn detect(&self, frame: Arc<Frame>, params: DetectParams) -> VisionResult<DetectionResult> {
        if let Some(primary) = &self.primary {
            match primary.detect(Arc::clone(&frame), params.clone()).await {
                Err(e) if e.is_backend_failure() => self.note_fallback(WorkerOp::Detect, &e),
                other => return other,
            }
        }
        self.inline.detect(frame, params).await
    }

    async fn edges(&self, frame: Arc<Frame>) -> VisionResult<GrayImage> {
        if let Some(primary) = &self.primary {
            match primary.edges(Arc::clone(&frame)).await {
                Err(e) if e.is_backend_failure() => self.note_fallback(WorkerOp::Edges, &e),
                other => return other,
            }
        }
        self.inline.edges(frame).await
    }

    async fn segment(&self, frame: Arc<Frame>) -> VisionResult<GrayImage> {
        if let Some(primary) = &self.primary {
            match primary.segment(Arc::clone(&frame)).await {
                Err(e) if e.is_backend_failure() => self.note_fallback(WorkerOp::Segment, &e),
                other => return other,
            }
        }
        self.inline.segment(frame).await
    }
}

/// Chooses the backend for a pipeline instance.
pub struct BackendSelector;

impl BackendSelector {
    /// Worker thread when it can be started, inline otherwise.
    pub fn select(prefer_worker: bool) -> Arc<dyn VisionBackend> {
        if !prefer_worker {
            info!("Using inline vision backend");
            return Arc::new(InlineBackend::new());
        }
        match WorkerBackend::spawn() {
            Ok(worker) => Arc::new(FallbackBackend::new(Some(Arc::new(worker)))),
            Err(e) => {
                warn!(
                    error = %e,
                    "Using inline vision backend (worker not available). Performance may be reduced."
                );
                Arc::new(FallbackBackend::new(None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_frame() -> Arc<Frame> {
        let mut frame = Frame::filled(96, 64, [30, 30, 30, 255], 0.0).unwrap();
        for y in 26..38 {
            for x in 16..80 {
                frame.set_pixel(x, y, [220, 220, 220, 255]);
            }
        }
        Arc::new(frame)
    }

    struct DeadBackend;

    #[async_trait]
    impl VisionBackend for DeadBackend {
        fn name(&self) -> &'static str {
            "dead"
        }

        async fn detect(&self, _frame: Arc<Frame>, _params: DetectParams) -> VisionResult<DetectionResult> {
            Err(VisionError::worker_unavailable("gone"))
        }

        async fn edges(&self, _frame: Arc<Frame>) -> VisionResult<GrayImage> {
            Err(VisionError::worker_unavailable("gone"))
        }

        async fn segment(&self, _frame: Arc<Frame>) -> VisionResult<GrayImage> {
            Err(VisionError::worker_unavailable("gone"))
        }
    }

    #[tokio::test]
    async fn test_worker_matches_inline() {
        let worker = WorkerBackend::spawn().unwrap();
        let inline = InlineBackend::new();
        let frame = bar_frame();

        let from_worker = worker.detect(Arc::clone(&frame), DetectParams::default()).await.unwrap();
        let from_inline = inline.detect(Arc::clone(&frame), DetectParams::default()).await.unwrap();
        assert!(from_worker.is_found());
        assert_eq!(from_worker, from_inline);

        let edges = worker.edges(Arc::clone(&frame)).await.unwrap();
        assert_eq!(edges.dimensions(), (96, 64));
        assert_eq!(worker.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_segment_returns_subject_mask() {
        let mask = InlineBackend::new().segment(bar_frame()).await.unwrap();
        assert_eq!(mask.get_pixel(40, 30)[0], 255);
        assert_eq!(mask.get_pixel(2, 2)[0], 0);
    }

    #[tokio::test]
    async fn test_short_buffer_is_rejected() {
        let handler: Arc<Handler> = Arc::new(|request: &WorkerRequest| {
            WorkerResponse::ok(
                request.id,
                WorkerData::Image(ImageBuffer {
                    width: request.width,
                    height: request.height,
                    channels: 1,
                    data: vec![0; 10],
                }),
            )
        });
        let worker = WorkerBackend::spawn_with(handler).unwrap();
        let err = worker.edges(bar_frame()).await.unwrap_err();
        assert!(matches!(err, VisionError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_worker_error_is_reported() {
        let handler: Arc<Handler> =
            Arc::new(|request: &WorkerRequest| WorkerResponse::error(request.id, "boom"));
        let worker = WorkerBackend::spawn_with(handler).unwrap();
        let result = worker.detect(bar_frame(), DetectParams::default()).await;
        tokio_test::assert_err!(&result);
        assert!(matches!(result, Err(VisionError::WorkerFailed(_))));
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_kill_worker() {
        let handler: Arc<Handler> = Arc::new(|request: &WorkerRequest| {
            if request.op == WorkerOp::Detect {
                panic!("detector exploded");
            }
            handle_request(request)
        });
        let worker = WorkerBackend::spawn_with(handler).unwrap();
        assert!(worker.detect(bar_frame(), DetectParams::default()).await.is_err());
        tokio_test::assert_ok!(worker.edges(bar_frame()).await);
    }

    #[tokio::test]
    async fn test_fallback_runs_inline_when_worker_gone() {
        let backend = FallbackBackend::new(Some(Arc::new(DeadBackend)));
        let result = backend.detect(bar_frame(), DetectParams::default()).await.unwrap();
        assert!(result.is_found());
        assert!(backend.edges(bar_frame()).await.is_ok());
    }

    #[test]
    fn test_mismatched_response_id_rejected() {
        let response = WorkerResponse::ok(Uuid::new_v4(), WorkerData::Detection(DetectionResult::NotFound));
        let result = accept_response(Uuid::new_v4(), WorkerOp::Detect, 4, 4, response);
        assert!(matches!(result, Err(VisionError::MalformedResponse(_))));
    }
}
