//! Frame analysis for the measurement pipeline.
//!
//! This crate provides:
//! - Multi-scale subject detection with a straight-line fallback
//! - Advisory quality and environment scoring
//! - A temporal edge cache for snap-to-edge correction
//! - Vision backends: a worker thread with inline fallback

pub mod backend;
pub mod detector;
pub mod edge_cache;
pub mod error;
pub mod imageops;
pub mod lines;
pub mod quality;
pub mod region;
pub mod segment;

pub use backend::{BackendSelector, FallbackBackend, InlineBackend, VisionBackend, WorkerBackend};
pub use detector::{scale_penalty, CandidateSource, DetectionOutcome, MultiScaleDetector, ScoredCandidate};
pub use edge_cache::{EdgeCache, EDGE_CACHE_CAPACITY, SNAP_THRESHOLD};
pub use error::{VisionError, VisionResult};
pub use quality::{analyze_quality, quality_score, with_detection_confidence, FrameHistory};
