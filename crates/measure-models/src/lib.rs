//! Shared data models for the measurement pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Frames and overlay points
//! - Detection candidates and fused detection results
//! - Quality and environment scores
//! - Measurement samples and capture states
//! - Pipeline configuration and consumer-facing events
//! - The vision worker request/response protocol

pub mod capture_state;
pub mod config;
pub mod detection;
pub mod error;
pub mod event;
pub mod frame;
pub mod measurement;
pub mod quality;
pub mod worker;

// Re-export common types
pub use capture_state::{CaptureState, CaptureStateParseError};
pub use config::{DetectParams, PipelineConfig};
pub use detection::{clamp_confidence, DetectionCandidate, DetectionResult};
pub use error::{ModelError, ModelResult};
pub use event::PipelineEvent;
pub use frame::{Frame, Point};
pub use measurement::MeasurementSample;
pub use quality::{EnvironmentalFactors, QualityMetrics, QualityReport, Suggestion};
pub use worker::{ImageBuffer, WorkerData, WorkerOp, WorkerRequest, WorkerResponse};
