//! Stability-gated measurement pipeline.
//!
//! This crate provides:
//! - Temporal smoothing and the time-windowed stability tracker
//! - The capture state machine with cooldown
//! - The advisory prediction/correction layer
//! - The per-tick pipeline and the cooperative runner loop
//! - Metrics and structured session logging

pub mod advisor;
pub mod calibration;
pub mod capture;
pub mod control;
pub mod error;
pub mod history;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod runner;
pub mod source;
pub mod stabilizer;
pub mod stats;

pub use advisor::{Advice, Advisor};
pub use calibration::{CalibrationSource, FixedCalibration, SharedCalibration};
pub use capture::{CaptureController, Evaluation};
pub use control::PipelineHandle;
pub use error::{PipelineError, PipelineResult};
pub use history::{OutlierFlag, OutlierSeverity, StabilityCriteria, StabilityWindow};
pub use logging::{init_tracing, SessionLogger, StopReason};
pub use pipeline::{AutomationStats, Pipeline, PipelineState, TickOutcome, TickReport};
pub use runner::PipelineRunner;
pub use source::{FrameSource, ReplayFrameSource, SourcePoll, StaticFrameSource};
pub use stabilizer::{InputMode, Stabilizer};
