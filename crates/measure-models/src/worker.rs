//! Request/response protocol for offloaded vision work.
//!
//! Requests carry a shared handle to their frame, so the pixel buffer moves
//! to the worker and results move back without copying.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::DetectParams;
use crate::detection::DetectionResult;
use crate::error::{ModelError, ModelResult};
use crate::frame::Frame;

/// Operation requested from a vision worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkerOp {
    Detect,
    Edges,
    Segment,
}

impl WorkerOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerOp::Detect => "detect",
            WorkerOp::Edges => "edges",
            WorkerOp::Segment => "segment",
        }
    }

    /// Channels in the image buffer returned for this op, if any.
    pub fn output_channels(&self) -> Option<u8> {
        match self {
            WorkerOp::Detect => None,
            WorkerOp::Edges | WorkerOp::Segment => Some(1),
        }
    }
}

impl fmt::Display for WorkerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A request keyed by id.
#[derive(Debug)]
pub struct WorkerRequest {
    pub id: Uuid,
    pub op: WorkerOp,
    pub width: u32,
    pub height: u32,
    pub frame: Arc<Frame>,
    pub params: DetectParams,
}

impl WorkerRequest {
    pub fn new(op: WorkerOp, frame: Arc<Frame>, params: DetectParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            op,
            width: frame.width(),
            height: frame.height(),
            frame,
            params,
        }
    }
}

/// Raw image payload returned by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<u8>,
}

impl ImageBuffer {
    /// Check the buffer against the requested shape.
    pub fn validate(&self, width: u32, height: u32, channels: u8) -> ModelResult<()> {
        if self.width != width || self.height != height {
            return Err(ModelError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        let expected = width as usize * height as usize * channels as usize;
        if self.channels != channels || self.data.len() != expected {
            return Err(ModelError::BufferSizeMismatch {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

/// Successful worker payload.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerData {
    Detection(DetectionResult),
    Image(ImageBuffer),
}

/// Response correlated to a request by id.
#[derive(Debug)]
pub struct WorkerResponse {
    pub id: Uuid,
    pub outcome: Result<WorkerData, String>,
}

impl WorkerResponse {
    pub fn ok(id: Uuid, data: WorkerData) -> Self {
        Self {
            id,
            outcome: Ok(data),
        }
    }

    pub fn error(id: Uuid, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Err(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}
