//! Frame sources driving the tick loop.

use std::sync::Arc;

use async_trait::async_trait;
use measure_models::Frame;

/// What a source produced when polled.
#[derive(Debug, Clone)]
pub enum SourcePoll {
    /// Most recent frame; may repeat the previous one.
    Frame(Arc<Frame>),
    /// Temporarily not delivering (camera paused, stream stalled).
    Unavailable,
    /// No more frames will arrive.
    Ended,
}

/// Supplies frames at a cadence the source controls.
///
/// The tick loop polls once per tick and works on whatever is latest.
#[async_trait]
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    /// Poll at pipeline time `now` (seconds since start).
    async fn poll(&mut self, now: f64) -> SourcePoll;
}

/// A single still image, repeated forever.
#[derive(Debug, Clone)]
pub struct StaticFrameSource {
    frame: Arc<Frame>,
}

impl StaticFrameSource {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame: Arc::new(frame),
        }
    }
}

#[async_trait]
impl FrameSource for StaticFrameSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn poll(&mut self, _now: f64) -> SourcePoll {
        SourcePoll::Frame(Arc::clone(&self.frame))
    }
}

/// Slack, in slots, so a poll landing on a boundary gets the later slot.
const SLOT_EPSILON: f64 = 1e-9;

/// Prerecorded frames released one per `interval` seconds.
///
/// Frame `i` becomes current at `i * interval` and stays current until
/// the next one arrives; after the last frame's slot the source ends.
#[derive(Debug, Clone)]
pub struct ReplayFrameSource {
    frames: Vec<Arc<Frame>>,
    interval: f64,
}

impl ReplayFrameSource {
    pub fn new(frames: Vec<Frame>, interval: f64) -> Self {
        Self {
            frames: frames.into_iter().map(Arc::new).collect(),
            interval: interval.max(f64::EPSILON),
        }
    }

    /// The same frame `count` times, restamped per slot.
    pub fn repeated(frame: &Frame, count: usize, interval: f64) -> Self {
        let frames = (0..count)
            .map(|i| frame.with_timestamp(i as f64 * interval))
            .collect();
        Self::new(frames, interval)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Time after which the source reports `Ended`.
    pub fn duration(&self) -> f64 {
        self.frames.len() as f64 * self.interval
    }
}

#[async_trait]
impl FrameSource for ReplayFrameSource {
    fn name(&self) -> &str {
        "replay"
    }

    async fn poll(&mut self, now: f64) -> SourcePoll {
        if now < 0.0 {
            return SourcePoll::Unavailable;
        }
        let index = (now / self.interval + SLOT_EPSILON).floor() as usize;
        match self.frames.get(index) {
            Some(frame) => SourcePoll::Frame(Arc::clone(frame)),
            None => SourcePoll::Ended,
        }
    }
}
