//! Cooperative tick loop.
//!
//! One task polls the frame source and ticks the pipeline at
//! `detection_interval_ms`, measured from tick start. A slow tick delays
//! the next one instead of overlapping it.

use std::time::Duration;

use measure_models::PipelineEvent;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tracing::{debug, Instrument};

use crate::logging::{SessionLogger, StopReason};
use crate::metrics;
use crate::pipeline::{AutomationStats, Pipeline};
use crate::source::{FrameSource, SourcePoll};

/// Drives a [`Pipeline`] from a [`FrameSource`] and publishes its events.
pub struct PipelineRunner<S: FrameSource> {
    pipeline: Pipeline,
    source: S,
    events: mpsc::Sender<PipelineEvent>,
    max_duration: Option<Duration>,
}

impl<S: FrameSource> PipelineRunner<S> {
    pub fn new(pipeline: Pipeline, source: S, events: mpsc::Sender<PipelineEvent>) -> Self {
        Self {
            pipeline,
            source,
            events,
            max_duration: None,
        }
    }

    /// Stop on its own once this much pipeline time has elapsed.
    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    /// Run until the source ends, the time limit passes, or the handle
    /// asks to stop. Returns the session counters.
    pub async fn run(self) -> AutomationStats {
        let logger = SessionLogger::new(self.source.name());
        let span = logger.create_span();
        self.run_session(logger).instrument(span).await
    }

    async fn run_session(mut self, mut logger: SessionLogger) -> AutomationStats {
        let handle = self.pipeline.handle();
        let mut shutdown = handle.subscribe_shutdown();
        let config = handle.config();
        let mut interval_ms = config.detection_interval_ms;
        let mut ticker = ticker(interval_ms);
        let start = Instant::now();
        let mut source_down = false;

        logger.log_start(&config);

        let reason = loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break StopReason::Requested;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let elapsed = start.elapsed();
            if self.max_duration.map_or(false, |max| elapsed > max) {
                break StopReason::TimeLimit;
            }
            let now = elapsed.as_secs_f64();

            let config = handle.config();
            if config.detection_interval_ms != interval_ms {
                logger.log_interval_change(interval_ms, config.detection_interval_ms);
                interval_ms = config.detection_interval_ms;
                ticker = ticker_from(interval_ms, Instant::now());
            }

            match self.source.poll(now).await {
                SourcePoll::Frame(frame) => {
                    if source_down {
                        source_down = false;
                        handle.set_source_available(true);
                        logger.log_source_resumed(now);
                        self.publish(&mut logger, PipelineEvent::SourceResumed { timestamp: now })
                            .await;
                    }
                    if !config.auto_detect {
                        let events = self.pipeline.pause(now);
                        self.publish_all(&mut logger, events).await;
                        continue;
                    }
                    let report = self.pipeline.tick(frame, now).await;
                    self.publish_all(&mut logger, report.events).await;
                }
                SourcePoll::Unavailable => {
                    if !source_down {
                        source_down = true;
                        handle.set_source_available(false);
                        metrics::record_source_unavailable(self.source.name());
                        logger.log_source_lost(now, self.pipeline.capture_state());
                        self.publish(&mut logger, PipelineEvent::SourceUnavailable { timestamp: now })
                            .await;
                        let events = self.pipeline.pause(now);
                        self.publish_all(&mut logger, events).await;
                    }
                }
                SourcePoll::Ended => break StopReason::SourceEnded,
            }
        };

        logger.log_stopped(reason, start.elapsed().as_secs_f64());
        let stats = self.pipeline.stats().clone();
        logger.log_completion(&stats, self.pipeline.capture_state());
        stats
    }

    async fn publish_all(&self, logger: &mut SessionLogger, events: Vec<PipelineEvent>) {
        for event in events {
            self.publish(logger, event).await;
        }
    }

    async fn publish(&self, logger: &mut SessionLogger, event: PipelineEvent) {
        logger.observe(&event);
        let kind = event.kind();
        if self.events.send(event).await.is_err() {
            debug!(kind, "Event receiver dropped");
        }
    }
}

fn ticker(interval_ms: u64) -> Interval {
    let mut ticker = interval(Duration::from_millis(interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Restart the cadence so the next tick lands one interval after `start`.
fn ticker_from(interval_ms: u64, start: Instant) -> Interval {
    let period = Duration::from_millis(interval_ms.max(1));
    let mut ticker = tokio::time::interval_at(start + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
