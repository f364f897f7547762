//! External control of a running pipeline.
//!
//! The tick loop owns all pipeline state. Everything here is either a
//! flag the loop reads at tick boundaries or a config snapshot published
//! through a watch channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use measure_models::PipelineConfig;
use tokio::sync::watch;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};

/// Flags shared between the tick loop and its handles.
#[derive(Debug)]
pub(crate) struct ControlState {
    source_available: AtomicBool,
    /// Bumped whenever in-flight results must be thrown away.
    generation: AtomicU64,
    busy: AtomicBool,
    reset_requested: AtomicBool,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            source_available: AtomicBool::new(true),
            generation: AtomicU64::new(0),
            busy: AtomicBool::new(false),
            reset_requested: AtomicBool::new(false),
        }
    }
}

impl ControlState {
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn source_available(&self) -> bool {
        self.source_available.load(Ordering::SeqCst)
    }

    /// Returns true if availability changed.
    pub(crate) fn set_source_available(&self, available: bool) -> bool {
        let previous = self.source_available.swap(available, Ordering::SeqCst);
        if previous && !available {
            self.invalidate();
        }
        previous != available
    }

    /// Mark a tick in flight until the guard drops. Ticks take the pipeline
    /// by `&mut`, so only one guard is ever live.
    pub(crate) fn begin(self: &Arc<Self>) -> BusyGuard {
        self.busy.store(true, Ordering::SeqCst);
        BusyGuard(Arc::clone(self))
    }

    pub(crate) fn take_reset(&self) -> bool {
        self.reset_requested.swap(false, Ordering::SeqCst)
    }
}

/// Clears the busy flag when the tick finishes or is dropped mid-await.
pub(crate) struct BusyGuard(Arc<ControlState>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::SeqCst);
    }
}

/// Cloneable handle for reconfiguring, pausing and stopping a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    config: Arc<watch::Sender<PipelineConfig>>,
    control: Arc<ControlState>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl PipelineHandle {
    pub(crate) fn new(config: watch::Sender<PipelineConfig>, control: Arc<ControlState>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            control,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> PipelineConfig {
        self.config.borrow().clone()
    }

    /// Replace the configuration; applies from the next tick.
    pub fn update_config(&self, config: PipelineConfig) -> PipelineResult<()> {
        config
            .validate()
            .map_err(|e| PipelineError::config_error(e.to_string()))?;
        let disabling = self.config.borrow().auto_detect && !config.auto_detect;
        self.config.send_replace(config);
        if disabling {
            self.control.invalidate();
        }
        Ok(())
    }

    /// Enable or disable auto-detection. Disabling discards a tick in flight.
    pub fn set_auto_detect(&self, enabled: bool) {
        let mut changed = false;
        self.config.send_modify(|config| {
            changed = config.auto_detect != enabled;
            config.auto_detect = enabled;
        });
        if changed {
            info!(enabled, "Auto-detect toggled");
            if !enabled {
                self.control.invalidate();
            }
        }
    }

    /// Mark the frame source as (un)available. Going unavailable discards
    /// a tick in flight.
    pub fn set_source_available(&self, available: bool) {
        if self.control.set_source_available(available) {
            info!(available, "Frame source availability changed");
        }
    }

    pub fn source_available(&self) -> bool {
        self.control.source_available()
    }

    /// Clear history, caches and stats before the next tick.
    pub fn request_reset(&self) {
        self.control.reset_requested.store(true, Ordering::SeqCst);
        self.control.invalidate();
    }

    /// Whether a tick is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.control.busy.load(Ordering::SeqCst)
    }

    /// Ask the runner to stop after the current tick.
    pub fn stop(&self) {
        self.control.invalidate();
        self.shutdown.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
