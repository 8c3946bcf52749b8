//! The cooperative read loop tying a key source to the state machine
//!
//! Each readiness wait is bounded by the idle tick, so the stop flag is
//! checked and the gesture clock advances even when no key is touched.
//! Events are processed inline; actions reach the sink in event order.

use super::action::ActionSink;
use super::remap::ScancodeRemapper;
use super::source::{grab_with_retry, GrabRetry, KeySource, SourceStatus};
use super::suspend::SuspendGuard;
use super::{KeyboardStateMachine, RawKeyEvent};
use crate::calibration::CalibrationMap;
use crate::error::InputResult;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shareable stop flag, safe to flip from a signal handler
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one [`InputPipeline::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// The stop flag was set
    Stopped,
    /// The source reached end of stream
    Disconnected,
}

/// Owns a key source and the state machine fed by it
pub struct InputPipeline {
    source: Box<dyn KeySource>,
    machine: KeyboardStateMachine,
    stop: StopHandle,
    idle_tick: Duration,
    retry: GrabRetry,
    buffer: Vec<RawKeyEvent>,
}

impl InputPipeline {
    pub fn new(source: Box<dyn KeySource>, machine: KeyboardStateMachine) -> Self {
        Self {
            source,
            machine,
            stop: StopHandle::new(),
            idle_tick: Duration::from_millis(50),
            retry: GrabRetry::default(),
            buffer: Vec::new(),
        }
    }

    /// Share an existing stop flag, e.g. one already wired to Ctrl+C
    pub fn with_stop(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_idle_tick(mut self, idle_tick: Duration) -> Self {
        self.idle_tick = idle_tick.max(Duration::from_millis(1));
        self
    }

    pub fn with_grab_retry(mut self, retry: GrabRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn machine(&self) -> &KeyboardStateMachine {
        &self.machine
    }

    pub fn source(&self) -> &dyn KeySource {
        self.source.as_ref()
    }

    /// Log the source and take the grab when `grab` is set
    pub fn start(&mut self, grab: bool) -> InputResult<()> {
        info!("reading keys from {}", self.source.describe());
        if self.source.is_degraded() {
            warn!("terminal fallback active: sticky-shift and long-press timing are approximate");
        }
        if grab {
            grab_with_retry(self.source.as_mut(), self.retry)?;
        }
        Ok(())
    }

    /// Wait once for input and dispatch every resulting action to `sink`
    pub fn step(&mut self, sink: &mut dyn ActionSink) -> InputResult<StepOutcome> {
        if self.stop.is_stopped() {
            return Ok(StepOutcome::Stopped);
        }

        self.buffer.clear();
        let status = self.source.poll_events(self.idle_tick, &mut self.buffer)?;

        for event in &self.buffer {
            for action in self.machine.process(event) {
                sink.handle_action(&action);
            }
        }
        for action in self.machine.tick(self.source.now()) {
            sink.handle_action(&action);
        }

        match status {
            SourceStatus::Open => Ok(StepOutcome::Continue),
            SourceStatus::Disconnected => {
                info!("{} reached end of stream", self.source.describe());
                Ok(StepOutcome::Disconnected)
            }
        }
    }

    /// Step until stopped or disconnected
    pub fn run(&mut self, sink: &mut dyn ActionSink) -> InputResult<StepOutcome> {
        loop {
            match self.step(sink)? {
                StepOutcome::Continue => {}
                outcome => return Ok(outcome),
            }
        }
    }

    /// Hand the keyboard back to the system until the guard is resumed or dropped
    pub fn suspend(&mut self) -> SuspendGuard<'_> {
        SuspendGuard::suspend(self.source.as_mut(), &mut self.machine, self.retry)
    }

    /// Swap in a new calibration for events read from now on
    pub fn set_calibration(&mut self, map: &CalibrationMap) {
        let remapper = ScancodeRemapper::from_calibration(map);
        debug!("applying calibration with {} mapped keys", remapper.len());
        self.source.set_remapper(remapper);
    }

    /// Release the grab; the pipeline may be started again
    pub fn shutdown(&mut self) {
        self.source.release();
        self.machine.reset();
    }
}

impl Drop for InputPipeline {
    fn drop(&mut self) {
        self.source.release();
    }
}
