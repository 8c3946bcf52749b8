//! A scripted key source for tests and demos
//!
//! Events carry their own timestamps; the replay clock only moves forward
//! by the poll timeout or up to the next due event, so runs are fully
//! deterministic.

use super::remap::ScancodeRemapper;
use super::source::{KeySource, SourceStatus};
use super::RawKeyEvent;
use crate::error::{InputError, InputResult};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

/// Replays a fixed list of raw events
#[derive(Debug, Default)]
pub struct ReplaySource {
    queue: VecDeque<RawKeyEvent>,
    now: Duration,
    grabbed: bool,
    /// Grab attempts that still fail with a conflict
    conflicts_left: u32,
    grab_attempts: u32,
    releases: u32,
    disconnect_when_empty: bool,
    remapper: ScancodeRemapper,
}

impl ReplaySource {
    /// Events are replayed in timestamp order
    pub fn new(mut events: Vec<RawKeyEvent>) -> Self {
        events.sort_by_key(|event| event.timestamp);
        Self {
            queue: events.into(),
            ..Default::default()
        }
    }

    /// Fail the first `n` grab attempts as if another process held the device
    pub fn with_grab_conflicts(mut self, n: u32) -> Self {
        self.conflicts_left = n;
        self
    }

    /// Report a disconnect once every event has been delivered
    pub fn disconnect_when_empty(mut self) -> Self {
        self.disconnect_when_empty = true;
        self
    }

    /// Queue another event, keeping timestamp order
    pub fn push(&mut self, event: RawKeyEvent) {
        let at = self
            .queue
            .partition_point(|queued| queued.timestamp <= event.timestamp);
        self.queue.insert(at, event);
    }

    /// Move the clock forward; it never goes back
    pub fn advance_to(&mut self, now: Duration) {
        self.now = self.now.max(now);
    }

    pub fn grab_attempts(&self) -> u32 {
        self.grab_attempts
    }

    /// How often the grab was given up
    pub fn releases(&self) -> u32 {
        self.releases
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl KeySource for ReplaySource {
    fn describe(&self) -> String {
        format!("replay ({} events queued)", self.queue.len())
    }

    fn now(&self) -> Duration {
        self.now
    }

    fn poll_events(
        &mut self,
        timeout: Duration,
        out: &mut Vec<RawKeyEvent>,
    ) -> InputResult<SourceStatus> {
        let Some(next) = self.queue.front().map(|event| event.timestamp) else {
            if self.disconnect_when_empty {
                return Ok(SourceStatus::Disconnected);
            }
            self.now += timeout;
            return Ok(SourceStatus::Open);
        };

        if next > self.now + timeout {
            self.now += timeout;
            return Ok(SourceStatus::Open);
        }

        self.now = self.now.max(next);
        while let Some(event) = self.queue.front() {
            if event.timestamp > self.now {
                break;
            }
            if let Some(mut event) = self.queue.pop_front() {
                self.remapper.apply(&mut event);
                out.push(event);
            }
        }
        Ok(SourceStatus::Open)
    }

    fn grab(&mut self) -> InputResult<()> {
        if self.grabbed {
            return Ok(());
        }
        self.grab_attempts += 1;
        if self.conflicts_left > 0 {
            self.conflicts_left -= 1;
            return Err(InputError::GrabConflict {
                path: PathBuf::from("replay"),
            });
        }
        self.grabbed = true;
        Ok(())
    }

    fn release(&mut self) {
        if self.grabbed {
            self.grabbed = false;
            self.releases += 1;
        }
    }

    fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    fn drain_pending(&mut self) -> usize {
        let due = self.queue.partition_point(|event| event.timestamp <= self.now);
        self.queue.drain(..due).count()
    }

    fn set_remapper(&mut self, remapper: ScancodeRemapper) {
        self.remapper = remapper;
    }
}
