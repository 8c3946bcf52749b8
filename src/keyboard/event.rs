//! Raw key events and the monotonic clock that stamps them

use super::KeyCode;
use std::time::{Duration, Instant};

/// A raw key edge as read from a device, after calibration remapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawKeyEvent {
    /// Logical key code
    pub keycode: KeyCode,
    /// Press (true) or release (false)
    pub is_down: bool,
    /// Kernel autorepeat of a key that is already down
    pub repeat: bool,
    /// Monotonic time since the source's clock origin
    pub timestamp: Duration,
    /// Hardware scancode, or the key code when the device reports none
    pub scancode: u32,
}

impl RawKeyEvent {
    pub fn new(keycode: KeyCode, is_down: bool, timestamp: Duration) -> Self {
        Self {
            keycode,
            is_down,
            repeat: false,
            timestamp,
            scancode: keycode.as_u16() as u32,
        }
    }

    /// Key press at `timestamp`
    pub fn down(keycode: KeyCode, timestamp: Duration) -> Self {
        Self::new(keycode, true, timestamp)
    }

    /// Key release at `timestamp`
    pub fn up(keycode: KeyCode, timestamp: Duration) -> Self {
        Self::new(keycode, false, timestamp)
    }

    /// Autorepeat while held
    pub fn repeat(keycode: KeyCode, timestamp: Duration) -> Self {
        Self {
            repeat: true,
            ..Self::new(keycode, true, timestamp)
        }
    }

    pub fn with_scancode(mut self, scancode: u32) -> Self {
        self.scancode = scancode;
        self
    }
}

/// Monotonic clock shared by a source and its idle ticks
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Time elapsed since the clock was created
    pub fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
