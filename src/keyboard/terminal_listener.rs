//! Terminal fallback listener
//!
//! Used when raw device access is unavailable. Terminals only report key
//! presses, so releases are synthesized a short delay after the last press
//! or repeat of a key. Held-key gestures are approximate in this mode and
//! [`KeySource::is_degraded`] returns `true`.
//!
//! Raw mode stands in for the grab: while it is enabled the terminal stops
//! echoing and line editing.

use super::keymap::lookup_char;
use super::remap::ScancodeRemapper;
use super::source::{KeySource, SourceStatus};
use super::{KeyCode, MonotonicClock, RawKeyEvent};
use crate::error::InputResult;
use crossterm::event::{self, Event, KeyCode as CtKeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use log::{debug, warn};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct PendingRelease {
    key: KeyCode,
    deadline: Duration,
    shifted: bool,
}

/// Reads key presses from the controlling terminal via crossterm
#[derive(Debug)]
pub struct TerminalListener {
    clock: MonotonicClock,
    release_delay: Duration,
    pending: Vec<PendingRelease>,
    /// Pending keys that were typed with shift
    shift_holds: u32,
    raw_mode: bool,
    remapper: ScancodeRemapper,
}

impl TerminalListener {
    pub fn new(release_delay: Duration) -> Self {
        Self {
            clock: MonotonicClock::new(),
            release_delay,
            pending: Vec::new(),
            shift_holds: 0,
            raw_mode: false,
            remapper: ScancodeRemapper::identity(),
        }
    }

    pub fn release_delay(&self) -> Duration {
        self.release_delay
    }

    /// Keys whose synthetic release has not fired yet
    pub fn pending_keys(&self) -> Vec<KeyCode> {
        self.pending.iter().map(|p| p.key).collect()
    }

    fn emit(&self, mut event: RawKeyEvent, out: &mut Vec<RawKeyEvent>) {
        self.remapper.apply(&mut event);
        out.push(event);
    }

    /// Record a press (or terminal autorepeat) of `key` at `now`.
    ///
    /// Releases already due are emitted first so timestamps never go back,
    /// and a synthetic shift still held for earlier keys is released before
    /// an unshifted key goes down.
    fn on_press(&mut self, key: KeyCode, shifted: bool, now: Duration, out: &mut Vec<RawKeyEvent>) {
        self.release_due(now, out);
        let deadline = now + self.release_delay;
        if let Some(pending) = self.pending.iter_mut().find(|p| p.key == key) {
            pending.deadline = deadline;
            let repeat = RawKeyEvent::repeat(key, now);
            self.emit(repeat, out);
            return;
        }

        if !shifted && self.shift_holds > 0 {
            self.emit(RawKeyEvent::up(KeyCode::LEFT_SHIFT, now), out);
            self.shift_holds = 0;
            for pending in &mut self.pending {
                pending.shifted = false;
            }
        }

        if shifted {
            if self.shift_holds == 0 {
                self.emit(RawKeyEvent::down(KeyCode::LEFT_SHIFT, now), out);
            }
            self.shift_holds += 1;
        }
        self.emit(RawKeyEvent::down(key, now), out);
        self.pending.push(PendingRelease {
            key,
            deadline,
            shifted,
        });
    }

    /// Emit releases whose deadline has passed, in deadline order
    fn release_due(&mut self, now: Duration, out: &mut Vec<RawKeyEvent>) {
        self.pending.sort_by_key(|p| p.deadline);
        let due = self.pending.partition_point(|p| p.deadline <= now);
        let released: Vec<PendingRelease> = self.pending.drain(..due).collect();
        for pending in released {
            self.emit(RawKeyEvent::up(pending.key, pending.deadline), out);
            if pending.shifted {
                self.shift_holds = self.shift_holds.saturating_sub(1);
                if self.shift_holds == 0 {
                    self.emit(RawKeyEvent::up(KeyCode::LEFT_SHIFT, pending.deadline), out);
                }
            }
        }
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.pending.iter().map(|p| p.deadline).min()
    }

    /// Handle one terminal event. Returns `false` on Ctrl+C.
    fn on_terminal_event(&mut self, ev: Event, out: &mut Vec<RawKeyEvent>) -> bool {
        let Event::Key(key) = ev else {
            return true;
        };
        if key.kind == KeyEventKind::Release {
            return true;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == CtKeyCode::Char('c') {
            return false;
        }
        let now = self.clock.now();
        match map_terminal_key(key.code) {
            Some((code, shifted)) => {
                let shifted =
                    shifted || (key.modifiers.contains(KeyModifiers::SHIFT) && !code.is_shift());
                self.on_press(code, shifted, now, out);
            }
            None => debug!("ignoring terminal key {:?}", key.code),
        }
        true
    }
}

/// Map a terminal key to a key code and whether it implies shift
pub fn map_terminal_key(code: CtKeyCode) -> Option<(KeyCode, bool)> {
    let mapped = match code {
        CtKeyCode::Char(c) => return lookup_char(c),
        CtKeyCode::Enter => KeyCode::ENTER,
        CtKeyCode::Backspace => KeyCode::BACKSPACE,
        CtKeyCode::Tab => KeyCode::TAB,
        CtKeyCode::BackTab => return Some((KeyCode::TAB, true)),
        CtKeyCode::Esc => KeyCode::ESCAPE,
        CtKeyCode::Delete => KeyCode(111),
        CtKeyCode::Home => KeyCode(102),
        CtKeyCode::End => KeyCode(107),
        CtKeyCode::PageUp => KeyCode(104),
        CtKeyCode::PageDown => KeyCode(109),
        CtKeyCode::Up => KeyCode::UP,
        CtKeyCode::Down => KeyCode::DOWN,
        CtKeyCode::Left => KeyCode::LEFT,
        CtKeyCode::Right => KeyCode::RIGHT,
        CtKeyCode::F(n) => KeyCode::function(n)?,
        _ => return None,
    };
    Some((mapped, false))
}

impl KeySource for TerminalListener {
    fn describe(&self) -> String {
        format!(
            "terminal fallback (synthetic release after {:?})",
            self.release_delay
        )
    }

    fn now(&self) -> Duration {
        self.clock.now()
    }

    fn poll_events(
        &mut self,
        timeout: Duration,
        out: &mut Vec<RawKeyEvent>,
    ) -> InputResult<SourceStatus> {
        let now = self.clock.now();
        self.release_due(now, out);

        let wait = match self.next_deadline() {
            Some(deadline) => timeout.min(deadline.saturating_sub(now)),
            None => timeout,
        };

        if event::poll(wait)? {
            loop {
                let ev = event::read()?;
                if !self.on_terminal_event(ev, out) {
                    return Ok(SourceStatus::Disconnected);
                }
                if !event::poll(Duration::ZERO)? {
                    break;
                }
            }
        }

        self.release_due(self.clock.now(), out);
        Ok(SourceStatus::Open)
    }

    fn grab(&mut self) -> InputResult<()> {
        if !self.raw_mode {
            enable_raw_mode()?;
            self.raw_mode = true;
        }
        Ok(())
    }

    fn release(&mut self) {
        if self.raw_mode {
            if let Err(e) = disable_raw_mode() {
                warn!("failed to leave raw mode: {e}");
            }
            self.raw_mode = false;
        }
    }

    fn is_grabbed(&self) -> bool {
        self.raw_mode
    }

    fn drain_pending(&mut self) -> usize {
        let mut drained = self.pending.len();
        self.pending.clear();
        self.shift_holds = 0;
        while matches!(event::poll(Duration::ZERO), Ok(true)) {
            match event::read() {
                Ok(_) => drained += 1,
                Err(_) => break,
            }
        }
        drained
    }

    fn set_remapper(&mut self, remapper: ScancodeRemapper) {
        self.remapper = remapper;
    }

    fn is_degraded(&self) -> bool {
        true
    }
}

impl Drop for TerminalListener {
    fn drop(&mut self) {
        self.release();
    }
}
