//! Temporarily handing the keyboard back to the system
//!
//! Administration mode runs a shell on the real terminal. While it runs the
//! grab is released and terminal raw mode is turned off; when the guard is
//! resumed or dropped, stale input is discarded, gesture state is reset and
//! the grab is taken again.

use super::source::{grab_with_retry, GrabRetry, KeySource};
use super::KeyboardStateMachine;
use crate::error::InputResult;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, is_raw_mode_enabled};
use log::{debug, error, info, warn};
use std::io;
use std::process::{Command, ExitStatus};

/// Keeps the keyboard released until resumed or dropped
pub struct SuspendGuard<'a> {
    source: &'a mut dyn KeySource,
    machine: &'a mut KeyboardStateMachine,
    regrab: bool,
    retry: GrabRetry,
    restore_raw_mode: bool,
    resumed: bool,
}

impl<'a> SuspendGuard<'a> {
    /// Release the grab and leave raw mode
    pub fn suspend(
        source: &'a mut dyn KeySource,
        machine: &'a mut KeyboardStateMachine,
        retry: GrabRetry,
    ) -> Self {
        let regrab = source.is_grabbed();
        source.release();

        let restore_raw_mode = is_raw_mode_enabled().unwrap_or(false);
        if restore_raw_mode {
            if let Err(e) = disable_raw_mode() {
                warn!("failed to leave raw mode: {e}");
            }
        }
        info!("keyboard suspended: {}", source.describe());

        Self {
            source,
            machine,
            regrab,
            retry,
            restore_raw_mode,
            resumed: false,
        }
    }

    /// Whether the grab will be taken again on resume
    pub fn will_regrab(&self) -> bool {
        self.regrab
    }

    /// Run `program` with `args` on the real terminal and wait for it.
    ///
    /// Arguments are passed unchanged; stdio is inherited.
    pub fn run_shell(&mut self, program: &str, args: &[String]) -> io::Result<ExitStatus> {
        if program.trim().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty admin command",
            ));
        }
        info!("starting admin command {program:?} {args:?}");
        let status = Command::new(program).args(args).status()?;
        info!("admin command exited with {status}");
        Ok(status)
    }

    /// Take the keyboard back.
    ///
    /// Stale events are drained and gesture state is reset even when the
    /// grab fails.
    pub fn resume(mut self) -> InputResult<()> {
        self.restore()
    }

    fn restore(&mut self) -> InputResult<()> {
        if self.resumed {
            return Ok(());
        }
        self.resumed = true;

        if self.restore_raw_mode {
            if let Err(e) = enable_raw_mode() {
                warn!("failed to re-enter raw mode: {e}");
            }
        }

        let drained = self.source.drain_pending();
        if drained > 0 {
            debug!("discarded {drained} events queued while suspended");
        }
        self.machine.reset();

        if self.regrab {
            grab_with_retry(&mut *self.source, self.retry)?;
        }
        info!("keyboard resumed: {}", self.source.describe());
        Ok(())
    }
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            error!("failed to take the keyboard back: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::replay::ReplaySource;
    use crate::keyboard::{KeyCode, RawKeyEvent};
    use std::time::Duration;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn held_shift() -> (ReplaySource, KeyboardStateMachine) {
        let mut source = ReplaySource::new(Vec::new());
        source.grab().unwrap();
        let mut machine = KeyboardStateMachine::default();
        machine.process(&RawKeyEvent::down(KeyCode::LEFT_SHIFT, ms(0)));
        (source, machine)
    }

    #[test]
    fn suspend_releases_and_resume_regrabs() {
        let (mut source, mut machine) = held_shift();
        let guard = SuspendGuard::suspend(&mut source, &mut machine, GrabRetry::default());
        assert!(guard.will_regrab());
        guard.resume().unwrap();

        assert!(source.is_grabbed());
        assert_eq!(source.releases(), 1);
        assert!(machine.held_keys().is_empty());
    }

    #[test]
    fn drop_resumes() {
        let (mut source, mut machine) = held_shift();
        {
            let _guard = SuspendGuard::suspend(&mut source, &mut machine, GrabRetry::default());
        }
        assert!(source.is_grabbed());
        assert!(machine.held_keys().is_empty());
    }

    #[test]
    fn ungrabbed_source_stays_ungrabbed() {
        let mut source = ReplaySource::new(Vec::new());
        let mut machine = KeyboardStateMachine::default();
        let guard = SuspendGuard::suspend(&mut source, &mut machine, GrabRetry::default());
        assert!(!guard.will_regrab());
        guard.resume().unwrap();
        assert!(!source.is_grabbed());
    }

    #[test]
    fn stale_events_are_drained() {
        let mut source = ReplaySource::new(vec![RawKeyEvent::down(KeyCode(30), ms(5))]);
        source.advance_to(ms(10));
        let mut machine = KeyboardStateMachine::default();
        SuspendGuard::suspend(&mut source, &mut machine, GrabRetry::default())
            .resume()
            .unwrap();
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn empty_admin_command_is_rejected() {
        let mut source = ReplaySource::new(Vec::new());
        let mut machine = KeyboardStateMachine::default();
        let mut guard = SuspendGuard::suspend(&mut source, &mut machine, GrabRetry::default());
        let err = guard.run_shell("   ", &[]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[cfg(unix)]
    #[test]
    fn admin_arguments_are_passed_whole() {
        let mut source = ReplaySource::new(Vec::new());
        let mut machine = KeyboardStateMachine::default();
        let mut guard = SuspendGuard::suspend(&mut source, &mut machine, GrabRetry::default());
        let args = vec![
            "-c".to_string(),
            "test \"$0\" = 'a b' && exit 3".to_string(),
            "a b".to_string(),
        ];
        let status = guard.run_shell("sh", &args).unwrap();
        assert_eq!(status.code(), Some(3));
    }
}
