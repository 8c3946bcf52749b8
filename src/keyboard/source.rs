//! The key source abstraction shared by the evdev reader and the terminal fallback

use super::remap::ScancodeRemapper;
use super::terminal_listener::TerminalListener;
use super::RawKeyEvent;
use crate::error::{InputError, InputResult};
use log::{info, warn};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// Whether a source can still produce events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Open,
    /// End of stream, the device went away
    Disconnected,
}

/// A producer of raw key events.
///
/// Implementations never block longer than the timeout given to
/// [`KeySource::poll_events`]; they check readiness before every read.
pub trait KeySource {
    /// Human readable description for logs
    fn describe(&self) -> String;

    /// Current time on the clock used to stamp events
    fn now(&self) -> Duration;

    /// Wait up to `timeout` for input, then append every available event to `out`
    fn poll_events(
        &mut self,
        timeout: Duration,
        out: &mut Vec<RawKeyEvent>,
    ) -> InputResult<SourceStatus>;

    /// Take exclusive ownership of the device. Idempotent.
    fn grab(&mut self) -> InputResult<()>;

    /// Give up exclusive ownership. Always succeeds, no-op when not grabbed.
    fn release(&mut self);

    fn is_grabbed(&self) -> bool;

    /// Discard every event already queued, without blocking.
    ///
    /// Returns the number of events discarded.
    fn drain_pending(&mut self) -> usize;

    /// Replace the calibration remapping for events read from now on
    fn set_remapper(&mut self, remapper: ScancodeRemapper);

    /// Whether release timing is synthesized rather than observed
    fn is_degraded(&self) -> bool {
        false
    }
}

/// Bounded retry policy for [`InputError::GrabConflict`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrabRetry {
    pub attempts: u32,
    /// Wait after the first failure; grows linearly
    pub backoff: Duration,
}

impl Default for GrabRetry {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Grab `source`, retrying only while another process holds it
pub fn grab_with_retry(source: &mut dyn KeySource, retry: GrabRetry) -> InputResult<()> {
    let attempts = retry.attempts.max(1);
    let mut attempt = 1;
    loop {
        match source.grab() {
            Ok(()) => return Ok(()),
            Err(err @ InputError::GrabConflict { .. }) if attempt < attempts => {
                let wait = retry.backoff * attempt;
                warn!("{err}; retrying in {wait:?} ({attempt}/{attempts})");
                thread::sleep(wait);
                attempt += 1;
            }
            Err(err) => {
                // never leave a half-acquired grab behind
                source.release();
                return Err(err);
            }
        }
    }
}

/// How to pick the key source at startup
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    /// Explicit device path, auto-detected when `None`
    pub device: Option<PathBuf>,
    /// Use the terminal fallback even when raw access would work
    pub force_fallback: bool,
    /// Synthetic release delay of the terminal fallback
    pub fallback_release: Duration,
}

/// Open the source for this platform, once, at startup.
///
/// On Linux the evdev reader is preferred. The terminal fallback is used when
/// requested, when raw access is unsupported, or when auto-detection finds no
/// keyboard at all. Permission problems are never hidden behind the fallback.
pub fn open_source(options: &SourceOptions) -> InputResult<Box<dyn KeySource>> {
    if options.force_fallback {
        info!("terminal fallback requested");
        return Ok(Box::new(TerminalListener::new(options.fallback_release)));
    }

    match open_device(options) {
        Ok(source) => Ok(source),
        Err(InputError::Unsupported) => {
            warn!("raw keyboard access unsupported here, using terminal fallback");
            Ok(Box::new(TerminalListener::new(options.fallback_release)))
        }
        Err(err @ InputError::DeviceUnavailable { .. }) if options.device.is_none() => {
            warn!("{err}; using terminal fallback");
            Ok(Box::new(TerminalListener::new(options.fallback_release)))
        }
        Err(err) => Err(err),
    }
}

/// Open the raw device only, never the terminal fallback.
///
/// Used to wait for a keyboard to come back after a disconnect.
#[cfg(target_os = "linux")]
pub fn open_device(options: &SourceOptions) -> InputResult<Box<dyn KeySource>> {
    use super::evdev_listener::EvdevListener;

    let listener = match &options.device {
        Some(path) => EvdevListener::open(path)?,
        None => EvdevListener::open_default()?,
    };
    Ok(Box::new(listener))
}

#[cfg(not(target_os = "linux"))]
pub fn open_device(_options: &SourceOptions) -> InputResult<Box<dyn KeySource>> {
    Err(InputError::Unsupported)
}
