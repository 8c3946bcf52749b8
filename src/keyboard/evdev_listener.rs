//! Raw evdev-based keyboard listener for Linux
//!
//! Reads key edges together with the hardware scancode (`MSC_SCAN`) that
//! precedes them in the same report, so keys the kernel does not know can
//! still be calibrated. Reads never block: readiness is checked with
//! `poll(2)` first and the descriptor is non-blocking.

use super::remap::ScancodeRemapper;
use super::source::{KeySource, SourceStatus};
use super::{KeyCode, MonotonicClock, RawKeyEvent};
use crate::error::{InputError, InputResult};
use evdev::{Device, EventType, InputEvent, Key, MiscType};
use log::{debug, info, warn};
use nix::libc;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

const INPUT_DIR: &str = "/dev/input";

/// Mouse and joystick buttons share the key event type
const BUTTON_CODES: std::ops::Range<u16> = 0x100..0x160;

/// Find all keyboard input devices, sorted by path.
///
/// A device counts as a keyboard when it reports both letter and Enter keys.
/// When event nodes exist but none can be opened, the open error of the
/// first one is returned so permission problems are not mistaken for a
/// missing keyboard.
pub fn find_keyboard_devices() -> InputResult<Vec<PathBuf>> {
    let mut keyboards: Vec<PathBuf> = evdev::enumerate()
        .filter(|(_, dev)| is_keyboard(dev))
        .map(|(path, _)| path)
        .collect();
    keyboards.sort();

    if !keyboards.is_empty() {
        return Ok(keyboards);
    }

    let mut nodes: Vec<PathBuf> = fs::read_dir(INPUT_DIR)
        .map_err(|e| InputError::from_open(e, INPUT_DIR))?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("event"))
        })
        .collect();
    nodes.sort();

    match nodes.first() {
        Some(first) => match Device::open(first) {
            Err(e) => Err(InputError::from_open(e, first)),
            Ok(_) => Err(InputError::DeviceUnavailable {
                path: PathBuf::from(INPUT_DIR),
            }),
        },
        None => Err(InputError::DeviceUnavailable {
            path: PathBuf::from(INPUT_DIR),
        }),
    }
}

fn is_keyboard(dev: &Device) -> bool {
    dev.supported_keys()
        .is_some_and(|keys| keys.contains(Key::KEY_A) && keys.contains(Key::KEY_ENTER))
}

fn set_nonblocking(dev: &Device) -> io::Result<()> {
    let raw_fd = dev.as_raw_fd();

    let current = unsafe { libc::fcntl(raw_fd, libc::F_GETFL) };
    if current < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { libc::fcntl(raw_fd, libc::F_SETFL, current | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn is_disconnect(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENODEV)
}

/// Turns kernel events into key edges, one report at a time.
///
/// An `MSC_SCAN` applies to the next key edge of the same report only. Keys
/// without one keep their key code as scancode. Calibration remapping is
/// applied before the edge leaves the decoder.
#[derive(Debug, Default)]
pub struct ReportDecoder {
    pending_scan: Option<u32>,
    remapper: ScancodeRemapper,
}

impl ReportDecoder {
    pub fn new(remapper: ScancodeRemapper) -> Self {
        Self {
            pending_scan: None,
            remapper,
        }
    }

    pub fn set_remapper(&mut self, remapper: ScancodeRemapper) {
        self.remapper = remapper;
    }

    /// Forget a scancode left over from an unfinished report
    pub fn reset(&mut self) {
        self.pending_scan = None;
    }

    /// Decode one kernel event stamped `now`, `None` unless it is a key edge
    pub fn decode(&mut self, ev: &InputEvent, now: Duration) -> Option<RawKeyEvent> {
        let event_type = ev.event_type();
        if event_type == EventType::MISC {
            if ev.code() == MiscType::MSC_SCAN.0 {
                self.pending_scan = Some(ev.value() as u32);
            }
            return None;
        }
        if event_type == EventType::SYNCHRONIZATION {
            self.pending_scan = None;
            return None;
        }
        if event_type != EventType::KEY || BUTTON_CODES.contains(&ev.code()) {
            return None;
        }

        let keycode = KeyCode(ev.code());
        let scancode = self.pending_scan.take();
        let mut event = match ev.value() {
            0 => RawKeyEvent::up(keycode, now),
            1 => RawKeyEvent::down(keycode, now),
            2 => RawKeyEvent::repeat(keycode, now),
            other => {
                debug!("ignoring key value {other} for {keycode}");
                return None;
            }
        };
        if let Some(scancode) = scancode {
            event = event.with_scancode(scancode);
        }
        self.remapper.apply(&mut event);
        Some(event)
    }
}

/// Evdev-based keyboard listener for raw scancode detection
pub struct EvdevListener {
    device: Device,
    path: PathBuf,
    name: String,
    clock: MonotonicClock,
    grabbed: bool,
    decoder: ReportDecoder,
}

impl EvdevListener {
    /// Open a specific device node
    pub fn open(path: &Path) -> InputResult<Self> {
        let device = Device::open(path).map_err(|e| InputError::from_open(e, path))?;
        if !is_keyboard(&device) {
            warn!("{} does not look like a keyboard", path.display());
        }
        set_nonblocking(&device)?;

        let name = device.name().unwrap_or("unknown keyboard").to_string();
        info!("opened {} ({name})", path.display());

        Ok(Self {
            device,
            path: path.to_path_buf(),
            name,
            clock: MonotonicClock::new(),
            grabbed: false,
            decoder: ReportDecoder::new(ScancodeRemapper::identity()),
        })
    }

    /// Open the first keyboard found under `/dev/input`
    pub fn open_default() -> InputResult<Self> {
        let devices = find_keyboard_devices()?;
        let mut last_err = None;
        for path in &devices {
            match Self::open(path) {
                Ok(listener) => return Ok(listener),
                Err(e) => {
                    debug!("skipping {}: {e}", path.display());
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(InputError::DeviceUnavailable {
            path: PathBuf::from(INPUT_DIR),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until the device is readable, `Ok(None)` on hang-up
    fn wait_readable(&self, timeout: Duration) -> InputResult<Option<bool>> {
        let millis = timeout.as_millis().min(u16::MAX as u128) as u16;
        let fd = unsafe { BorrowedFd::borrow_raw(self.device.as_raw_fd()) };
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];

        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) => Ok(Some(false)),
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                let hangup = PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL;
                if revents.intersects(hangup) {
                    return Ok(None);
                }
                Ok(Some(revents.contains(PollFlags::POLLIN)))
            }
            Err(nix::errno::Errno::EINTR) => Ok(Some(false)),
            Err(errno) => Err(io::Error::from(errno).into()),
        }
    }
}

impl KeySource for EvdevListener {
    fn describe(&self) -> String {
        format!("{} ({})", self.path.display(), self.name)
    }

    fn now(&self) -> Duration {
        self.clock.now()
    }

    fn poll_events(
        &mut self,
        timeout: Duration,
        out: &mut Vec<RawKeyEvent>,
    ) -> InputResult<SourceStatus> {
        match self.wait_readable(timeout)? {
            None => return Ok(SourceStatus::Disconnected),
            Some(false) => return Ok(SourceStatus::Open),
            Some(true) => {}
        }

        let events: Vec<InputEvent> = match self.device.fetch_events() {
            Ok(events) => events.collect(),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(SourceStatus::Open),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(SourceStatus::Open),
            Err(e) if is_disconnect(&e) => {
                warn!("{} disconnected", self.path.display());
                return Ok(SourceStatus::Disconnected);
            }
            Err(e) => return Err(e.into()),
        };

        let now = self.clock.now();
        out.extend(events.iter().filter_map(|ev| self.decoder.decode(ev, now)));
        Ok(SourceStatus::Open)
    }

    fn grab(&mut self) -> InputResult<()> {
        if self.grabbed {
            return Ok(());
        }
        match self.device.grab() {
            Ok(()) => {
                self.grabbed = true;
                info!("grabbed {}", self.path.display());
                Ok(())
            }
            Err(e) if e.raw_os_error() == Some(libc::EBUSY) => Err(InputError::GrabConflict {
                path: self.path.clone(),
            }),
            Err(e) if is_disconnect(&e) => Err(InputError::DeviceUnavailable {
                path: self.path.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn release(&mut self) {
        if !self.grabbed {
            return;
        }
        if let Err(e) = self.device.ungrab() {
            debug!("ungrab of {} failed: {e}", self.path.display());
        }
        self.grabbed = false;
        info!("released {}", self.path.display());
    }

    fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    fn drain_pending(&mut self) -> usize {
        let mut drained = 0;
        while let Ok(Some(true)) = self.wait_readable(Duration::ZERO) {
            match self.device.fetch_events() {
                Ok(events) => {
                    drained += events
                        .filter(|ev| ev.event_type() == EventType::KEY)
                        .count();
                }
                Err(_) => break,
            }
        }
        self.decoder.reset();
        drained
    }

    fn set_remapper(&mut self, remapper: ScancodeRemapper) {
        self.decoder.set_remapper(remapper);
    }
}

impl Drop for EvdevListener {
    fn drop(&mut self) {
        self.release();
    }
}

/// Get a status message about evdev availability
pub fn evdev_status() -> String {
    match find_keyboard_devices() {
        Ok(devices) => format!("{} keyboard device(s) found", devices.len()),
        Err(e) => match e.hint() {
            Some(hint) => format!("{e} ({hint})"),
            None => e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_devices_does_not_panic() {
        // Depends on the machine; only the error classification is checked
        match find_keyboard_devices() {
            Ok(devices) => assert!(devices.windows(2).all(|w| w[0] <= w[1])),
            Err(e) => assert!(matches!(
                e,
                InputError::DeviceUnavailable { .. }
                    | InputError::PermissionDenied { .. }
                    | InputError::Io(_)
            )),
        }
    }

    #[test]
    fn missing_device_is_unavailable() {
        let err = EvdevListener::open(Path::new("/dev/input/event-does-not-exist"))
            .err()
            .expect("open must fail");
        assert!(matches!(err, InputError::DeviceUnavailable { .. }));
    }

    #[test]
    fn status_is_never_empty() {
        assert!(!evdev_status().is_empty());
    }

    fn scan(value: u32) -> InputEvent {
        InputEvent::new(EventType::MISC, MiscType::MSC_SCAN.0, value as i32)
    }

    fn key(key: Key, value: i32) -> InputEvent {
        InputEvent::new(EventType::KEY, key.code(), value)
    }

    fn syn() -> InputEvent {
        InputEvent::new(EventType::SYNCHRONIZATION, 0, 0)
    }

    fn decode_all(decoder: &mut ReportDecoder, events: &[InputEvent]) -> Vec<RawKeyEvent> {
        let now = Duration::from_millis(5);
        events
            .iter()
            .filter_map(|ev| decoder.decode(ev, now))
            .collect()
    }

    #[test]
    fn scancode_attaches_to_key_in_same_report() {
        let mut decoder = ReportDecoder::default();
        let decoded = decode_all(
            &mut decoder,
            &[scan(0x70004), key(Key::KEY_A, 1), syn(), key(Key::KEY_A, 0), syn()],
        );

        assert_eq!(
            decoded,
            vec![
                RawKeyEvent::down(KeyCode(30), Duration::from_millis(5)).with_scancode(0x70004),
                RawKeyEvent::up(KeyCode(30), Duration::from_millis(5)),
            ]
        );
        assert_eq!(decoded[1].scancode, 30);
    }

    #[test]
    fn two_keys_in_one_report_keep_their_own_scancodes() {
        let mut decoder = ReportDecoder::default();
        let decoded = decode_all(
            &mut decoder,
            &[
                scan(0x700e1),
                key(Key::KEY_LEFTSHIFT, 1),
                scan(0x70004),
                key(Key::KEY_A, 1),
                key(Key::KEY_B, 1),
                syn(),
            ],
        );

        let scancodes: Vec<u32> = decoded.iter().map(|e| e.scancode).collect();
        assert_eq!(scancodes, vec![0x700e1, 0x70004, 48]);
        assert!(decoded.iter().all(|e| e.is_down && !e.repeat));
    }

    #[test]
    fn repeat_and_remap_are_decoded() {
        let mut remapper = ScancodeRemapper::identity();
        remapper.add_mapping(0xc0001, KeyCode(183));
        let mut decoder = ReportDecoder::new(remapper);
        let decoded = decode_all(&mut decoder, &[scan(0xc0001), key(Key::KEY_UNKNOWN, 2), syn()]);

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].keycode, KeyCode(183));
        assert_eq!(decoded[0].scancode, 0xc0001);
        assert!(decoded[0].repeat);
    }

    #[test]
    fn buttons_and_unfinished_reports_are_dropped() {
        let mut decoder = ReportDecoder::default();
        let ignored = decode_all(&mut decoder, &[key(Key::BTN_LEFT, 1), key(Key::KEY_A, 7)]);
        assert!(ignored.is_empty());

        decode_all(&mut decoder, &[scan(0x70005)]);
        decoder.reset();
        let decoded = decode_all(&mut decoder, &[key(Key::KEY_B, 1)]);
        assert_eq!(decoded[0].scancode, 48);
    }
}
