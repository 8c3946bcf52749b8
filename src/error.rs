//! Error types for the input pipeline

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by device access, grabbing and calibration
#[derive(Debug, Error)]
pub enum InputError {
    /// The device path does not exist or is not an input device
    #[error("keyboard device {} is not available", .path.display())]
    DeviceUnavailable { path: PathBuf },

    /// The process may not open the device
    #[error("permission denied opening keyboard device {}", .path.display())]
    PermissionDenied { path: PathBuf },

    /// Another process holds an exclusive grab on the device
    #[error("keyboard device {} is grabbed by another process", .path.display())]
    GrabConflict { path: PathBuf },

    /// No calibration file has been written yet
    #[error("no keyboard calibration found at {}", .path.display())]
    CalibrationMissing { path: PathBuf },

    /// The calibration file exists but cannot be parsed
    #[error("keyboard calibration at {} is unreadable: {source}", .path.display())]
    CalibrationCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Calibration was abandoned before every prompt was answered
    #[error("calibration aborted after {captured} of {total} keys")]
    CalibrationAborted { captured: usize, total: usize },

    /// Raw device access is not supported on this platform
    #[error("raw keyboard access is not supported on this platform")]
    Unsupported,

    /// Any other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl InputError {
    /// Technical remediation shown under the friendly message
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            InputError::PermissionDenied { .. } => {
                Some("add the kiosk user to the input group: sudo usermod -aG input $USER")
            }
            InputError::DeviceUnavailable { .. } => {
                Some("check that the keyboard is plugged in, or set [device] path in config.toml")
            }
            InputError::GrabConflict { .. } => {
                Some("another program (a second kiosk instance or a remapper) owns the keyboard")
            }
            InputError::CalibrationMissing { .. } | InputError::CalibrationCorrupt { .. } => {
                Some("run `kiosk-input --calibrate` to record the function keys")
            }
            _ => None,
        }
    }

    /// Whether waiting and retrying can make the error go away
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            InputError::DeviceUnavailable { .. }
                | InputError::GrabConflict { .. }
                | InputError::CalibrationMissing { .. }
                | InputError::CalibrationCorrupt { .. }
        )
    }

    /// Classify an error from opening `path`
    pub(crate) fn from_open(err: io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::PermissionDenied => InputError::PermissionDenied { path },
            io::ErrorKind::NotFound => InputError::DeviceUnavailable { path },
            // ENOTTY / ENODEV: the path exists but is not an evdev node
            _ => match err.raw_os_error() {
                Some(code) if is_not_input_device(code) => InputError::DeviceUnavailable { path },
                _ => InputError::Io(err),
            },
        }
    }
}

#[cfg(target_os = "linux")]
fn is_not_input_device(code: i32) -> bool {
    use nix::libc;
    matches!(code, libc::ENXIO | libc::ENODEV | libc::ENOTTY)
}

#[cfg(not(target_os = "linux"))]
fn is_not_input_device(_code: i32) -> bool {
    false
}

pub type InputResult<T> = Result<T, InputError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_maps_from_io() {
        let err = InputError::from_open(
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
            "/dev/input/event3",
        );
        assert!(matches!(err, InputError::PermissionDenied { .. }));
        assert!(err.hint().unwrap().contains("input group"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn missing_path_is_device_unavailable() {
        let err = InputError::from_open(
            io::Error::new(io::ErrorKind::NotFound, "gone"),
            "/dev/input/event99",
        );
        assert!(matches!(err, InputError::DeviceUnavailable { .. }));
        assert!(err.is_recoverable());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_input_nodes_are_device_unavailable() {
        use nix::libc;
        for code in [libc::ENOTTY, libc::ENODEV, libc::ENXIO] {
            let err = InputError::from_open(io::Error::from_raw_os_error(code), "/dev/null");
            assert!(matches!(err, InputError::DeviceUnavailable { .. }));
        }
        let err = InputError::from_open(io::Error::from_raw_os_error(libc::EIO), "/dev/null");
        assert!(matches!(err, InputError::Io(_)));
    }

    #[test]
    fn display_names_the_device() {
        let err = InputError::GrabConflict {
            path: PathBuf::from("/dev/input/event4"),
        };
        assert_eq!(
            err.to_string(),
            "keyboard device /dev/input/event4 is grabbed by another process"
        );
    }
}
