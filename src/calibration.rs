//! Calibration store: hardware scancode -> logical function-key label
//!
//! The file is a JSON object whose keys are scancodes (integers written as
//! strings) and whose values are labels:
//!
//! ```json
//! { "458856": "F13", "458857": "F14" }
//! ```
//!
//! It is only ever replaced as a whole: a new map is written to a temporary
//! file next to the old one and renamed over it, so an aborted calibration
//! leaves the previous map untouched.

use crate::config::{app_dir, ConfigError};
use crate::error::{InputError, InputResult};
use crate::keyboard::{KeyCode, KeySource, RawKeyEvent, SourceStatus};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the calibration map inside the app directory
pub const CALIBRATION_FILE: &str = "calibration.json";

/// How long each readiness wait lasts while waiting for a prompt answer
const PROMPT_POLL: Duration = Duration::from_millis(100);

/// Default location of the calibration file
pub fn calibration_path() -> Result<PathBuf, ConfigError> {
    Ok(app_dir()?.join(CALIBRATION_FILE))
}

/// Immutable-once-loaded mapping from scancode to label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationMap {
    entries: BTreeMap<u32, String>,
}

impl CalibrationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, scancode: u32, label: impl Into<String>) {
        self.entries.insert(scancode, label.into());
    }

    pub fn get(&self, scancode: u32) -> Option<&str> {
        self.entries.get(&scancode).map(String::as_str)
    }

    /// Scancode recorded for `label`
    pub fn scancode_for(&self, label: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(_, l)| l.eq_ignore_ascii_case(label))
            .map(|(scancode, _)| *scancode)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.entries.iter().map(|(s, l)| (*s, l.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load the map from the default path
    pub fn load() -> InputResult<Self> {
        let path = calibration_path().map_err(|e| InputError::Io(io::Error::other(e)))?;
        Self::load_from(&path)
    }

    /// Load a map.
    ///
    /// Fails with `CalibrationMissing` when the file does not exist and with
    /// `CalibrationCorrupt` when it cannot be parsed.
    pub fn load_from(path: &Path) -> InputResult<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(InputError::CalibrationMissing {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&contents).map_err(|source| InputError::CalibrationCorrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a map, degrading to the identity mapping on any failure
    pub fn load_or_identity(path: &Path) -> Self {
        match Self::load_from(path) {
            Ok(map) => {
                info!("loaded {} calibrated keys from {}", map.len(), path.display());
                map
            }
            Err(err @ InputError::CalibrationMissing { .. }) => {
                info!("{err}; using the keyboard's own key codes");
                Self::default()
            }
            Err(err) => {
                warn!("{err}; using the keyboard's own key codes");
                if let Some(hint) = err.hint() {
                    warn!("hint: {hint}");
                }
                Self::default()
            }
        }
    }

    /// Write the map atomically (temporary file + rename)
    pub fn save_to(&self, path: &Path) -> InputResult<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let tmp = temp_path(path);
        let mut json = serde_json::to_string_pretty(self).map_err(io::Error::from)?;
        json.push('\n');
        let written = write_synced(&tmp, json.as_bytes()).and_then(|()| fs::rename(&tmp, path));

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// The labels calibrated when none are configured: F1 to F12
pub fn default_prompts() -> Vec<String> {
    (1..=12).map(|n| format!("F{n}")).collect()
}

/// State shown to the operator while calibrating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationProgress<'a> {
    /// Label the operator should press now
    pub label: &'a str,
    /// Zero-based index of `label`
    pub index: usize,
    pub total: usize,
    /// Scancode captured for the previous label
    pub last_scancode: Option<u32>,
}

/// Ask for each label in turn and record the scancode of the next key press.
///
/// Pressing Escape aborts (unless Escape is itself one of the prompts), as
/// does a device disconnect. A scancode already recorded for an earlier
/// label is ignored and the prompt repeats. Nothing is persisted here.
pub fn run_calibration(
    source: &mut dyn KeySource,
    prompts: &[String],
    mut on_prompt: impl FnMut(&CalibrationProgress<'_>),
) -> InputResult<CalibrationMap> {
    let escape_is_prompt = prompts
        .iter()
        .any(|label| KeyCode::from_label(label) == Some(KeyCode::ESCAPE));
    let total = prompts.len();
    let mut map = CalibrationMap::new();
    let mut queued: VecDeque<RawKeyEvent> = VecDeque::new();
    let mut batch = Vec::new();
    let mut last_scancode = None;

    for (index, label) in prompts.iter().enumerate() {
        on_prompt(&CalibrationProgress {
            label,
            index,
            total,
            last_scancode,
        });

        let scancode = loop {
            let Some(event) = queued.pop_front() else {
                batch.clear();
                let status = source.poll_events(PROMPT_POLL, &mut batch)?;
                queued.extend(batch.drain(..));
                if status == SourceStatus::Disconnected && queued.is_empty() {
                    return Err(InputError::CalibrationAborted {
                        captured: index,
                        total,
                    });
                }
                continue;
            };

            if !event.is_down || event.repeat {
                continue;
            }
            if event.keycode == KeyCode::ESCAPE && !escape_is_prompt {
                return Err(InputError::CalibrationAborted {
                    captured: index,
                    total,
                });
            }
            if let Some(previous) = map.get(event.scancode) {
                warn!(
                    "scancode {:#x} is already recorded as {previous}, press the {label} key",
                    event.scancode
                );
                continue;
            }
            break event.scancode;
        };

        info!("calibrated {label} as scancode {scancode:#x}");
        map.insert(scancode, label.clone());
        last_scancode = Some(scancode);
    }

    Ok(map)
}

/// Run a full calibration and replace the file at `path` only on success
pub fn calibrate_and_save(
    source: &mut dyn KeySource,
    prompts: &[String],
    path: &Path,
    on_prompt: impl FnMut(&CalibrationProgress<'_>),
) -> InputResult<CalibrationMap> {
    let map = run_calibration(source, prompts, on_prompt)?;
    map.save_to(path)?;
    info!("wrote {} calibrated keys to {}", map.len(), path.display());
    Ok(map)
}
