//! Scancode remapping driven by the calibration map
//!
//! Different keyboards report different scancodes for the extra function
//! keys, and the kernel assigns them whatever key code it likes. The
//! remapper rewrites the logical key code of every event whose hardware
//! scancode was recorded during calibration.
//!
//! ```
//! use kiosk_input::calibration::CalibrationMap;
//! use kiosk_input::keyboard::{KeyCode, RawKeyEvent};
//! use kiosk_input::keyboard::remap::ScancodeRemapper;
//! use std::time::Duration;
//!
//! let mut map = CalibrationMap::new();
//! map.insert(0x70068, "F13");
//! let remapper = ScancodeRemapper::from_calibration(&map);
//!
//! let mut event = RawKeyEvent::down(KeyCode(240), Duration::ZERO).with_scancode(0x70068);
//! remapper.apply(&mut event);
//! assert_eq!(event.keycode, KeyCode(183));
//! ```

use super::{KeyCode, RawKeyEvent};
use crate::calibration::CalibrationMap;
use log::warn;
use std::collections::HashMap;

/// Rewrites key codes by scancode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScancodeRemapper {
    /// Hardware scancode -> logical key code
    mappings: HashMap<u32, KeyCode>,
}

impl ScancodeRemapper {
    /// A remapper that passes every event through unchanged
    pub fn identity() -> Self {
        Self::default()
    }

    /// Resolve the labels of a calibration map into key codes.
    ///
    /// Labels that name no known key are skipped with a warning.
    pub fn from_calibration(map: &CalibrationMap) -> Self {
        let mut mappings = HashMap::new();
        for (scancode, label) in map.iter() {
            match KeyCode::from_label(label) {
                Some(code) => {
                    mappings.insert(scancode, code);
                }
                None => warn!("calibration label {label:?} is not a known key, ignoring"),
            }
        }
        Self { mappings }
    }

    /// Add a mapping (source scancode -> target key)
    pub fn add_mapping(&mut self, scancode: u32, to: KeyCode) {
        self.mappings.insert(scancode, to);
    }

    /// Logical key recorded for `scancode`
    pub fn lookup(&self, scancode: u32) -> Option<KeyCode> {
        self.mappings.get(&scancode).copied()
    }

    /// Rewrite `event.keycode` when its scancode is mapped.
    ///
    /// Returns whether the event was changed.
    pub fn apply(&self, event: &mut RawKeyEvent) -> bool {
        match self.mappings.get(&event.scancode) {
            Some(&code) if code != event.keycode => {
                event.keycode = code;
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
