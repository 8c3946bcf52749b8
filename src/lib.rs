//! Kiosk keyboard input pipeline
//!
//! Reads raw key events below the terminal layer, turns them into gestures
//! suited to young children (sticky-shift, long-press, double-tap) and hands
//! semantic actions to the application. Function keys are calibrated per
//! keyboard and the whole keyboard can be handed back to a shell for
//! administration.

pub mod calibration;
pub mod config;
pub mod error;
pub mod keyboard;
pub mod ui;

pub use calibration::CalibrationMap;
pub use config::Config;
pub use error::{InputError, InputResult};
