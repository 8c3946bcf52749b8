//! Terminal User Interface components

mod calibration_view;

pub use calibration_view::CalibrationPrompt;
