//! Keyboard event handling and state management

mod action;
mod event;
mod pipeline;
mod source;
mod state;
pub mod keymap;
pub mod remap;
pub mod replay;
pub mod suspend;
pub mod terminal_listener;

#[cfg(target_os = "linux")]
pub mod evdev_listener;

pub use action::{ActionSink, Control, Direction, KeyboardAction};
pub use event::{MonotonicClock, RawKeyEvent};
pub use keymap::{get_key_info, KeyClass, KeyCode, KeyInfo, KEYMAP};
pub use pipeline::{InputPipeline, StepOutcome, StopHandle};
pub use source::{
    grab_with_retry, open_device, open_source, GrabRetry, KeySource, SourceOptions, SourceStatus,
};
pub use state::{GestureTimings, KeyPressState, KeyboardStateMachine, StickyShift};
pub use suspend::SuspendGuard;

#[cfg(target_os = "linux")]
pub use evdev_listener::{evdev_status, find_keyboard_devices, EvdevListener};
