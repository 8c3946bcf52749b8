//! Actions emitted by the keyboard state machine and the consumer contract

use super::KeyCode;

/// Arrow direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Control actions, including the gesture actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Enter,
    Backspace,
    Tab,
    Escape,
    Delete,
    Home,
    End,
    PageUp,
    PageDown,
    /// The designated key was held past the long-press threshold
    LongPress(KeyCode),
    /// The same key was pressed twice within the double-tap window
    DoubleTap(KeyCode),
}

/// A semantic keyboard action, dispatched immediately and never stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyboardAction {
    /// A character was typed (already shifted when shift applied)
    Character { ch: char },
    /// An arrow key was pressed or auto-repeated
    Navigation {
        direction: Direction,
        space_held: bool,
        is_repeat: bool,
        /// Other arrows held at the same time, sorted
        other_arrows_held: Vec<Direction>,
    },
    /// A control key edge, or a gesture
    Control { action: Control, is_down: bool },
    /// A function key asked for another mode
    ModeSwitch { target: u8 },
}

impl KeyboardAction {
    /// Whether this is the long-press gesture
    pub fn is_long_press(&self) -> bool {
        matches!(
            self,
            KeyboardAction::Control {
                action: Control::LongPress(_),
                ..
            }
        )
    }

    /// Whether this is a double-tap gesture
    pub fn is_double_tap(&self) -> bool {
        matches!(
            self,
            KeyboardAction::Control {
                action: Control::DoubleTap(_),
                ..
            }
        )
    }
}

/// A component that consumes keyboard actions.
///
/// Actions arrive one at a time, in the order they were produced. Which
/// component is active is decided by the caller.
pub trait ActionSink {
    fn handle_action(&mut self, action: &KeyboardAction);
}

impl ActionSink for Vec<KeyboardAction> {
    fn handle_action(&mut self, action: &KeyboardAction) {
        self.push(action.clone());
    }
}

impl<S: ActionSink + ?Sized> ActionSink for &mut S {
    fn handle_action(&mut self, action: &KeyboardAction) {
        (**self).handle_action(action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gesture_predicates() {
        let long = KeyboardAction::Control {
            action: Control::LongPress(KeyCode::ESCAPE),
            is_down: true,
        };
        let double = KeyboardAction::Control {
            action: Control::DoubleTap(KeyCode(30)),
            is_down: true,
        };
        assert!(long.is_long_press());
        assert!(!long.is_double_tap());
        assert!(double.is_double_tap());
        assert!(!KeyboardAction::Character { ch: 'a' }.is_long_press());
    }

    #[test]
    fn vec_sink_preserves_order() {
        let mut sink: Vec<KeyboardAction> = Vec::new();
        sink.handle_action(&KeyboardAction::Character { ch: 'a' });
        sink.handle_action(&KeyboardAction::ModeSwitch { target: 2 });
        assert_eq!(
            sink,
            vec![
                KeyboardAction::Character { ch: 'a' },
                KeyboardAction::ModeSwitch { target: 2 }
            ]
        );
    }
}
