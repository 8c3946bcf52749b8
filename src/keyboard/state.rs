//! Keyboard gesture state machine
//!
//! Turns raw key edges into [`KeyboardAction`]s. All timing decisions use the
//! timestamps carried by the events (or passed to [`KeyboardStateMachine::tick`]),
//! never the wall clock, so replaying a fixed event list always yields the
//! same actions.
//!
//! Gesture rules:
//!
//! - **Long-press**: the designated key emits `Control::LongPress` once, as
//!   soon as it has been held for `long_press`. Its ordinary action is
//!   deferred to release and only emitted when the press was short.
//! - **Sticky-shift**: a shift tap shorter than `sticky_tap` arms sticky-shift
//!   until `sticky_expiry` after the release. The next character is shifted
//!   and disarms it. Tapping shift again while armed disarms it.
//! - **Double-tap**: a press of the same key within `double_tap_window` of its
//!   previous release additionally emits `Control::DoubleTap`. A third rapid
//!   press starts a new count.

use super::action::{Control, Direction, KeyboardAction};
use super::keymap::KeyClass;
use super::{KeyCode, RawKeyEvent};
use log::{debug, trace};
use std::collections::HashMap;
use std::time::Duration;

/// Thresholds for the gesture rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureTimings {
    /// Hold time after which the designated key long-presses
    pub long_press: Duration,
    /// Shift presses shorter than this count as taps
    pub sticky_tap: Duration,
    /// How long an armed sticky-shift waits for a character
    pub sticky_expiry: Duration,
    /// Max gap between a release and the next press of the same key
    pub double_tap_window: Duration,
}

impl Default for GestureTimings {
    fn default() -> Self {
        Self {
            long_press: Duration::from_millis(1000),
            sticky_tap: Duration::from_millis(300),
            sticky_expiry: Duration::from_millis(5000),
            double_tap_window: Duration::from_millis(400),
        }
    }
}

/// Transient timing state of a single key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPressState {
    /// When the current press started, `None` while released
    pub press_timestamp: Option<Duration>,
    /// When the key was last released
    pub last_release_timestamp: Option<Duration>,
    /// Presses in the current rapid sequence (1 or 2)
    pub tap_count: u32,
    long_press_fired: bool,
    typed_during_hold: bool,
}

impl KeyPressState {
    pub fn is_down(&self) -> bool {
        self.press_timestamp.is_some()
    }
}

/// Sticky-shift latch, owned by one state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StickyShift {
    armed_until: Option<Duration>,
}

impl StickyShift {
    /// Whether the latch would still apply to a character at `at`
    pub fn is_armed_at(&self, at: Duration) -> bool {
        self.armed_until.is_some_and(|until| at <= until)
    }

    pub fn is_armed(&self) -> bool {
        self.armed_until.is_some()
    }

    pub fn expires_at(&self) -> Option<Duration> {
        self.armed_until
    }
}

/// The gesture state machine
#[derive(Debug, Clone)]
pub struct KeyboardStateMachine {
    timings: GestureTimings,
    long_press_key: KeyCode,
    keys: HashMap<KeyCode, KeyPressState>,
    sticky: StickyShift,
    last_timestamp: Duration,
    dropped_events: u64,
}

impl KeyboardStateMachine {
    pub fn new(timings: GestureTimings, long_press_key: KeyCode) -> Self {
        Self {
            timings,
            long_press_key,
            keys: HashMap::new(),
            sticky: StickyShift::default(),
            last_timestamp: Duration::ZERO,
            dropped_events: 0,
        }
    }

    pub fn timings(&self) -> GestureTimings {
        self.timings
    }

    pub fn long_press_key(&self) -> KeyCode {
        self.long_press_key
    }

    pub fn sticky_shift(&self) -> StickyShift {
        self.sticky
    }

    /// Per-key state, present while held or inside the double-tap window
    pub fn key_state(&self, key: KeyCode) -> Option<&KeyPressState> {
        self.keys.get(&key)
    }

    pub fn is_held(&self, key: KeyCode) -> bool {
        self.keys.get(&key).is_some_and(KeyPressState::is_down)
    }

    /// All keys currently held, sorted
    pub fn held_keys(&self) -> Vec<KeyCode> {
        let mut held: Vec<KeyCode> = self
            .keys
            .iter()
            .filter(|(_, state)| state.is_down())
            .map(|(key, _)| *key)
            .collect();
        held.sort();
        held
    }

    /// Number of malformed events dropped so far
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    /// Forget every held key and the sticky-shift latch
    pub fn reset(&mut self) {
        if !self.keys.is_empty() || self.sticky.is_armed() {
            debug!(
                "resetting keyboard state ({} tracked keys, sticky armed: {})",
                self.keys.len(),
                self.sticky.is_armed()
            );
        }
        self.keys.clear();
        self.sticky = StickyShift::default();
    }

    /// Advance the gesture clock without an event
    pub fn tick(&mut self, now: Duration) -> Vec<KeyboardAction> {
        let now = self.clamp(now);
        let mut actions = Vec::new();
        self.advance(now, &mut actions);
        actions
    }

    /// Process one raw event and return the actions it produces, in order
    pub fn process(&mut self, event: &RawKeyEvent) -> Vec<KeyboardAction> {
        let now = self.clamp(event.timestamp);
        let mut actions = Vec::new();
        self.advance(now, &mut actions);

        let key = event.keycode;
        let held = self.is_held(key);
        match (event.is_down, event.repeat || held) {
            (true, true) => {
                if held {
                    self.on_key_repeat(key, &mut actions);
                } else {
                    trace!("dropping repeat of {} with no matching press", key);
                    self.dropped_events += 1;
                }
            }
            (true, false) => self.on_key_down(key, now, &mut actions),
            (false, _) => {
                if held {
                    self.on_key_up(key, now, &mut actions);
                } else {
                    trace!("dropping release of {} with no matching press", key);
                    self.dropped_events += 1;
                }
            }
        }
        actions
    }

    /// Timestamps never move backwards inside the machine
    fn clamp(&mut self, timestamp: Duration) -> Duration {
        if timestamp > self.last_timestamp {
            self.last_timestamp = timestamp;
        }
        self.last_timestamp
    }

    fn advance(&mut self, now: Duration, actions: &mut Vec<KeyboardAction>) {
        let key = self.long_press_key;
        let threshold = self.timings.long_press;
        if let Some(state) = self.keys.get_mut(&key) {
            if let Some(pressed) = state.press_timestamp {
                if !state.long_press_fired && now.saturating_sub(pressed) >= threshold {
                    state.long_press_fired = true;
                    debug!("long-press of {} after {:?}", key, now - pressed);
                    actions.push(KeyboardAction::Control {
                        action: Control::LongPress(key),
                        is_down: true,
                    });
                }
            }
        }

        if let Some(until) = self.sticky.armed_until {
            if now > until {
                debug!("sticky-shift expired unused");
                self.sticky = StickyShift::default();
            }
        }

        let window = self.timings.double_tap_window;
        self.keys.retain(|_, state| {
            state.is_down()
                || state
                    .last_release_timestamp
                    .is_some_and(|released| now.saturating_sub(released) <= window)
        });
    }

    fn on_key_down(&mut self, key: KeyCode, now: Duration, actions: &mut Vec<KeyboardAction>) {
        let window = self.timings.double_tap_window;
        let state = self.keys.entry(key).or_default();

        let rapid = state.tap_count == 1
            && state
                .last_release_timestamp
                .is_some_and(|released| now.saturating_sub(released) <= window);
        state.tap_count = if rapid { 2 } else { 1 };
        state.press_timestamp = Some(now);
        state.long_press_fired = false;
        state.typed_during_hold = false;

        if key != self.long_press_key {
            self.press_actions(key, now, actions);
        }

        if rapid {
            debug!("double-tap of {}", key);
            actions.push(KeyboardAction::Control {
                action: Control::DoubleTap(key),
                is_down: true,
            });
        }
    }

    fn on_key_repeat(&mut self, key: KeyCode, actions: &mut Vec<KeyboardAction>) {
        if let KeyClass::Arrow(direction) = key.class() {
            actions.push(self.navigation(direction, key, true));
        }
    }

    fn on_key_up(&mut self, key: KeyCode, now: Duration, actions: &mut Vec<KeyboardAction>) {
        let Some(state) = self.keys.get_mut(&key) else {
            return;
        };
        let pressed = state.press_timestamp.take().unwrap_or(now);
        let held = now.saturating_sub(pressed);
        let long_pressed = state.long_press_fired;
        let typed_during_hold = state.typed_during_hold;
        state.last_release_timestamp = Some(now);
        if long_pressed {
            // a long hold never starts a double-tap sequence
            state.tap_count = 0;
        }

        if key == self.long_press_key {
            if !long_pressed {
                self.press_actions(key, pressed, actions);
                self.release_actions(key, actions);
            }
            return;
        }

        if key.is_shift() && held < self.timings.sticky_tap && !typed_during_hold {
            if self.sticky.is_armed() {
                debug!("sticky-shift cancelled by a second tap");
                self.sticky = StickyShift::default();
            } else {
                let until = now + self.timings.sticky_expiry;
                debug!("sticky-shift armed until {:?}", until);
                self.sticky = StickyShift {
                    armed_until: Some(until),
                };
            }
        }

        self.release_actions(key, actions);
    }

    /// Actions for the press edge of `key`
    fn press_actions(&mut self, key: KeyCode, at: Duration, actions: &mut Vec<KeyboardAction>) {
        match key.class() {
            KeyClass::Character { base, shifted } => {
                let physical_shift = self.is_held(KeyCode::LEFT_SHIFT)
                    || self.is_held(KeyCode::RIGHT_SHIFT);
                let sticky = self.sticky.is_armed_at(at);
                if sticky {
                    self.sticky = StickyShift::default();
                }
                for shift in [KeyCode::LEFT_SHIFT, KeyCode::RIGHT_SHIFT] {
                    if let Some(state) = self.keys.get_mut(&shift) {
                        if state.is_down() {
                            state.typed_during_hold = true;
                        }
                    }
                }
                let ch = if physical_shift || sticky { shifted } else { base };
                actions.push(KeyboardAction::Character { ch });
            }
            KeyClass::Arrow(direction) => actions.push(self.navigation(direction, key, false)),
            KeyClass::Control(action) => actions.push(KeyboardAction::Control {
                action,
                is_down: true,
            }),
            KeyClass::Function(target) => actions.push(KeyboardAction::ModeSwitch { target }),
            KeyClass::Shift | KeyClass::Other => {}
        }
    }

    /// Actions for the release edge of `key`
    fn release_actions(&self, key: KeyCode, actions: &mut Vec<KeyboardAction>) {
        if let KeyClass::Control(action) = key.class() {
            actions.push(KeyboardAction::Control {
                action,
                is_down: false,
            });
        }
    }

    fn navigation(&self, direction: Direction, key: KeyCode, is_repeat: bool) -> KeyboardAction {
        let mut other_arrows_held: Vec<Direction> = [
            (KeyCode::UP, Direction::Up),
            (KeyCode::DOWN, Direction::Down),
            (KeyCode::LEFT, Direction::Left),
            (KeyCode::RIGHT, Direction::Right),
        ]
        .into_iter()
        .filter(|(code, _)| *code != key && self.is_held(*code))
        .map(|(_, dir)| dir)
        .collect();
        other_arrows_held.sort();

        KeyboardAction::Navigation {
            direction,
            space_held: self.is_held(KeyCode::SPACE),
            is_repeat,
            other_arrows_held,
        }
    }
}

impl Default for KeyboardStateMachine {
    fn default() -> Self {
        Self::new(GestureTimings::default(), KeyCode::ESCAPE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: KeyCode = KeyCode(30);
    const B: KeyCode = KeyCode(48);
    const SHIFT: KeyCode = KeyCode::LEFT_SHIFT;
    const ESC: KeyCode = KeyCode::ESCAPE;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn down(key: KeyCode, at: u64) -> RawKeyEvent {
        RawKeyEvent::down(key, ms(at))
    }

    fn up(key: KeyCode, at: u64) -> RawKeyEvent {
        RawKeyEvent::up(key, ms(at))
    }

    fn replay(machine: &mut KeyboardStateMachine, events: &[RawKeyEvent]) -> Vec<KeyboardAction> {
        events.iter().flat_map(|ev| machine.process(ev)).collect()
    }

    fn long_presses(actions: &[KeyboardAction]) -> usize {
        actions.iter().filter(|a| a.is_long_press()).count()
    }

    fn double_taps(actions: &[KeyboardAction]) -> usize {
        actions.iter().filter(|a| a.is_double_tap()).count()
    }

    fn chars(actions: &[KeyboardAction]) -> String {
        actions
            .iter()
            .filter_map(|a| match a {
                KeyboardAction::Character { ch } => Some(*ch),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn short_tap_emits_tap_and_no_long_press() {
        let mut machine = KeyboardStateMachine::default();
        let actions = replay(&mut machine, &[down(A, 0), up(A, 50)]);
        assert_eq!(actions, vec![KeyboardAction::Character { ch: 'a' }]);

        let actions = replay(&mut machine, &[down(ESC, 1000), up(ESC, 1050)]);
        assert_eq!(
            actions,
            vec![
                KeyboardAction::Control {
                    action: Control::Escape,
                    is_down: true
                },
                KeyboardAction::Control {
                    action: Control::Escape,
                    is_down: false
                },
            ]
        );
    }

    #[test]
    fn release_below_threshold_never_long_presses() {
        for held in [0, 1, 300, 999] {
            let mut machine = KeyboardStateMachine::default();
            let actions = replay(&mut machine, &[down(ESC, 0), up(ESC, held)]);
            assert_eq!(long_presses(&actions), 0, "held {held}ms");
        }
    }

    #[test]
    fn long_press_fires_once_at_threshold() {
        let mut machine = KeyboardStateMachine::default();
        assert!(machine.process(&down(ESC, 0)).is_empty());
        assert!(machine.tick(ms(999)).is_empty());

        let fired = machine.tick(ms(1001));
        assert_eq!(long_presses(&fired), 1);

        // keep holding, with repeats and ticks
        let mut later = machine.process(&RawKeyEvent::repeat(ESC, ms(1500)));
        later.extend(machine.tick(ms(4000)));
        later.extend(machine.process(&up(ESC, 10_000)));
        assert!(later.is_empty(), "unexpected actions {later:?}");
    }

    #[test]
    fn long_press_detected_on_release_without_ticks() {
        let mut machine = KeyboardStateMachine::default();
        let actions = replay(&mut machine, &[down(ESC, 0), up(ESC, 1001)]);
        assert_eq!(long_presses(&actions), 1);
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn long_press_only_for_designated_key() {
        let mut machine = KeyboardStateMachine::default();
        let actions = replay(&mut machine, &[down(A, 0), up(A, 3000)]);
        assert_eq!(long_presses(&actions), 0);
    }

    #[test]
    fn sticky_shift_capitalizes_next_character() {
        let mut machine = KeyboardStateMachine::default();
        let actions = replay(
            &mut machine,
            &[down(SHIFT, 0), up(SHIFT, 100), down(A, 500), up(A, 550)],
        );
        assert_eq!(chars(&actions), "A");
        assert!(!machine.sticky_shift().is_armed());

        // only the next character
        let actions = replay(&mut machine, &[down(A, 600), up(A, 650)]);
        assert_eq!(chars(&actions), "a");
    }

    #[test]
    fn sticky_shift_expires() {
        let mut machine = KeyboardStateMachine::default();
        let expiry = machine.timings().sticky_expiry.as_millis() as u64;
        let actions = replay(
            &mut machine,
            &[down(SHIFT, 0), up(SHIFT, 100), down(A, 100 + expiry + 1)],
        );
        assert_eq!(chars(&actions), "a");
    }

    #[test]
    fn sticky_shift_expiry_by_tick() {
        let mut machine = KeyboardStateMachine::default();
        replay(&mut machine, &[down(SHIFT, 0), up(SHIFT, 100)]);
        assert!(machine.sticky_shift().is_armed());
        machine.tick(ms(100_000));
        assert!(!machine.sticky_shift().is_armed());
    }

    #[test]
    fn long_shift_hold_does_not_arm() {
        let mut machine = KeyboardStateMachine::default();
        replay(&mut machine, &[down(SHIFT, 0), up(SHIFT, 300)]);
        assert!(!machine.sticky_shift().is_armed());
    }

    #[test]
    fn held_shift_shifts_and_does_not_arm() {
        let mut machine = KeyboardStateMachine::default();
        let actions = replay(
            &mut machine,
            &[down(SHIFT, 0), down(A, 20), up(A, 60), up(SHIFT, 100)],
        );
        assert_eq!(chars(&actions), "A");
        assert!(!machine.sticky_shift().is_armed());
    }

    #[test]
    fn second_shift_tap_cancels_sticky() {
        let mut machine = KeyboardStateMachine::default();
        let actions = replay(
            &mut machine,
            &[
                down(SHIFT, 0),
                up(SHIFT, 80),
                down(SHIFT, 200),
                up(SHIFT, 260),
                down(A, 400),
            ],
        );
        assert_eq!(double_taps(&actions), 1);
        assert_eq!(chars(&actions), "a");
    }

    #[test]
    fn double_tap_within_window() {
        let mut machine = KeyboardStateMachine::default();
        let actions = replay(&mut machine, &[down(A, 0), up(A, 50), down(A, 400), up(A, 450)]);
        assert_eq!(double_taps(&actions), 1);
        assert_eq!(chars(&actions), "aa");
    }

    #[test]
    fn gap_beyond_window_is_two_single_taps() {
        let mut machine = KeyboardStateMachine::default();
        let actions = replay(&mut machine, &[down(A, 0), up(A, 50), down(A, 500), up(A, 550)]);
        assert_eq!(double_taps(&actions), 0);
        assert_eq!(chars(&actions), "aa");
    }

    #[test]
    fn third_rapid_press_resets_count() {
        let mut machine = KeyboardStateMachine::default();
        let actions = replay(
            &mut machine,
            &[
                down(A, 0),
                up(A, 50),
                down(A, 150),
                up(A, 200),
                down(A, 300),
                up(A, 350),
            ],
        );
        assert_eq!(double_taps(&actions), 1);
        assert_eq!(machine.key_state(A).map(|s| s.tap_count), Some(1));
    }

    #[test]
    fn different_keys_do_not_double_tap() {
        let mut machine = KeyboardStateMachine::default();
        let actions = replay(&mut machine, &[down(A, 0), up(A, 50), down(B, 100), up(B, 150)]);
        assert_eq!(double_taps(&actions), 0);
    }

    #[test]
    fn press_state_expires_after_window() {
        let mut machine = KeyboardStateMachine::default();
        replay(&mut machine, &[down(A, 0), up(A, 50)]);
        assert!(machine.key_state(A).is_some());
        machine.tick(ms(451));
        assert!(machine.key_state(A).is_none());
    }

    #[test]
    fn simultaneous_presses_keep_arrival_order() {
        let mut machine = KeyboardStateMachine::default();
        let actions = replay(&mut machine, &[down(B, 10), down(A, 10)]);
        assert_eq!(chars(&actions), "ba");
        assert_eq!(machine.held_keys(), vec![A, B]);
    }

    #[test]
    fn unmatched_release_is_dropped() {
        let mut machine = KeyboardStateMachine::default();
        let actions = machine.process(&up(A, 10));
        assert!(actions.is_empty());
        assert_eq!(machine.dropped_events(), 1);
        assert!(machine.key_state(A).is_none());
    }

    #[test]
    fn navigation_reports_space_and_other_arrows() {
        let mut machine = KeyboardStateMachine::default();
        let actions = replay(
            &mut machine,
            &[
                down(KeyCode::SPACE, 0),
                down(KeyCode::UP, 10),
                down(KeyCode::LEFT, 20),
            ],
        );
        assert_eq!(
            actions.last(),
            Some(&KeyboardAction::Navigation {
                direction: Direction::Left,
                space_held: true,
                is_repeat: false,
                other_arrows_held: vec![Direction::Up],
            })
        );

        let repeat = machine.process(&RawKeyEvent::repeat(KeyCode::UP, ms(500)));
        assert_eq!(
            repeat,
            vec![KeyboardAction::Navigation {
                direction: Direction::Up,
                space_held: true,
                is_repeat: true,
                other_arrows_held: vec![Direction::Left],
            }]
        );
    }

    #[test]
    fn function_keys_switch_mode() {
        let mut machine = KeyboardStateMachine::default();
        let actions = machine.process(&down(KeyCode(183), 0));
        assert_eq!(actions, vec![KeyboardAction::ModeSwitch { target: 13 }]);
    }

    #[test]
    fn reset_clears_held_keys() {
        let mut machine = KeyboardStateMachine::default();
        replay(&mut machine, &[down(A, 0), down(SHIFT, 10)]);
        assert_eq!(machine.held_keys().len(), 2);
        machine.reset();
        assert!(machine.held_keys().is_empty());

        // the release that went elsewhere is ignored, the next press is fresh
        let actions = replay(&mut machine, &[up(A, 100), down(A, 200)]);
        assert_eq!(chars(&actions), "a");
        assert_eq!(double_taps(&actions), 0);
    }

    #[test]
    fn replay_is_deterministic() {
        let events = [
            down(SHIFT, 0),
            up(SHIFT, 90),
            down(A, 200),
            up(A, 260),
            down(A, 400),
            up(A, 420),
            down(ESC, 500),
            RawKeyEvent::repeat(ESC, ms(1200)),
            RawKeyEvent::repeat(ESC, ms(1600)),
            up(ESC, 1700),
        ];
        let first = replay(&mut KeyboardStateMachine::default(), &events);
        let second = replay(&mut KeyboardStateMachine::default(), &events);
        assert_eq!(first, second);
        assert_eq!(chars(&first), "Aa");
        assert_eq!(long_presses(&first), 1);
    }
}
