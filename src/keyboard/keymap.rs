//! Key code definitions and the kiosk key classification table

use super::action::{Control, Direction};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Represents a logical key code (Linux input key numbering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub u16);

impl KeyCode {
    pub const ESCAPE: KeyCode = KeyCode(1);
    pub const BACKSPACE: KeyCode = KeyCode(14);
    pub const TAB: KeyCode = KeyCode(15);
    pub const ENTER: KeyCode = KeyCode(28);
    pub const LEFT_SHIFT: KeyCode = KeyCode(42);
    pub const RIGHT_SHIFT: KeyCode = KeyCode(54);
    pub const SPACE: KeyCode = KeyCode(57);
    pub const UP: KeyCode = KeyCode(103);
    pub const LEFT: KeyCode = KeyCode(105);
    pub const RIGHT: KeyCode = KeyCode(106);
    pub const DOWN: KeyCode = KeyCode(108);

    pub fn new(code: u16) -> Self {
        Self(code)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Key code of function key `n` (1..=24)
    pub fn function(n: u8) -> Option<KeyCode> {
        match n {
            1..=10 => Some(KeyCode(58 + n as u16)),
            11 => Some(KeyCode(87)),
            12 => Some(KeyCode(88)),
            13..=24 => Some(KeyCode(170 + n as u16)),
            _ => None,
        }
    }

    /// Resolve a label such as `"F13"` or `"Escape"` (case-insensitive)
    pub fn from_label(label: &str) -> Option<KeyCode> {
        LABELS.get(label.to_ascii_lowercase().as_str()).copied()
    }

    pub fn is_shift(&self) -> bool {
        *self == Self::LEFT_SHIFT || *self == Self::RIGHT_SHIFT
    }

    /// Classification of this key, `KeyClass::Other` when unknown
    pub fn class(&self) -> KeyClass {
        KEYMAP.get(self).map(|info| info.class).unwrap_or(KeyClass::Other)
    }
}

impl From<u16> for KeyCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl std::fmt::Display for KeyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match KEYMAP.get(self) {
            Some(info) => write!(f, "{}", info.name),
            None => write!(f, "key#{}", self.0),
        }
    }
}

/// What a key means to the gesture rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    /// Produces a character, with its shifted form
    Character { base: char, shifted: char },
    /// Left or right shift
    Shift,
    /// Arrow key
    Arrow(Direction),
    /// Editing / control key
    Control(Control),
    /// Function key number, used as a mode switch target
    Function(u8),
    /// Modifiers and keys the kiosk ignores
    Other,
}

/// Information about a key
#[derive(Debug, Clone)]
pub struct KeyInfo {
    /// Display name for the key, also its calibration label
    pub name: &'static str,
    /// How the state machine treats the key
    pub class: KeyClass,
}

impl KeyInfo {
    const fn new(name: &'static str, class: KeyClass) -> Self {
        Self { name, class }
    }
}

const fn ch(base: char, shifted: char) -> KeyClass {
    KeyClass::Character { base, shifted }
}

static FUNCTION_NAMES: [&str; 24] = [
    "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12", "F13", "F14",
    "F15", "F16", "F17", "F18", "F19", "F20", "F21", "F22", "F23", "F24",
];

/// Static keymap for a standard US layout
pub static KEYMAP: LazyLock<HashMap<KeyCode, KeyInfo>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    // Function row
    for n in 1..=24u8 {
        if let Some(code) = KeyCode::function(n) {
            map.insert(
                code,
                KeyInfo::new(FUNCTION_NAMES[n as usize - 1], KeyClass::Function(n)),
            );
        }
    }

    // Number row
    let digits = [
        (2, '1', '!'),
        (3, '2', '@'),
        (4, '3', '#'),
        (5, '4', '$'),
        (6, '5', '%'),
        (7, '6', '^'),
        (8, '7', '&'),
        (9, '8', '*'),
        (10, '9', '('),
        (11, '0', ')'),
    ];
    const DIGIT_NAMES: [&str; 10] = ["1", "2", "3", "4", "5", "6", "7", "8", "9", "0"];
    for (i, (code, base, shifted)) in digits.into_iter().enumerate() {
        map.insert(KeyCode(code), KeyInfo::new(DIGIT_NAMES[i], ch(base, shifted)));
    }
    map.insert(KeyCode(12), KeyInfo::new("Minus", ch('-', '_')));
    map.insert(KeyCode(13), KeyInfo::new("Equals", ch('=', '+')));
    map.insert(KeyCode(41), KeyInfo::new("Grave", ch('`', '~')));

    // Letters, by row
    let letters: [(u16, &'static str, char); 26] = [
        (16, "Q", 'q'),
        (17, "W", 'w'),
        (18, "E", 'e'),
        (19, "R", 'r'),
        (20, "T", 't'),
        (21, "Y", 'y'),
        (22, "U", 'u'),
        (23, "I", 'i'),
        (24, "O", 'o'),
        (25, "P", 'p'),
        (30, "A", 'a'),
        (31, "S", 's'),
        (32, "D", 'd'),
        (33, "F", 'f'),
        (34, "G", 'g'),
        (35, "H", 'h'),
        (36, "J", 'j'),
        (37, "K", 'k'),
        (38, "L", 'l'),
        (44, "Z", 'z'),
        (45, "X", 'x'),
        (46, "C", 'c'),
        (47, "V", 'v'),
        (48, "B", 'b'),
        (49, "N", 'n'),
        (50, "M", 'm'),
    ];
    for (code, name, letter) in letters {
        map.insert(
            KeyCode(code),
            KeyInfo::new(name, ch(letter, letter.to_ascii_uppercase())),
        );
    }

    // Punctuation
    map.insert(KeyCode(26), KeyInfo::new("LeftBracket", ch('[', '{')));
    map.insert(KeyCode(27), KeyInfo::new("RightBracket", ch(']', '}')));
    map.insert(KeyCode(43), KeyInfo::new("Backslash", ch('\\', '|')));
    map.insert(KeyCode(39), KeyInfo::new("Semicolon", ch(';', ':')));
    map.insert(KeyCode(40), KeyInfo::new("Apostrophe", ch('\'', '"')));
    map.insert(KeyCode(51), KeyInfo::new("Comma", ch(',', '<')));
    map.insert(KeyCode(52), KeyInfo::new("Period", ch('.', '>')));
    map.insert(KeyCode(53), KeyInfo::new("Slash", ch('/', '?')));
    map.insert(KeyCode::SPACE, KeyInfo::new("Space", ch(' ', ' ')));

    // Keypad, the math mode uses it heavily
    let keypad = [
        (82, "KP0", '0'),
        (79, "KP1", '1'),
        (80, "KP2", '2'),
        (81, "KP3", '3'),
        (75, "KP4", '4'),
        (76, "KP5", '5'),
        (77, "KP6", '6'),
        (71, "KP7", '7'),
        (72, "KP8", '8'),
        (73, "KP9", '9'),
        (74, "KPMinus", '-'),
        (78, "KPPlus", '+'),
        (55, "KPAsterisk", '*'),
        (98, "KPSlash", '/'),
        (83, "KPDot", '.'),
    ];
    for (code, name, c) in keypad {
        map.insert(KeyCode(code), KeyInfo::new(name, ch(c, c)));
    }

    // Modifiers
    map.insert(KeyCode::LEFT_SHIFT, KeyInfo::new("LeftShift", KeyClass::Shift));
    map.insert(KeyCode::RIGHT_SHIFT, KeyInfo::new("RightShift", KeyClass::Shift));
    map.insert(KeyCode(29), KeyInfo::new("LeftCtrl", KeyClass::Other));
    map.insert(KeyCode(97), KeyInfo::new("RightCtrl", KeyClass::Other));
    map.insert(KeyCode(56), KeyInfo::new("LeftAlt", KeyClass::Other));
    map.insert(KeyCode(100), KeyInfo::new("RightAlt", KeyClass::Other));
    map.insert(KeyCode(125), KeyInfo::new("LeftMeta", KeyClass::Other));
    map.insert(KeyCode(126), KeyInfo::new("RightMeta", KeyClass::Other));
    map.insert(KeyCode(58), KeyInfo::new("CapsLock", KeyClass::Other));

    // Control keys
    let controls = [
        (KeyCode::ESCAPE, "Escape", Control::Escape),
        (KeyCode::BACKSPACE, "Backspace", Control::Backspace),
        (KeyCode::TAB, "Tab", Control::Tab),
        (KeyCode::ENTER, "Enter", Control::Enter),
        (KeyCode(96), "KPEnter", Control::Enter),
        (KeyCode(111), "Delete", Control::Delete),
        (KeyCode(102), "Home", Control::Home),
        (KeyCode(107), "End", Control::End),
        (KeyCode(104), "PageUp", Control::PageUp),
        (KeyCode(109), "PageDown", Control::PageDown),
    ];
    for (code, name, control) in controls {
        map.insert(code, KeyInfo::new(name, KeyClass::Control(control)));
    }

    // Arrow keys
    map.insert(KeyCode::UP, KeyInfo::new("Up", KeyClass::Arrow(Direction::Up)));
    map.insert(KeyCode::DOWN, KeyInfo::new("Down", KeyClass::Arrow(Direction::Down)));
    map.insert(KeyCode::LEFT, KeyInfo::new("Left", KeyClass::Arrow(Direction::Left)));
    map.insert(KeyCode::RIGHT, KeyInfo::new("Right", KeyClass::Arrow(Direction::Right)));

    map
});

static LABELS: LazyLock<HashMap<String, KeyCode>> = LazyLock::new(|| {
    KEYMAP
        .iter()
        .map(|(code, info)| (info.name.to_ascii_lowercase(), *code))
        .collect()
});

/// Character -> (key code, needs shift), preferring the main block over the keypad
static CHAR_INDEX: LazyLock<HashMap<char, (KeyCode, bool)>> = LazyLock::new(|| {
    let mut index = HashMap::new();
    let mut codes: Vec<_> = KEYMAP.iter().collect();
    // keypad names start with "KP"; insert them first so the main block wins
    codes.sort_by_key(|(code, info)| (!info.name.starts_with("KP"), code.0));
    for (code, info) in codes {
        if let KeyClass::Character { base, shifted } = info.class {
            index.insert(base, (*code, false));
            if shifted != base {
                index.insert(shifted, (*code, true));
            }
        }
    }
    index
});

/// Get key info by code
pub fn get_key_info(code: KeyCode) -> Option<&'static KeyInfo> {
    KEYMAP.get(&code)
}

/// Find the key that types `c`, and whether shift is needed for it
pub fn lookup_char(c: char) -> Option<(KeyCode, bool)> {
    CHAR_INDEX.get(&c).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_key_codes() {
        assert_eq!(KeyCode::function(1), Some(KeyCode(59)));
        assert_eq!(KeyCode::function(10), Some(KeyCode(68)));
        assert_eq!(KeyCode::function(12), Some(KeyCode(88)));
        assert_eq!(KeyCode::function(13), Some(KeyCode(183)));
        assert_eq!(KeyCode::function(24), Some(KeyCode(194)));
        assert_eq!(KeyCode::function(0), None);
        assert_eq!(KeyCode::function(25), None);
    }

    #[test]
    fn labels_resolve_case_insensitively() {
        assert_eq!(KeyCode::from_label("F13"), Some(KeyCode(183)));
        assert_eq!(KeyCode::from_label("f1"), Some(KeyCode(59)));
        assert_eq!(KeyCode::from_label("escape"), Some(KeyCode::ESCAPE));
        assert_eq!(KeyCode::from_label("NoSuchKey"), None);
    }

    #[test]
    fn classes() {
        assert_eq!(KeyCode(30).class(), ch('a', 'A'));
        assert_eq!(KeyCode::LEFT_SHIFT.class(), KeyClass::Shift);
        assert_eq!(KeyCode::UP.class(), KeyClass::Arrow(Direction::Up));
        assert_eq!(KeyCode(183).class(), KeyClass::Function(13));
        assert_eq!(KeyCode(29).class(), KeyClass::Other);
        assert_eq!(KeyCode(999).class(), KeyClass::Other);
    }

    #[test]
    fn char_lookup_prefers_main_block() {
        assert_eq!(lookup_char('a'), Some((KeyCode(30), false)));
        assert_eq!(lookup_char('A'), Some((KeyCode(30), true)));
        assert_eq!(lookup_char('1'), Some((KeyCode(2), false)));
        assert_eq!(lookup_char('+'), Some((KeyCode(13), true)));
        assert_eq!(lookup_char('?'), Some((KeyCode(53), true)));
        assert_eq!(lookup_char('é'), None);
    }

    #[test]
    fn display_uses_key_name() {
        assert_eq!(KeyCode(183).to_string(), "F13");
        assert_eq!(KeyCode(999).to_string(), "key#999");
    }
}
