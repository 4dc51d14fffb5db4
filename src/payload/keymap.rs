//! US-layout keyboard table
//!
//! Maps printable characters and key names to USB HID usage codes.
//! Reference: USB HID Usage Tables 1.12, Section 10 (Keyboard/Keypad Page)

/// USB HID key codes (Usage Page 0x07)
pub mod usb {
    pub const KEY_A: u8 = 0x04;
    pub const KEY_Z: u8 = 0x1D;
    pub const KEY_1: u8 = 0x1E;
    pub const KEY_0: u8 = 0x27;

    pub const KEY_ENTER: u8 = 0x28;
    pub const KEY_ESCAPE: u8 = 0x29;
    pub const KEY_BACKSPACE: u8 = 0x2A;
    pub const KEY_TAB: u8 = 0x2B;
    pub const KEY_SPACE: u8 = 0x2C;
    pub const KEY_MINUS: u8 = 0x2D;
    pub const KEY_EQUAL: u8 = 0x2E;
    pub const KEY_LEFT_BRACKET: u8 = 0x2F;
    pub const KEY_RIGHT_BRACKET: u8 = 0x30;
    pub const KEY_BACKSLASH: u8 = 0x31;
    pub const KEY_SEMICOLON: u8 = 0x33;
    pub const KEY_APOSTROPHE: u8 = 0x34;
    pub const KEY_GRAVE: u8 = 0x35;
    pub const KEY_COMMA: u8 = 0x36;
    pub const KEY_PERIOD: u8 = 0x37;
    pub const KEY_SLASH: u8 = 0x38;
    pub const KEY_CAPS_LOCK: u8 = 0x39;

    pub const KEY_F1: u8 = 0x3A;

    pub const KEY_PRINT_SCREEN: u8 = 0x46;
    pub const KEY_INSERT: u8 = 0x49;
    pub const KEY_HOME: u8 = 0x4A;
    pub const KEY_PAGE_UP: u8 = 0x4B;
    pub const KEY_DELETE: u8 = 0x4C;
    pub const KEY_END: u8 = 0x4D;
    pub const KEY_PAGE_DOWN: u8 = 0x4E;
    pub const KEY_RIGHT_ARROW: u8 = 0x4F;
    pub const KEY_LEFT_ARROW: u8 = 0x50;
    pub const KEY_DOWN_ARROW: u8 = 0x51;
    pub const KEY_UP_ARROW: u8 = 0x52;

    pub const KEY_APPLICATION: u8 = 0x65;
}

/// Modifier bits of the first report byte
pub mod modifier {
    pub const LEFT_CTRL: u8 = 0x01;
    pub const LEFT_SHIFT: u8 = 0x02;
    pub const LEFT_ALT: u8 = 0x04;
    pub const LEFT_GUI: u8 = 0x08;
    pub const RIGHT_CTRL: u8 = 0x10;
    pub const RIGHT_SHIFT: u8 = 0x20;
    pub const RIGHT_ALT: u8 = 0x40;
    pub const RIGHT_GUI: u8 = 0x80;
}

use modifier::LEFT_SHIFT;
use usb::*;

/// `(modifiers, keycode)` for a printable character
pub fn char_to_key(ch: char) -> Option<(u8, u8)> {
    let key = match ch {
        'a'..='z' => (0, KEY_A + (ch as u8 - b'a')),
        'A'..='Z' => (LEFT_SHIFT, KEY_A + (ch as u8 - b'A')),
        '1'..='9' => (0, KEY_1 + (ch as u8 - b'1')),
        '0' => (0, KEY_0),
        '\n' => (0, KEY_ENTER),
        '\t' => (0, KEY_TAB),
        ' ' => (0, KEY_SPACE),
        '-' => (0, KEY_MINUS),
        '=' => (0, KEY_EQUAL),
        '[' => (0, KEY_LEFT_BRACKET),
        ']' => (0, KEY_RIGHT_BRACKET),
        '\\' => (0, KEY_BACKSLASH),
        ';' => (0, KEY_SEMICOLON),
        '\'' => (0, KEY_APOSTROPHE),
        '`' => (0, KEY_GRAVE),
        ',' => (0, KEY_COMMA),
        '.' => (0, KEY_PERIOD),
        '/' => (0, KEY_SLASH),
        '!' => (LEFT_SHIFT, KEY_1),
        '@' => (LEFT_SHIFT, KEY_1 + 1),
        '#' => (LEFT_SHIFT, KEY_1 + 2),
        '$' => (LEFT_SHIFT, KEY_1 + 3),
        '%' => (LEFT_SHIFT, KEY_1 + 4),
        '^' => (LEFT_SHIFT, KEY_1 + 5),
        '&' => (LEFT_SHIFT, KEY_1 + 6),
        '*' => (LEFT_SHIFT, KEY_1 + 7),
        '(' => (LEFT_SHIFT, KEY_1 + 8),
        ')' => (LEFT_SHIFT, KEY_0),
        '_' => (LEFT_SHIFT, KEY_MINUS),
        '+' => (LEFT_SHIFT, KEY_EQUAL),
        '{' => (LEFT_SHIFT, KEY_LEFT_BRACKET),
        '}' => (LEFT_SHIFT, KEY_RIGHT_BRACKET),
        '|' => (LEFT_SHIFT, KEY_BACKSLASH),
        ':' => (LEFT_SHIFT, KEY_SEMICOLON),
        '"' => (LEFT_SHIFT, KEY_APOSTROPHE),
        '~' => (LEFT_SHIFT, KEY_GRAVE),
        '<' => (LEFT_SHIFT, KEY_COMMA),
        '>' => (LEFT_SHIFT, KEY_PERIOD),
        '?' => (LEFT_SHIFT, KEY_SLASH),
        _ => return None,
    };
    Some(key)
}

/// Keycode for a named key; `name` must already be upper case
pub fn named_key(name: &str) -> Option<u8> {
    let key = match name {
        "ENTER" | "RETURN" => KEY_ENTER,
        "TAB" => KEY_TAB,
        "ESC" | "ESCAPE" => KEY_ESCAPE,
        "SPACE" => KEY_SPACE,
        "BACKSPACE" => KEY_BACKSPACE,
        "DELETE" | "DEL" => KEY_DELETE,
        "INSERT" => KEY_INSERT,
        "HOME" => KEY_HOME,
        "END" => KEY_END,
        "PAGEUP" => KEY_PAGE_UP,
        "PAGEDOWN" => KEY_PAGE_DOWN,
        "UP" => KEY_UP_ARROW,
        "DOWN" => KEY_DOWN_ARROW,
        "LEFT" => KEY_LEFT_ARROW,
        "RIGHT" => KEY_RIGHT_ARROW,
        "CAPSLOCK" => KEY_CAPS_LOCK,
        "PRINTSCREEN" => KEY_PRINT_SCREEN,
        "MENU" | "APP" => KEY_APPLICATION,
        "PLUS" => KEY_EQUAL,
        "LBRACKET" => KEY_LEFT_BRACKET,
        "RBRACKET" => KEY_RIGHT_BRACKET,
        _ => {
            let n: u8 = name.strip_prefix('F')?.parse().ok()?;
            if (1..=12).contains(&n) {
                KEY_F1 + n - 1
            } else {
                return None;
            }
        }
    };
    Some(key)
}

/// Modifier bit for a modifier name; `name` must already be upper case
pub fn modifier_bit(name: &str) -> Option<u8> {
    let bit = match name {
        "CTRL" | "CONTROL" => modifier::LEFT_CTRL,
        "SHIFT" => modifier::LEFT_SHIFT,
        "ALT" => modifier::LEFT_ALT,
        "GUI" | "WIN" | "WINDOWS" | "SUPER" | "META" | "CMD" => modifier::LEFT_GUI,
        "RCTRL" => modifier::RIGHT_CTRL,
        "RSHIFT" => modifier::RIGHT_SHIFT,
        "RALT" | "ALTGR" => modifier::RIGHT_ALT,
        "RGUI" => modifier::RIGHT_GUI,
        _ => return None,
    };
    Some(bit)
}
