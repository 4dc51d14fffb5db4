//! Token compilation and boot keyboard reports

use super::keymap::char_to_key;
use super::types::{HidError, KeyEvent, PayloadToken};
use crate::otg::KEYBOARD_REPORT_LEN;

const REPORT_LEN: usize = KEYBOARD_REPORT_LEN as usize;

/// Boot protocol keyboard report: modifiers, reserved, six keycodes
pub type KeyboardReport = [u8; REPORT_LEN];

pub const RELEASE_REPORT: KeyboardReport = [0; REPORT_LEN];

/// Report bytes for an event; `None` for delays
pub fn report_for(event: &KeyEvent) -> Option<KeyboardReport> {
    match *event {
        KeyEvent::Press { modifiers, key } => {
            let mut report = RELEASE_REPORT;
            report[0] = modifiers;
            report[2] = key;
            Some(report)
        }
        KeyEvent::Release => Some(RELEASE_REPORT),
        KeyEvent::Delay(_) => None,
    }
}

fn press(events: &mut Vec<KeyEvent>, modifiers: u8, key: u8) {
    events.push(KeyEvent::Press { modifiers, key });
    events.push(KeyEvent::Release);
}

/// Every press is followed by its release
pub fn compile(tokens: &[PayloadToken]) -> Vec<KeyEvent> {
    let mut events = Vec::new();
    for token in tokens {
        match token {
            PayloadToken::Text(text) => {
                // Text tokens only hold characters the parser accepted
                for (modifiers, key) in text.chars().filter_map(char_to_key) {
                    press(&mut events, modifiers, key);
                }
            }
            PayloadToken::Delay(ms) => events.push(KeyEvent::Delay(*ms)),
            PayloadToken::Combo { modifiers, key } => press(&mut events, *modifiers, *key),
        }
    }
    events
}

/// Literal text with an optional pause between characters
///
/// `\n` types Enter and `\r` is dropped.
pub fn compile_text(text: &str, delay_ms: u64) -> Result<Vec<KeyEvent>, HidError> {
    let mut events = Vec::new();
    let mut line = 1;
    let mut column = 0;

    for ch in text.chars() {
        column += 1;
        if ch == '\r' {
            continue;
        }
        let (modifiers, key) =
            char_to_key(ch).ok_or(HidError::UnsupportedCharacter { ch, line, column })?;
        if delay_ms > 0 && !events.is_empty() {
            events.push(KeyEvent::Delay(delay_ms));
        }
        press(&mut events, modifiers, key);
        if ch == '\n' {
            line += 1;
            column = 0;
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::keymap::{modifier, usb};
    use crate::payload::parser::parse_script;

    #[test]
    fn test_press_release_pairs() {
        let tokens = parse_script("Hi[DELAY:20][CTRL+c]").unwrap();
        let events = compile(&tokens);
        assert_eq!(
            events,
            vec![
                KeyEvent::Press {
                    modifiers: modifier::LEFT_SHIFT,
                    key: 0x0B
                },
                KeyEvent::Release,
                KeyEvent::Press {
                    modifiers: 0,
                    key: 0x0C
                },
                KeyEvent::Release,
                KeyEvent::Delay(20),
                KeyEvent::Press {
                    modifiers: modifier::LEFT_CTRL,
                    key: 0x06
                },
                KeyEvent::Release,
            ]
        );
    }

    #[test]
    fn test_report_layout() {
        let report = report_for(&KeyEvent::Press {
            modifiers: modifier::LEFT_GUI,
            key: usb::KEY_ENTER,
        })
        .unwrap();
        assert_eq!(report, [0x08, 0, 0x28, 0, 0, 0, 0, 0]);
        assert_eq!(report_for(&KeyEvent::Release), Some(RELEASE_REPORT));
        assert_eq!(report_for(&KeyEvent::Delay(5)), None);
    }

    #[test]
    fn test_compile_text() {
        let events = compile_text("a\r\nb", 0).unwrap();
        assert_eq!(events.len(), 6);
        assert_eq!(
            events[2],
            KeyEvent::Press {
                modifiers: 0,
                key: usb::KEY_ENTER
            }
        );

        let events = compile_text("ab", 15).unwrap();
        assert_eq!(events[2], KeyEvent::Delay(15));
        assert_eq!(events.len(), 5);

        let err = compile_text("ok\nß", 0).unwrap_err();
        assert_eq!(
            err,
            HidError::UnsupportedCharacter {
                ch: 'ß',
                line: 2,
                column: 1
            }
        );
    }
}
