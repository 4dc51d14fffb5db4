//! Line-oriented keystroke script parser

use super::keymap::{char_to_key, modifier_bit, named_key};
use super::types::{HidError, PayloadToken};

/// Parse a whole script; any bad character or bracket rejects all of it
///
/// Line breaks in the script are not typed. Use `[ENTER]`.
pub fn parse_script(script: &str) -> Result<Vec<PayloadToken>, HidError> {
    let mut tokens = Vec::new();

    for (index, raw) in script.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = raw.trim_start();
        if trimmed.is_empty() || trimmed.starts_with("//") {
            continue;
        }
        parse_line(raw, line_no, &mut tokens)?;
    }

    Ok(tokens)
}

fn parse_line(line: &str, line_no: usize, tokens: &mut Vec<PayloadToken>) -> Result<(), HidError> {
    let chars: Vec<char> = line.chars().collect();
    let mut text = String::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let column = i + 1;

        if ch == '[' {
            let Some(len) = chars[i + 1..].iter().position(|c| *c == ']') else {
                return Err(HidError::InvalidToken {
                    token: chars[i..].iter().collect(),
                    line: line_no,
                    column,
                });
            };
            let inner: String = chars[i + 1..i + 1 + len].iter().collect();

            if !text.is_empty() {
                tokens.push(PayloadToken::Text(std::mem::take(&mut text)));
            }
            tokens.push(parse_bracket(&inner, line_no, column)?);
            i += len + 2;
            continue;
        }

        if char_to_key(ch).is_none() {
            return Err(HidError::UnsupportedCharacter {
                ch,
                line: line_no,
                column,
            });
        }
        text.push(ch);
        i += 1;
    }

    if !text.is_empty() {
        tokens.push(PayloadToken::Text(text));
    }
    Ok(())
}

fn parse_bracket(inner: &str, line: usize, column: usize) -> Result<PayloadToken, HidError> {
    let invalid = || HidError::InvalidToken {
        token: format!("[{}]", inner),
        line,
        column,
    };

    let body = inner.trim();
    if let Some(ms) = body
        .strip_prefix("DELAY:")
        .or_else(|| body.strip_prefix("delay:"))
    {
        return ms.trim().parse().map(PayloadToken::Delay).map_err(|_| invalid());
    }

    let parts: Vec<&str> = body.split('+').map(str::trim).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(invalid());
    }

    let mut modifiers = 0u8;
    let mut key = 0u8;
    let last = parts.len() - 1;

    for (idx, part) in parts.iter().enumerate() {
        let upper = part.to_uppercase();
        if let Some(bit) = modifier_bit(&upper) {
            modifiers |= bit;
            continue;
        }
        // Only the last part may be a key
        if idx != last {
            return Err(invalid());
        }

        let mut chars = part.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => {
                // [CTRL+A] means the a key, not shift+a
                let ch = if ch.is_ascii_alphabetic() {
                    ch.to_ascii_lowercase()
                } else {
                    ch
                };
                let (shift, code) = char_to_key(ch).ok_or(HidError::UnsupportedCharacter {
                    ch,
                    line,
                    column: column + 1,
                })?;
                modifiers |= shift;
                key = code;
            }
            _ => key = named_key(&upper).ok_or_else(invalid)?,
        }
    }

    Ok(PayloadToken::Combo { modifiers, key })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::keymap::{modifier, usb};

    #[test]
    fn test_text_comments_and_blank_lines() {
        let tokens = parse_script("// open a shell\n\n   // indented comment\nwhoami\n").unwrap();
        assert_eq!(tokens, vec![PayloadToken::Text("whoami".into())]);
    }

    #[test]
    fn test_inline_brackets() {
        let tokens = parse_script("[GUI+r][DELAY:500]cmd[ENTER]").unwrap();
        assert_eq!(
            tokens,
            vec![
                PayloadToken::Combo {
                    modifiers: modifier::LEFT_GUI,
                    key: 0x15
                },
                PayloadToken::Delay(500),
                PayloadToken::Text("cmd".into()),
                PayloadToken::Combo {
                    modifiers: 0,
                    key: usb::KEY_ENTER
                },
            ]
        );
    }

    #[test]
    fn test_modifier_only_and_right_hand() {
        assert_eq!(
            parse_script("[CTRL+SHIFT]").unwrap(),
            vec![PayloadToken::Combo {
                modifiers: modifier::LEFT_CTRL | modifier::LEFT_SHIFT,
                key: 0
            }]
        );
        assert_eq!(
            parse_script("[ralt+f4]").unwrap(),
            vec![PayloadToken::Combo {
                modifiers: modifier::RIGHT_ALT,
                key: 0x3D
            }]
        );
        assert_eq!(
            parse_script("[CTRL+ALT+DEL]").unwrap(),
            vec![PayloadToken::Combo {
                modifiers: modifier::LEFT_CTRL | modifier::LEFT_ALT,
                key: usb::KEY_DELETE
            }]
        );
    }

    #[test]
    fn test_shifted_symbol_in_combo() {
        assert_eq!(
            parse_script("[CTRL+PLUS]").unwrap(),
            vec![PayloadToken::Combo {
                modifiers: modifier::LEFT_CTRL,
                key: usb::KEY_EQUAL
            }]
        );
        assert_eq!(
            parse_script("[CTRL+%]").unwrap(),
            vec![PayloadToken::Combo {
                modifiers: modifier::LEFT_CTRL | modifier::LEFT_SHIFT,
                key: 0x22
            }]
        );
    }

    #[test]
    fn test_unsupported_character_position() {
        let err = parse_script("echo ok\nprint(\"naïve\")").unwrap_err();
        assert_eq!(
            err,
            HidError::UnsupportedCharacter {
                ch: 'ï',
                line: 2,
                column: 10
            }
        );
        assert_eq!(err.code(), "unsupported_character");
    }

    #[test]
    fn test_invalid_tokens() {
        for script in ["[DELAY:soon]", "[CTRL+]", "[]", "[CTRL+FOO]", "[ENTER+CTRL+A]", "abc [TAB"] {
            let err = parse_script(script).unwrap_err();
            assert_eq!(err.code(), "invalid_token", "{}", script);
        }
        match parse_script("ok\n  [BOGUS]").unwrap_err() {
            HidError::InvalidToken { line, column, .. } => {
                assert_eq!((line, column), (2, 3));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
