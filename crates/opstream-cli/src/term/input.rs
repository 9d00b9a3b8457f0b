//! Keystroke translation for the remote PTY.
//!
//! Keys are encoded the way an xterm-compatible terminal would send them.
//! `Ctrl-]` is the local escape prefix: `Ctrl-] r` reconnects, `Ctrl-] q`
//! quits, and `Ctrl-] Ctrl-]` sends a literal `Ctrl-]`.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// What the terminal loop should do with one key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Forward these bytes as input.
    Input(String),
    /// Escape prefix seen; waiting for the command key.
    Escape,
    Reconnect,
    Quit,
    Ignore,
}

const ESCAPE_BYTE: char = '\x1d';

/// Escape-prefix state machine.
#[derive(Debug, Default)]
pub struct KeyMapper {
    escaped: bool,
}

impl KeyMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&mut self, key: KeyEvent) -> KeyAction {
        if std::mem::take(&mut self.escaped) {
            return match key.code {
                _ if is_escape(&key) => KeyAction::Input(ESCAPE_BYTE.to_string()),
                KeyCode::Char('r' | 'R') => KeyAction::Reconnect,
                KeyCode::Char('q' | 'Q' | '.') => KeyAction::Quit,
                _ => encode(&key).map_or(KeyAction::Ignore, KeyAction::Input),
            };
        }
        if is_escape(&key) {
            self.escaped = true;
            return KeyAction::Escape;
        }
        encode(&key).map_or(KeyAction::Ignore, KeyAction::Input)
    }
}

// Terminals report Ctrl-] as Ctrl-5 in legacy mode.
fn is_escape(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && matches!(key.code, KeyCode::Char(']' | '5'))
}

/// Bytes a terminal sends for `key`, if any.
pub fn encode(key: &KeyEvent) -> Option<String> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    let seq = match key.code {
        KeyCode::Char(c) if ctrl => control_char(c)?.to_string(),
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Enter => "\r".into(),
        KeyCode::Tab => "\t".into(),
        KeyCode::BackTab => "\x1b[Z".into(),
        KeyCode::Backspace => "\x7f".into(),
        KeyCode::Esc => "\x1b".into(),
        KeyCode::Up => "\x1b[A".into(),
        KeyCode::Down => "\x1b[B".into(),
        KeyCode::Right => "\x1b[C".into(),
        KeyCode::Left => "\x1b[D".into(),
        KeyCode::Home => "\x1b[H".into(),
        KeyCode::End => "\x1b[F".into(),
        KeyCode::Insert => "\x1b[2~".into(),
        KeyCode::Delete => "\x1b[3~".into(),
        KeyCode::PageUp => "\x1b[5~".into(),
        KeyCode::PageDown => "\x1b[6~".into(),
        KeyCode::F(n) => function_key(n)?.into(),
        _ => return None,
    };

    if alt && matches!(key.code, KeyCode::Char(_)) {
        return Some(format!("\x1b{seq}"));
    }
    Some(seq)
}

fn control_char(c: char) -> Option<char> {
    let byte = match c {
        'a'..='z' | 'A'..='Z' => u8::try_from(c).ok()? & 0x1f,
        '@' | ' ' | '2' => 0x00,
        '[' | '3' => 0x1b,
        '\\' | '4' => 0x1c,
        ']' | '5' => 0x1d,
        '^' | '6' => 0x1e,
        '_' | '7' | '-' => 0x1f,
        '8' | '?' => 0x7f,
        _ => return None,
    };
    Some(char::from(byte))
}

const fn function_key(n: u8) -> Option<&'static str> {
    Some(match n {
        1 => "\x1bOP",
        2 => "\x1bOQ",
        3 => "\x1bOR",
        4 => "\x1bOS",
        5 => "\x1b[15~",
        6 => "\x1b[17~",
        7 => "\x1b[18~",
        8 => "\x1b[19~",
        9 => "\x1b[20~",
        10 => "\x1b[21~",
        11 => "\x1b[23~",
        12 => "\x1b[24~",
        _ => return None,
    })
}
