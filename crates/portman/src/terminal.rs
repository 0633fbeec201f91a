//! Raw terminal input.

use std::io;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::{debug, error};

/// Raw mode for as long as this guard lives.
pub struct RawMode(());

impl RawMode {
    pub fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        debug!("Terminal in raw mode");
        Ok(Self(()))
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            error!("Failed to restore terminal mode: {}", e);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Char(char),
    Quit,
    Ignore,
}

fn classify(key: &KeyEvent) -> KeyAction {
    if key.kind == KeyEventKind::Release {
        return KeyAction::Ignore;
    }
    match key.code {
        KeyCode::Char('c') | KeyCode::Char('C') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            KeyAction::Quit
        }
        KeyCode::Char(c) => KeyAction::Char(c),
        _ => KeyAction::Ignore,
    }
}

/// Characters typed at the terminal, ending at Ctrl-C.
pub fn keys() -> impl Iterator<Item = char> {
    std::iter::from_fn(|| loop {
        let event = match event::read() {
            Ok(event) => event,
            Err(e) => {
                error!("Reading terminal input failed: {}", e);
                return None;
            }
        };
        if let Event::Key(key) = event {
            match classify(&key) {
                KeyAction::Char(c) => return Some(c),
                KeyAction::Quit => return None,
                KeyAction::Ignore => {}
            }
        }
    })
}
