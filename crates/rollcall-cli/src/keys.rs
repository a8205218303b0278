//! Non-blocking keyboard controls for the live session.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Quit,
    /// Reload today's attendance from the ledger.
    Reload,
    /// Print who is present so far.
    Summary,
}

/// Keeps the terminal in raw mode until dropped.
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            tracing::warn!(error = %e, "failed to restore terminal mode");
        }
    }
}

pub fn control_for(key: KeyEvent) -> Option<Control> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Control::Quit),
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(Control::Quit),
        KeyCode::Char('r') | KeyCode::Char('R') => Some(Control::Reload),
        KeyCode::Char('s') | KeyCode::Char('S') => Some(Control::Summary),
        _ => None,
    }
}

/// Drain pending terminal events and return the first control key, if any.
pub fn poll_control() -> io::Result<Option<Control>> {
    while event::poll(Duration::from_millis(0))? {
        if let Event::Key(key) = event::read()? {
            if let Some(control) = control_for(key) {
                return Ok(Some(control));
            }
        }
    }
    Ok(None)
}
