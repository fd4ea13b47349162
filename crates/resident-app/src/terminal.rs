//! Raw-mode terminal input

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tokio::sync::mpsc;

use resident_core::prelude::*;

use crate::message::RunnerMessage;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Enables raw mode for its lifetime. Restores cooked mode on drop unless the
/// terminal was already raw.
#[derive(Debug)]
pub struct RawModeGuard {
    was_raw: bool,
}

impl RawModeGuard {
    pub fn new() -> Result<Self> {
        let was_raw = terminal::is_raw_mode_enabled().unwrap_or(false);
        if !was_raw {
            terminal::enable_raw_mode().map_err(|e| Error::terminal(e.to_string()))?;
        }
        Ok(Self { was_raw })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if !self.was_raw {
            let _ = terminal::disable_raw_mode();
        }
    }
}

/// Translate a key press. Ctrl+C stands in for SIGINT since raw mode
/// swallows it.
pub fn key_to_message(key: KeyEvent) -> Option<RunnerMessage> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(RunnerMessage::Terminate)
        }
        KeyCode::Char(_) if key.modifiers.contains(KeyModifiers::CONTROL) => None,
        KeyCode::Char(c) => Some(RunnerMessage::Key(c)),
        _ => None,
    }
}

/// Background keystroke reader. Stops on drop.
pub struct KeyReader {
    stop: Arc<AtomicBool>,
}

impl KeyReader {
    pub fn spawn(tx: mpsc::Sender<RunnerMessage>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        tokio::task::spawn_blocking(move || {
            while !flag.load(Ordering::Relaxed) {
                match read_key() {
                    Ok(Some(message)) => {
                        if tx.blocking_send(message).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Terminal input failed: {}", e);
                        let _ = tx.blocking_send(RunnerMessage::InputClosed);
                        break;
                    }
                }
            }
            debug!("Key reader stopped");
        });

        Self { stop }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for KeyReader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_key() -> Result<Option<RunnerMessage>> {
    if !event::poll(POLL_INTERVAL)? {
        return Ok(None);
    }
    match event::read()? {
        Event::Key(key) => Ok(key_to_message(key)),
        _ => Ok(None),
    }
}
