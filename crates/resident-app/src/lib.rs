//! resident-app - Sessions, run loop and local input for the resident runner
//!
//! Turns the daemon-level plumbing into a running application:
//!
//! - [`session`] - One device: launch or attach, connect, DevFS, reload/restart
//! - [`runner`] - The resident loop that serializes user requests across sessions
//! - [`message`] - Everything the loop reacts to
//! - [`input`], [`terminal`] - Key map, raw mode and the key reader
//! - [`signals`] - SIGINT/SIGTERM and the optional SIGUSR1/SIGUSR2 triggers
//! - [`watcher`] - Debounced file watching that feeds auto-reload
//! - [`console`] - Line output with raw-mode aware newlines
//! - [`oneshot`] - `devices`, `stop` and `screenshot` without a resident loop
//! - [`config`] - `.resident/config.toml`

pub mod config;
pub mod console;
pub mod input;
pub mod message;
pub mod oneshot;
pub mod runner;
pub mod session;
pub mod signals;
pub mod terminal;
pub mod watcher;

pub use console::{Console, TerminalConsole};
pub use message::RunnerMessage;
pub use runner::{DeviceResult, ResidentRunner, RunOutcome, RunnerConfig};
pub use session::{DeviceSession, SessionOptions, StartOutcome};
