//! Messages consumed by the runner loop
//!
//! Keystrokes, OS signals, file watcher notifications and connection loss
//! all arrive on one queue with a single consumer.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerMessage {
    /// Keystroke from the terminal
    Key(char),

    /// SIGINT, SIGTERM or Ctrl+C in raw mode
    Terminate,

    /// SIGUSR1
    ReloadSignal,

    /// SIGUSR2
    RestartSignal,

    /// Debounced file changes under the watched paths
    FilesChanged(Vec<PathBuf>),

    WatcherError(String),

    /// The service connection of a device went away
    ConnectionLost { device_id: String },

    /// Terminal input ended
    InputClosed,
}

impl RunnerMessage {
    /// Messages that request an operation. These are dropped while another
    /// operation is in flight.
    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            RunnerMessage::Key(_)
                | RunnerMessage::ReloadSignal
                | RunnerMessage::RestartSignal
                | RunnerMessage::FilesChanged(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triggers() {
        assert!(RunnerMessage::Key('r').is_trigger());
        assert!(RunnerMessage::ReloadSignal.is_trigger());
        assert!(RunnerMessage::FilesChanged(vec![]).is_trigger());
        assert!(!RunnerMessage::Terminate.is_trigger());
        assert!(!RunnerMessage::ConnectionLost {
            device_id: "a".into()
        }
        .is_trigger());
    }
}
