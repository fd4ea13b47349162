//! Line-oriented broadcast of application output.

use std::sync::LazyLock;

use regex::Regex;
use tokio::sync::broadcast;

use resident_core::prelude::*;

const LOG_CHANNEL_CAPACITY: usize = 1024;

/// Startup banners announcing service endpoints. The runner reports the
/// connection itself, so these are not echoed.
static SERVICE_BANNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:observatory|diagnostic server|dart vm service|vm service)\b.*\b(?:listening on|is available at)\b",
    )
    .expect("Invalid service banner regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub stream: LogStream,
    pub text: String,
}

impl LogLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: LogStream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: LogStream::Stderr,
            text: text.into(),
        }
    }
}

/// Whether `line` is a service-endpoint banner.
pub fn is_service_banner(line: &str) -> bool {
    SERVICE_BANNER.is_match(line)
}

/// Broadcast of one device's output lines. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct LogReader {
    tx: broadcast::Sender<LogLine>,
}

impl Default for LogReader {
    fn default() -> Self {
        Self::new()
    }
}

impl LogReader {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, line: LogLine) {
        trace!("{:?}: {}", line.stream, line.text);
        let _ = self.tx.send(line);
    }

    /// All lines, unfiltered.
    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.tx.subscribe()
    }

    /// Lines with service banners removed.
    pub fn subscribe_filtered(&self) -> FilteredLogs {
        FilteredLogs {
            rx: self.tx.subscribe(),
        }
    }
}

pub struct FilteredLogs {
    rx: broadcast::Receiver<LogLine>,
}

impl FilteredLogs {
    /// Next non-banner line; `None` once every publisher is gone.
    pub async fn next(&mut self) -> Option<LogLine> {
        loop {
            match self.rx.recv().await {
                Ok(line) if is_service_banner(&line.text) => continue,
                Ok(line) => return Some(line),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Log echo fell behind, skipped {} lines", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_banners_detected() {
        assert!(is_service_banner(
            "Observatory listening on http://127.0.0.1:8181/"
        ));
        assert!(is_service_banner(
            "flutter: Diagnostic server listening on http://127.0.0.1:8182/"
        ));
        assert!(is_service_banner(
            "A Dart VM Service on Linux is available at: http://127.0.0.1:40123/abc=/"
        ));
        assert!(!is_service_banner("flutter: listening on port 80 for HTTP"));
        assert!(!is_service_banner("Reloaded 1 of 512 libraries"));
    }

    #[tokio::test]
    async fn test_filtered_logs_skip_banners() {
        let reader = LogReader::new();
        let mut logs = reader.subscribe_filtered();

        reader.publish(LogLine::stdout(
            "Observatory listening on http://127.0.0.1:8181/",
        ));
        reader.publish(LogLine::stdout("flutter: hello"));
        reader.publish(LogLine::stderr("E/flutter: boom"));
        drop(reader);

        assert_eq!(logs.next().await, Some(LogLine::stdout("flutter: hello")));
        assert_eq!(logs.next().await, Some(LogLine::stderr("E/flutter: boom")));
        assert_eq!(logs.next().await, None);
    }
}
