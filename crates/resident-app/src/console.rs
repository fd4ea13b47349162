//! User-facing output
//!
//! Status lines, errors, dumps and echoed application logs all go through a
//! shared [`Console`]. Diagnostics go to the log file via `tracing` instead.

use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::terminal::RawModeGuard;

pub trait Console: Send + Sync {
    fn print(&self, line: &str);

    fn error(&self, line: &str);

    /// Leave raw mode so the shell gets a sane terminal back.
    fn reset_terminal(&self) {}
}

/// Writes to stdout/stderr. In raw mode lines end in `\r\n`.
#[derive(Default)]
pub struct TerminalConsole {
    raw: Mutex<Option<RawModeGuard>>,
}

impl TerminalConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raw_mode(guard: RawModeGuard) -> Self {
        Self {
            raw: Mutex::new(Some(guard)),
        }
    }

    fn line_ending(&self) -> &'static str {
        match self.raw.lock() {
            Ok(raw) if raw.is_some() => "\r\n",
            _ => "\n",
        }
    }
}

impl Console for TerminalConsole {
    fn print(&self, line: &str) {
        let eol = self.line_ending();
        let mut out = std::io::stdout().lock();
        for part in line.lines() {
            let _ = write!(out, "{part}{eol}");
        }
        let _ = out.flush();
    }

    fn error(&self, line: &str) {
        let eol = self.line_ending();
        let mut out = std::io::stderr().lock();
        for part in line.lines() {
            let _ = write!(out, "{part}{eol}");
        }
        let _ = out.flush();
    }

    fn reset_terminal(&self) {
        if let Ok(mut raw) = self.raw.lock() {
            raw.take();
        }
    }
}

/// Measures a long operation for the "done in ..." line.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    started: Instant,
}

impl Progress {
    pub fn start(console: &dyn Console, label: &str) -> Self {
        console.print(label);
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> String {
        format_elapsed(self.started.elapsed())
    }
}

/// `512ms` below a second, `1.2s` above.
pub fn format_elapsed(elapsed: Duration) -> String {
    if elapsed < Duration::from_secs(1) {
        format!("{}ms", elapsed.as_millis())
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}

/// Console that records everything, for tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct BufferConsole {
    lines: Mutex<Vec<String>>,
    resets: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl BufferConsole {
    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub(crate) fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }

    pub(crate) fn resets(&self) -> usize {
        self.resets.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl Console for BufferConsole {
    fn print(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    fn error(&self, line: &str) {
        self.lines.lock().unwrap().push(format!("error: {line}"));
    }

    fn reset_terminal(&self) {
        self.resets
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(512)), "512ms");
        assert_eq!(format_elapsed(Duration::from_millis(1234)), "1.2s");
        assert_eq!(format_elapsed(Duration::from_secs(12)), "12.0s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reports_elapsed() {
        let console = BufferConsole::default();
        let progress = Progress::start(&console, "Performing hot reload...");
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(progress.elapsed(), "250ms");
        assert_eq!(console.lines(), vec!["Performing hot reload..."]);
    }
}
