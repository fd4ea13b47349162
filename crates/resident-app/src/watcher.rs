//! Source watcher for automatic hot reload
//!
//! Watches the configured paths and posts [`RunnerMessage::FilesChanged`]
//! with the debounced set of matching paths.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind};
use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult, DebouncedEvent};
use tokio::sync::{mpsc, oneshot};

use resident_core::prelude::*;

use crate::config::WatcherSettings;
use crate::message::RunnerMessage;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Paths to watch (relative to project root)
    pub paths: Vec<PathBuf>,
    pub debounce: Duration,
    /// File extensions to report (empty = all files)
    pub extensions: Vec<String>,
}

impl From<&WatcherSettings> for WatcherConfig {
    fn from(settings: &WatcherSettings) -> Self {
        Self {
            paths: settings.paths.iter().map(PathBuf::from).collect(),
            debounce: Duration::from_millis(settings.debounce_ms),
            extensions: settings.extensions.clone(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::from(&WatcherSettings::default())
    }
}

/// Whether `path` carries one of `extensions`. An empty list matches all.
pub fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e == ext))
        .unwrap_or(false)
}

/// Events that can move a whole directory of sources.
fn moves_tree(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Remove(RemoveKind::Folder)
            | EventKind::Create(CreateKind::Folder)
    )
}

/// Distinct matching paths across a debounced batch, in sorted order.
/// Directories that were renamed, created or removed are kept too.
pub fn changed_paths(events: &[DebouncedEvent], extensions: &[String]) -> Vec<PathBuf> {
    events
        .iter()
        .flat_map(|event| {
            let tree = moves_tree(&event.kind);
            event.paths.iter().filter(move |path| {
                matches_extension(path, extensions)
                    || (tree && (path.is_dir() || path.extension().is_none()))
            })
        })
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub struct FileWatcher {
    project_root: PathBuf,
    config: WatcherConfig,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl FileWatcher {
    pub fn new(project_root: PathBuf, config: WatcherConfig) -> Self {
        Self {
            project_root,
            config,
            stop_tx: None,
        }
    }

    pub fn start(&mut self, message_tx: mpsc::Sender<RunnerMessage>) -> Result<()> {
        if self.is_running() {
            return Err(Error::config("file watcher is already running"));
        }

        let project_root = self.project_root.clone();
        let config = self.config.clone();
        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);

        tokio::task::spawn_blocking(move || {
            Self::run_watcher(project_root, config, message_tx, stop_rx);
        });
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    fn run_watcher(
        project_root: PathBuf,
        config: WatcherConfig,
        message_tx: mpsc::Sender<RunnerMessage>,
        stop_rx: oneshot::Receiver<()>,
    ) {
        let tx = message_tx.clone();
        let extensions = config.extensions.clone();

        let debouncer = new_debouncer(
            config.debounce,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let paths = changed_paths(&events, &extensions);
                    if paths.is_empty() {
                        return;
                    }
                    debug!("File watcher detected {} changed file(s)", paths.len());
                    let _ = tx.blocking_send(RunnerMessage::FilesChanged(paths));
                }
                Err(errors) => {
                    for error in errors {
                        warn!("File watcher error: {:?}", error);
                        let _ = tx.blocking_send(RunnerMessage::WatcherError(error.to_string()));
                    }
                }
            },
        );

        let mut debouncer = match debouncer {
            Ok(d) => d,
            Err(e) => {
                error!("Failed to create file watcher: {}", e);
                let _ = message_tx.blocking_send(RunnerMessage::WatcherError(format!(
                    "Failed to create watcher: {e}"
                )));
                return;
            }
        };

        for relative_path in &config.paths {
            let full_path = project_root.join(relative_path);
            if !full_path.exists() {
                warn!("Watch path does not exist: {}", full_path.display());
                continue;
            }
            match debouncer.watch(&full_path, RecursiveMode::Recursive) {
                Ok(()) => info!("Watching: {}", full_path.display()),
                Err(e) => warn!("Failed to watch {}: {}", full_path.display(), e),
            }
        }

        // Sender dropped counts as a stop request.
        let _ = stop_rx.blocking_recv();
        info!("File watcher stopping");
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
