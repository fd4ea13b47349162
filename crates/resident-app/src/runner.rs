//! The resident run loop
//!
//! [`ResidentRunner`] drives a set of [`DeviceSession`]s as one unit. Every
//! input (keys, signals, file changes, connection loss) arrives on a single
//! queue. At most one operation runs at a time: while one is in flight,
//! further triggers are dropped rather than queued. A termination request
//! gives the current operation [`TERMINATE_GRACE`] to finish, then abandons
//! it so cleanup can run.
//!
//! An operation takes the sessions by value and hands them back when done,
//! so the loop keeps reading the queue while it runs.

use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep_until, Duration, Instant};

use resident_core::prelude::*;
use resident_core::{OperationResult, RunMode};
use resident_daemon::vm_service::{DebugDumpKind, DebugToggle};
use resident_daemon::{DeviceLauncher, ServiceConnector};

use crate::console::{Console, Progress};
use crate::input::{help_text, map_key, Command};
use crate::message::RunnerMessage;
use crate::session::{DeviceSession, StartOutcome, ViewResult};

const MESSAGE_CHANNEL_CAPACITY: usize = 64;

/// How long a termination request waits for the current operation.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub mode: RunMode,
    pub stay_resident: bool,
    /// Leave applications running on SIGINT/SIGTERM and connection loss.
    pub keep_app_running: bool,
    pub announce_dropped_input: bool,
    /// Where `s` writes screenshots.
    pub screenshot_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Debug,
            stay_resident: true,
            keep_app_running: false,
            announce_dropped_input: false,
            screenshot_dir: PathBuf::from("."),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Quit,
    Detached,
    /// SIGINT, SIGTERM or Ctrl+C.
    Terminated,
    /// A service connection went away on its own.
    ConnectionLost,
    /// Launched without staying resident.
    NotResident,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Terminated => 130,
            RunOutcome::Quit
            | RunOutcome::Detached
            | RunOutcome::ConnectionLost
            | RunOutcome::NotResident => 0,
        }
    }
}

/// Outcome of a reload or restart on one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResult {
    pub device_id: String,
    pub device_name: String,
    pub result: OperationResult,
}

enum Op {
    Command(Command),
    Reload(Vec<PathBuf>),
    Terminate,
    ConnectionLost(String),
}

impl Op {
    /// Teardown runs to completion. Anything else may be abandoned when the
    /// run is terminated.
    fn is_abandonable(&self) -> bool {
        !matches!(
            self,
            Op::Terminate
                | Op::ConnectionLost(_)
                | Op::Command(Command::Quit)
                | Op::Command(Command::Detach)
        )
    }
}

type OpFuture<L, C> = Pin<Box<dyn Future<Output = (Vec<DeviceSession<L, C>>, Option<RunOutcome>)>>>;

struct OpContext {
    console: Arc<dyn Console>,
    keep_app_running: bool,
    screenshot_dir: PathBuf,
}

pub struct ResidentRunner<L, C> {
    sessions: Vec<DeviceSession<L, C>>,
    console: Arc<dyn Console>,
    config: RunnerConfig,
    hot: bool,
    /// Set while an abandonable operation is in flight.
    abandon: Option<Arc<Notify>>,
    tx: mpsc::Sender<RunnerMessage>,
    rx: mpsc::Receiver<RunnerMessage>,
}

impl<L, C> ResidentRunner<L, C>
where
    L: DeviceLauncher + Sync + 'static,
    C: ServiceConnector + Sync + 'static,
{
    pub fn new(
        sessions: Vec<DeviceSession<L, C>>,
        console: Arc<dyn Console>,
        config: RunnerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        Self {
            sessions,
            console,
            config,
            hot: false,
            abandon: None,
            tx,
            rx,
        }
    }

    /// Sender for keys, signals and watcher events.
    pub fn sender(&self) -> mpsc::Sender<RunnerMessage> {
        self.tx.clone()
    }

    pub fn sessions(&self) -> &[DeviceSession<L, C>] {
        &self.sessions
    }

    /// Debug build with a live connection on every device.
    pub fn is_hot_mode(&self) -> bool {
        self.config.mode.is_debug()
            && !self.sessions.is_empty()
            && self.sessions.iter().all(|s| s.is_connected())
    }

    /// Whether SIGUSR1/SIGUSR2 should be registered.
    pub fn wants_reload_signals(&self) -> bool {
        self.config.stay_resident
            && self.is_hot_mode()
            && self.sessions.iter().all(|s| s.supports_hot_mode())
    }

    // ─────────────────────────────────────────────────────────
    // Startup
    // ─────────────────────────────────────────────────────────

    /// Launch on every device. Devices that fail are reported and dropped;
    /// the run only fails if none started.
    pub async fn start(&mut self) -> Result<()> {
        let outcomes = join_all(self.sessions.iter_mut().map(|s| s.start())).await;

        let mut failed = Vec::new();
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let session = &self.sessions[index];
            let name = session.device().display_name();
            match outcome {
                StartOutcome::WithService => {
                    let uri = session.service_uri().unwrap_or_default();
                    self.console
                        .print(&format!("Connected to {name}. VM Service at {uri}"));
                }
                StartOutcome::WithoutService => {
                    self.console.print(&format!("Launched application on {name}."));
                }
                StartOutcome::Failed(err) => {
                    error!("Start on {} failed: {}", name, err);
                    self.console
                        .error(&format!("Error launching application on {name}: {err}"));
                    failed.push(index);
                }
            }
        }

        for index in failed.into_iter().rev() {
            let mut session = self.sessions.remove(index);
            session.cleanup(false).await;
        }
        if self.sessions.is_empty() {
            return Err(Error::launch("the application did not start on any device"));
        }

        self.finish_startup();
        Ok(())
    }

    /// Attach the first session to an application that is already running.
    pub async fn attach(&mut self, uri: &str) -> Result<()> {
        let session = self
            .sessions
            .first_mut()
            .ok_or_else(|| Error::device_not_found("no device to attach to"))?;
        session.attach(uri).await?;
        self.console.print(&format!(
            "Attached to {} at {uri}",
            session.device().display_name()
        ));

        self.finish_startup();
        Ok(())
    }

    fn finish_startup(&mut self) {
        let prefix_logs = self.sessions.len() > 1;
        for session in &mut self.sessions {
            session.watch_connection(self.tx.clone());
            let prefix = prefix_logs.then(|| session.device().name.clone());
            session.start_log_echo(Arc::clone(&self.console), prefix);
        }
        self.hot = self.is_hot_mode();
        if self.config.stay_resident {
            self.console.print(if self.hot {
                "Hot reload is ready. Press \"r\" to reload, \"h\" for help."
            } else {
                "Press \"h\" for a list of commands."
            });
        }
    }

    // ─────────────────────────────────────────────────────────
    // Run loop
    // ─────────────────────────────────────────────────────────

    /// Consume the queue until the run ends.
    pub async fn run(&mut self) -> RunOutcome {
        if !self.config.stay_resident {
            for session in &mut self.sessions {
                session.detach().await;
            }
            return RunOutcome::NotResident;
        }

        let mut in_flight: Option<OpFuture<L, C>> = None;
        let mut deferred: VecDeque<RunnerMessage> = VecDeque::new();
        let mut abandon_at: Option<Instant> = None;

        loop {
            if in_flight.is_none() {
                if let Some(message) = deferred.pop_front() {
                    in_flight = self.dispatch(message);
                    continue;
                }
            }

            tokio::select! {
                (sessions, finished) = poll_op(&mut in_flight) => {
                    self.sessions = sessions;
                    in_flight = None;
                    self.abandon = None;
                    abandon_at = None;
                    if let Some(outcome) = finished {
                        info!("Run finished: {:?}", outcome);
                        return outcome;
                    }
                }
                _ = sleep_until(abandon_at.unwrap_or_else(Instant::now)), if abandon_at.is_some() => {
                    abandon_at = None;
                    if let Some(abandon) = self.abandon.take() {
                        warn!("Operation still running after {:?}, abandoning it", TERMINATE_GRACE);
                        abandon.notify_one();
                    }
                }
                message = self.rx.recv() => {
                    // The runner holds a sender, so the queue never closes.
                    let Some(message) = message else {
                        continue;
                    };
                    if in_flight.is_none() {
                        in_flight = self.dispatch(message);
                    } else if message.is_trigger() {
                        self.drop_trigger(&message);
                    } else if let RunnerMessage::WatcherError(e) = &message {
                        self.console.error(&format!("File watcher: {e}"));
                    } else {
                        if message == RunnerMessage::Terminate
                            && self.abandon.is_some()
                            && abandon_at.is_none()
                        {
                            abandon_at = Some(Instant::now() + TERMINATE_GRACE);
                        }
                        debug!("Deferring {:?} until the current operation finishes", message);
                        deferred.push_back(message);
                    }
                }
            }
        }
    }

    fn drop_trigger(&self, message: &RunnerMessage) {
        trace!("Dropping {:?}: another operation is in progress", message);
        if self.config.announce_dropped_input {
            self.console
                .print("Busy: ignoring input while the current operation finishes.");
        }
    }

    /// Turn an idle-time message into an operation, or handle it inline.
    fn dispatch(&mut self, message: RunnerMessage) -> Option<OpFuture<L, C>> {
        let op = match message {
            RunnerMessage::Key(key) => match map_key(key, self.hot) {
                Some(Command::Help) => {
                    self.print_help();
                    return None;
                }
                Some(command) => Op::Command(command),
                None => {
                    trace!("Ignoring key {:?}", key);
                    return None;
                }
            },
            RunnerMessage::ReloadSignal if self.hot => Op::Command(Command::HotReload),
            RunnerMessage::RestartSignal if self.hot => Op::Command(Command::HotRestart),
            RunnerMessage::FilesChanged(paths) if self.hot => Op::Reload(paths),
            RunnerMessage::ReloadSignal
            | RunnerMessage::RestartSignal
            | RunnerMessage::FilesChanged(_) => {
                debug!("Ignoring {:?} outside hot mode", message);
                return None;
            }
            RunnerMessage::WatcherError(e) => {
                self.console.error(&format!("File watcher: {e}"));
                return None;
            }
            RunnerMessage::Terminate => Op::Terminate,
            RunnerMessage::ConnectionLost { device_id } => {
                let lost = self
                    .sessions
                    .iter()
                    .any(|s| s.device().id == device_id && s.has_lost_connection());
                if !lost {
                    debug!("Stale connection-lost notice for {}", device_id);
                    return None;
                }
                Op::ConnectionLost(device_id)
            }
            RunnerMessage::InputClosed => {
                debug!("Terminal input closed");
                return None;
            }
        };
        Some(self.begin(op))
    }

    fn begin(&mut self, op: Op) -> OpFuture<L, C> {
        let mut sessions = std::mem::take(&mut self.sessions);
        let ctx = OpContext {
            console: Arc::clone(&self.console),
            keep_app_running: self.config.keep_app_running,
            screenshot_dir: self.config.screenshot_dir.clone(),
        };
        let abandon = op.is_abandonable().then(|| Arc::new(Notify::new()));
        self.abandon = abandon.clone();

        Box::pin(async move {
            let finished = match abandon {
                Some(abandon) => tokio::select! {
                    finished = execute(&mut sessions, &ctx, op) => finished,
                    _ = abandon.notified() => {
                        ctx.console.error("Abandoned the current operation.");
                        None
                    }
                },
                None => execute(&mut sessions, &ctx, op).await,
            };
            (sessions, finished)
        })
    }

    fn print_help(&self) {
        for line in help_text(self.hot) {
            self.console.print(line);
        }
    }

    // ─────────────────────────────────────────────────────────
    // Direct entry points
    // ─────────────────────────────────────────────────────────

    pub async fn reload(&mut self, changed: Option<&[PathBuf]>) -> Vec<DeviceResult> {
        hot_reload(&mut self.sessions, self.console.as_ref(), changed).await
    }

    pub async fn restart(&mut self) -> Vec<DeviceResult> {
        hot_restart(&mut self.sessions, self.console.as_ref()).await
    }

    /// Tear down every session.
    pub async fn shutdown(&mut self, keep_app_running: bool) {
        cleanup_all(&mut self.sessions, keep_app_running).await;
    }
}

async fn poll_op<T>(op: &mut Option<Pin<Box<dyn Future<Output = T>>>>) -> T {
    match op {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn execute<L, C>(
    sessions: &mut Vec<DeviceSession<L, C>>,
    ctx: &OpContext,
    op: Op,
) -> Option<RunOutcome>
where
    L: DeviceLauncher + Sync,
    C: ServiceConnector + Sync,
{
    let console = ctx.console.as_ref();
    match op {
        Op::Reload(paths) => {
            hot_reload(sessions, console, Some(paths.as_slice())).await;
            None
        }
        Op::Terminate => {
            console.reset_terminal();
            cleanup_all(sessions, ctx.keep_app_running).await;
            Some(RunOutcome::Terminated)
        }
        Op::ConnectionLost(device_id) => {
            info!("Connection to {} lost", device_id);
            console.reset_terminal();
            console.print("Lost connection to device.");
            cleanup_all(sessions, ctx.keep_app_running).await;
            Some(RunOutcome::ConnectionLost)
        }
        Op::Command(command) => run_command(sessions, ctx, command).await,
    }
}

async fn run_command<L, C>(
    sessions: &mut Vec<DeviceSession<L, C>>,
    ctx: &OpContext,
    command: Command,
) -> Option<RunOutcome>
where
    L: DeviceLauncher + Sync,
    C: ServiceConnector + Sync,
{
    let console = ctx.console.as_ref();
    match command {
        Command::HotReload => {
            hot_reload(sessions, console, None).await;
        }
        Command::HotRestart => {
            hot_restart(sessions, console).await;
        }
        Command::DumpWidgetTree => dump(sessions, console, DebugDumpKind::WidgetTree).await,
        Command::DumpRenderTree => dump(sessions, console, DebugDumpKind::RenderTree).await,
        Command::DumpLayerTree => dump(sessions, console, DebugDumpKind::LayerTree).await,
        Command::DumpSemanticsTree => {
            dump(sessions, console, DebugDumpKind::SemanticsTree).await
        }
        Command::ToggleDebugPaint => toggle(sessions, console, DebugToggle::DebugPaint).await,
        Command::TogglePerformanceOverlay => {
            toggle(sessions, console, DebugToggle::PerformanceOverlay).await
        }
        Command::TogglePlatform => toggle_platform(sessions, console).await,
        Command::Screenshot => screenshot(sessions, console, &ctx.screenshot_dir).await,
        Command::Quit => {
            console.print("Application finished.");
            cleanup_all(sessions, false).await;
            return Some(RunOutcome::Quit);
        }
        Command::Detach => {
            for session in sessions.iter_mut() {
                session.detach().await;
            }
            console.print("Detached; the application keeps running.");
            return Some(RunOutcome::Detached);
        }
        Command::Help => {
            for line in help_text(true) {
                console.print(line);
            }
        }
    }
    None
}

async fn cleanup_all<L, C>(sessions: &mut [DeviceSession<L, C>], keep_app_running: bool)
where
    L: DeviceLauncher + Sync,
    C: ServiceConnector + Sync,
{
    join_all(
        sessions
            .iter_mut()
            .map(|session| session.cleanup(keep_app_running)),
    )
    .await;
}

// ─────────────────────────────────────────────────────────
// Reload / restart
// ─────────────────────────────────────────────────────────

/// Why a device failed a per-view phase, counting failed views when the
/// device drives more than one.
fn view_failure(views: &[ViewResult]) -> Option<String> {
    let failed: Vec<&ViewResult> = views.iter().filter(|v| !v.result.is_ok()).collect();
    let first = failed.first()?;
    if views.len() == 1 {
        return Some(first.result.message.clone());
    }
    Some(format!(
        "{} of {} views failed: {}",
        failed.len(),
        views.len(),
        first.result.message
    ))
}

/// Sync and `reloadSources`, then reassemble, each phase with its own
/// progress line and failure report. A device that fails the first phase
/// is not reassembled; the others carry on.
async fn hot_reload<L, C>(
    sessions: &mut [DeviceSession<L, C>],
    console: &dyn Console,
    changed: Option<&[PathBuf]>,
) -> Vec<DeviceResult>
where
    L: DeviceLauncher + Sync,
    C: ServiceConnector + Sync,
{
    let progress = Progress::start(console, "Performing hot reload...");
    let mut reload_failures: Vec<Option<String>> = vec![None; sessions.len()];

    let synced = join_all(sessions.iter_mut().map(|s| s.update_devfs(changed))).await;
    for (index, result) in synced.into_iter().enumerate() {
        match result {
            Ok(bytes) => trace!("Synced {} bytes to {}", bytes, sessions[index].device().name),
            Err(err) => reload_failures[index] = Some(format!("syncing files failed: {err}")),
        }
    }

    let reloads = join_all(sessions.iter().enumerate().map(|(index, s)| {
        let skip = reload_failures[index].is_some();
        async move {
            if skip {
                None
            } else {
                Some(s.reload_sources(false).await)
            }
        }
    }))
    .await;
    for (index, reload) in reloads.into_iter().enumerate() {
        match reload {
            Some(Ok(views)) if views.is_empty() => {
                reload_failures[index] = Some("no views to reload".to_string());
            }
            Some(Ok(views)) => reload_failures[index] = view_failure(&views),
            Some(Err(err)) => reload_failures[index] = Some(err.to_string()),
            None => {}
        }
    }
    report_failures(console, sessions, &reload_failures, "Hot reload");

    let mut reassemble_failures: Vec<Option<String>> = vec![None; sessions.len()];
    if reload_failures.iter().any(Option::is_none) {
        let reassembling = Progress::start(console, "Reassembling application...");
        let reassembled = join_all(sessions.iter().enumerate().map(|(index, s)| {
            let skip = reload_failures[index].is_some();
            async move {
                if skip {
                    None
                } else {
                    Some(s.reassemble().await)
                }
            }
        }))
        .await;
        for (index, result) in reassembled.into_iter().enumerate() {
            match result {
                Some(Ok(views)) => reassemble_failures[index] = view_failure(&views),
                Some(Err(err)) => reassemble_failures[index] = Some(err.to_string()),
                None => {}
            }
        }
        report_failures(console, sessions, &reassemble_failures, "Reassemble");
        debug!("Reassemble took {}", reassembling.elapsed());
    }

    let failures = reload_failures
        .into_iter()
        .zip(reassemble_failures)
        .map(|(reload, reassemble)| {
            reload.or_else(|| reassemble.map(|message| format!("reassemble failed: {message}")))
        })
        .collect();
    let results = collect_results(sessions, failures, "Reloaded");
    report_summary(console, &results, "Reloaded", &progress);
    results
}

/// Relaunch every device and wait for its first frame.
async fn hot_restart<L, C>(
    sessions: &mut [DeviceSession<L, C>],
    console: &dyn Console,
) -> Vec<DeviceResult>
where
    L: DeviceLauncher + Sync,
    C: ServiceConnector + Sync,
{
    let progress = Progress::start(console, "Performing hot restart...");
    let outcomes = join_all(sessions.iter_mut().map(|s| s.restart())).await;
    let failures: Vec<Option<String>> = outcomes
        .into_iter()
        .map(|result| (!result.is_ok()).then_some(result.message))
        .collect();

    report_failures(console, sessions, &failures, "Hot restart");
    let results = collect_results(sessions, failures, "Restarted");
    report_summary(console, &results, "Restarted", &progress);
    results
}

fn collect_results<L, C>(
    sessions: &[DeviceSession<L, C>],
    failures: Vec<Option<String>>,
    ok_message: &str,
) -> Vec<DeviceResult>
where
    L: DeviceLauncher + Sync,
    C: ServiceConnector + Sync,
{
    sessions
        .iter()
        .zip(failures)
        .map(|(session, failure)| DeviceResult {
            device_id: session.device().id.clone(),
            device_name: session.device().name.clone(),
            result: match failure {
                Some(message) => OperationResult::error(message),
                None => OperationResult::ok(ok_message),
            },
        })
        .collect()
}

fn report_failures<L, C>(
    console: &dyn Console,
    sessions: &[DeviceSession<L, C>],
    failures: &[Option<String>],
    operation: &str,
) where
    L: DeviceLauncher + Sync,
    C: ServiceConnector + Sync,
{
    for (session, failure) in sessions.iter().zip(failures) {
        if let Some(message) = failure {
            let device = session.device();
            warn!("{} failed on {}: {}", operation, device.id, message);
            console.error(&format!("{operation} failed on {}: {message}", device.name));
        }
    }
}

fn report_summary(console: &dyn Console, results: &[DeviceResult], done: &str, progress: &Progress) {
    let succeeded = results.iter().filter(|r| r.result.is_ok()).count();
    if succeeded == results.len() {
        console.print(&format!(
            "{done} application on {succeeded} device(s) in {}.",
            progress.elapsed()
        ));
    } else {
        console.print(&format!(
            "{done} {succeeded} of {} device(s) in {}.",
            results.len(),
            progress.elapsed()
        ));
    }
}

// ─────────────────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────────────────

async fn dump<L, C>(sessions: &[DeviceSession<L, C>], console: &dyn Console, kind: DebugDumpKind)
where
    L: DeviceLauncher + Sync,
    C: ServiceConnector + Sync,
{
    let dumps = join_all(sessions.iter().map(|s| s.debug_dump(kind))).await;
    for (session, dump) in sessions.iter().zip(dumps) {
        let name = &session.device().name;
        match dump {
            Ok(views) => {
                for view in views {
                    match view.value {
                        Ok(text) => {
                            console.print(&format!("{} of {name} ({}):", kind.label(), view.view_id));
                            console.print(&text);
                        }
                        Err(err) => console.error(&format!(
                            "Dumping the {} of {} failed: {err}",
                            kind.label(),
                            view.view_id
                        )),
                    }
                }
            }
            Err(err) => console.error(&format!("Dumping the {} on {name} failed: {err}", kind.label())),
        }
    }
}

async fn toggle<L, C>(sessions: &[DeviceSession<L, C>], console: &dyn Console, which: DebugToggle)
where
    L: DeviceLauncher + Sync,
    C: ServiceConnector + Sync,
{
    let toggled = join_all(sessions.iter().map(|s| s.toggle(which))).await;
    for (session, result) in sessions.iter().zip(toggled) {
        let name = &session.device().name;
        match result {
            Ok(views) => {
                for view in views {
                    match view.value {
                        Ok(enabled) => console.print(&format!(
                            "{} {} on {name}.",
                            which.label(),
                            if enabled { "enabled" } else { "disabled" }
                        )),
                        Err(err) => console.error(&format!(
                            "Toggling {} on {} failed: {err}",
                            which.label(),
                            view.view_id
                        )),
                    }
                }
            }
            Err(err) => console.error(&format!("Toggling {} on {name} failed: {err}", which.label())),
        }
    }
}

async fn toggle_platform<L, C>(sessions: &[DeviceSession<L, C>], console: &dyn Console)
where
    L: DeviceLauncher + Sync,
    C: ServiceConnector + Sync,
{
    let switched = join_all(sessions.iter().map(|s| s.toggle_platform())).await;
    for (session, result) in sessions.iter().zip(switched) {
        let name = &session.device().name;
        match result {
            Ok(platform) => console.print(&format!("Switched operating system to {platform} on {name}.")),
            Err(err) => console.error(&format!("Switching platform on {name} failed: {err}")),
        }
    }
}

async fn screenshot<L, C>(sessions: &[DeviceSession<L, C>], console: &dyn Console, dir: &Path)
where
    L: DeviceLauncher + Sync,
    C: ServiceConnector + Sync,
{
    for session in sessions {
        let name = &session.device().name;
        console.print(&format!("Taking screenshot for {name}..."));
        let saved = match session.screenshot().await {
            Ok(png) => save_screenshot(dir, &png),
            Err(err) => Err(err),
        };
        match saved {
            Ok(path) => console.print(&format!("Screenshot written to {}.", path.display())),
            Err(err) => console.error(&format!("Screenshot of {name} failed: {err}")),
        }
    }
}

/// Write `png` to the first free `flutter_NN.png` in `dir`.
pub fn save_screenshot(dir: &Path, png: &[u8]) -> Result<PathBuf> {
    let path = (1..)
        .map(|n| dir.join(format!("flutter_{n:02}.png")))
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| Error::config("no free screenshot file name"))?;
    std::fs::write(&path, png)?;
    Ok(path)
}

#[cfg(test)]
mod tests;
