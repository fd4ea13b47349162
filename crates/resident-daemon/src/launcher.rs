//! Application launch collaborators
//!
//! [`DeviceLauncher`] starts and stops the application on a device and owns
//! the per-device [`LogReader`]. [`PackageStore`] resolves the application
//! package for a target platform. [`ProcessLauncher`] is the process-backed
//! launcher used by the `resident` binary: it spawns one child per device,
//! streams its output into the log reader and scrapes the service URI from
//! the startup banner.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};

use resident_core::prelude::*;
use resident_core::{DebuggingOptions, Device, RunMode, TargetPlatform};

use crate::log_reader::{LogLine, LogReader};
use crate::vm_service::to_ws_uri;

/// How long `stop_app` waits for a killed child to be reaped.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

static SERVICE_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:listening on|available at:?)\s+((?:https?|wss?)://\S+)")
        .expect("Invalid service URI regex")
});

/// Extracts a service URI from a launcher output line, normalised to a
/// WebSocket URI.
pub fn parse_service_uri(line: &str) -> Option<String> {
    let raw = SERVICE_URI.captures(line)?.get(1)?.as_str();
    to_ws_uri(raw).ok()
}

// ─────────────────────────────────────────────────────────
// Packages
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationPackage {
    pub id: String,
    pub name: String,
    pub platform: TargetPlatform,
}

pub trait PackageStore: Send + Sync {
    /// `None` means the application cannot run on `platform`.
    fn get_package_for_platform(&self, platform: TargetPlatform) -> Option<ApplicationPackage>;
}

/// Package store backed by project settings. An empty platform list accepts
/// every platform.
#[derive(Debug, Clone)]
pub struct ProjectPackageStore {
    id: String,
    name: String,
    platforms: Vec<TargetPlatform>,
}

impl ProjectPackageStore {
    pub fn new(id: impl Into<String>, name: impl Into<String>, platforms: Vec<TargetPlatform>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            platforms,
        }
    }
}

impl PackageStore for ProjectPackageStore {
    fn get_package_for_platform(&self, platform: TargetPlatform) -> Option<ApplicationPackage> {
        if !self.platforms.is_empty() && !self.platforms.contains(&platform) {
            return None;
        }
        Some(ApplicationPackage {
            id: self.id.clone(),
            name: self.name.clone(),
            platform,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Launcher trait
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchResult {
    pub started: bool,
    /// WebSocket URI of the service, when debugging was enabled.
    pub service_uri: Option<String>,
}

#[trait_variant::make(DeviceLauncher: Send)]
pub trait LocalDeviceLauncher {
    /// Starts `package` on `device`. Calling again after `stop_app` starts a
    /// fresh instance.
    async fn start_app(
        &self,
        device: &Device,
        package: &ApplicationPackage,
        mode: RunMode,
        main_path: &Path,
        options: &DebuggingOptions,
    ) -> Result<LaunchResult>;

    /// Returns `false` when nothing was running.
    async fn stop_app(&self, device: &Device, package: &ApplicationPackage) -> Result<bool>;

    fn log_reader(&self, device: &Device) -> LogReader;
}

// ─────────────────────────────────────────────────────────
// Process launcher
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub program: String,
    /// Argument template. `{device}`, `{target}`, `{mode}` and `{package}`
    /// are substituted per launch.
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub uri_timeout: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            program: "flutter".to_string(),
            args: ["run", "-d", "{device}", "-t", "{target}", "--{mode}"]
                .into_iter()
                .map(String::from)
                .collect(),
            working_dir: PathBuf::from("."),
            uri_timeout: Duration::from_secs(120),
        }
    }
}

impl LaunchConfig {
    pub fn build_args(
        &self,
        device: &Device,
        package: &ApplicationPackage,
        mode: RunMode,
        main_path: &Path,
        options: &DebuggingOptions,
    ) -> Vec<String> {
        let target = main_path.to_string_lossy();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace("{device}", &device.id)
                    .replace("{target}", &target)
                    .replace("{mode}", mode.as_arg())
                    .replace("{package}", &package.id)
            })
            .collect();

        if options.debugging_enabled {
            if options.start_paused {
                args.push("--start-paused".to_string());
            }
            if let Some(port) = options.observatory_port {
                args.push(format!("--host-vmservice-port={port}"));
            }
        }
        args
    }
}

struct RunningApp {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    exited: watch::Receiver<bool>,
}

impl RunningApp {
    async fn kill(mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        let reaped = tokio::time::timeout(STOP_TIMEOUT, self.exited.wait_for(|e| *e)).await;
        if reaped.is_err() {
            warn!("Process {:?} did not exit within {:?}", self.pid, STOP_TIMEOUT);
        }
    }
}

/// Launches the application by spawning a child process per device.
pub struct ProcessLauncher {
    config: LaunchConfig,
    running: Mutex<HashMap<String, RunningApp>>,
    readers: Mutex<HashMap<String, LogReader>>,
}

impl ProcessLauncher {
    pub fn new(config: LaunchConfig) -> Self {
        Self {
            config,
            running: Mutex::new(HashMap::new()),
            readers: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_running(&self, device: &Device) -> bool {
        self.running
            .lock()
            .map(|r| r.get(&device.id).is_some_and(|app| !*app.exited.borrow()))
            .unwrap_or(false)
    }

    fn take_running(&self, device_id: &str) -> Option<RunningApp> {
        self.running.lock().ok()?.remove(device_id)
    }

    fn spawn(&self, args: &[String]) -> Result<Child> {
        let program = which::which(&self.config.program).map_err(|e| {
            Error::launch(format!("'{}' not found on PATH: {e}", self.config.program))
        })?;

        info!("Spawning: {} {}", self.config.program, args.join(" "));

        Command::new(program)
            .args(args)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::launch(format!("failed to spawn {}: {e}", self.config.program)))
    }

    /// Owns `child` until it exits or a kill is requested.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        exited_tx: watch::Sender<bool>,
    ) {
        tokio::select! {
            result = child.wait() => match result {
                Ok(status) => info!("Application process exited with status: {:?}", status),
                Err(e) => error!("Error waiting for application process: {}", e),
            },
            _ = kill_rx => {
                debug!("Killing application process {:?}", child.id());
                if let Err(e) = child.kill().await {
                    error!("Failed to kill application process: {}", e);
                }
            }
        }
        let _ = exited_tx.send(true);
    }

    /// Forwards each line to `reader`; the first line carrying a service URI
    /// is also sent on `uri_tx`.
    async fn forward_lines<R>(
        stream: R,
        stderr: bool,
        reader: LogReader,
        uri_tx: mpsc::Sender<String>,
    ) where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(text)) => {
                    if let Some(uri) = parse_service_uri(&text) {
                        let _ = uri_tx.try_send(uri);
                    }
                    let line = if stderr {
                        LogLine::stderr(text)
                    } else {
                        LogLine::stdout(text)
                    };
                    reader.publish(line);
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Output stream closed: {}", e);
                    break;
                }
            }
        }
    }
}

impl DeviceLauncher for ProcessLauncher {
    async fn start_app(
        &self,
        device: &Device,
        package: &ApplicationPackage,
        mode: RunMode,
        main_path: &Path,
        options: &DebuggingOptions,
    ) -> Result<LaunchResult> {
        if let Some(previous) = self.take_running(&device.id) {
            debug!("Replacing previous instance on {}", device.id);
            previous.kill().await;
        }

        let args = self
            .config
            .build_args(device, package, mode, main_path, options);
        let mut child = self.spawn(&args)?;
        let pid = child.id();

        let reader = DeviceLauncher::log_reader(self, device);
        let (uri_tx, mut uri_rx) = mpsc::channel::<String>(1);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(Self::forward_lines(stdout, false, reader.clone(), uri_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(Self::forward_lines(stderr, true, reader, uri_tx));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = watch::channel(false);
        tokio::spawn(Self::wait_for_exit(child, kill_rx, exited_tx));

        let app = RunningApp {
            pid,
            kill_tx: Some(kill_tx),
            exited: exited_rx,
        };

        if !options.debugging_enabled {
            if let Ok(mut running) = self.running.lock() {
                running.insert(device.id.clone(), app);
            }
            return Ok(LaunchResult {
                started: true,
                service_uri: None,
            });
        }

        let found = tokio::time::timeout(self.config.uri_timeout, uri_rx.recv()).await;
        match found {
            Ok(Some(uri)) => {
                info!("{} reported service at {}", device.id, uri);
                if let Ok(mut running) = self.running.lock() {
                    running.insert(device.id.clone(), app);
                }
                Ok(LaunchResult {
                    started: true,
                    service_uri: Some(uri),
                })
            }
            Ok(None) => {
                app.kill().await;
                Err(Error::launch(format!(
                    "application on {} exited before reporting a service URI",
                    device.id
                )))
            }
            Err(_) => {
                app.kill().await;
                Err(Error::timeout(format!(
                    "no service URI from {} within {:?}",
                    device.id, self.config.uri_timeout
                )))
            }
        }
    }

    async fn stop_app(&self, device: &Device, _package: &ApplicationPackage) -> Result<bool> {
        match self.take_running(&device.id) {
            Some(app) => {
                app.kill().await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn log_reader(&self, device: &Device) -> LogReader {
        match self.readers.lock() {
            Ok(mut readers) => readers.entry(device.id.clone()).or_default().clone(),
            Err(_) => LogReader::new(),
        }
    }
}
