//! One device's slice of a run
//!
//! A [`DeviceSession`] owns everything the runner drives on a single target:
//! the launched application, its service connection and its DevFS mirror.
//! Operations that address "the app" fan out to every view the connection
//! currently reports.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use resident_core::prelude::*;
use resident_core::{DebuggingOptions, Device, OperationResult, RunMode};
use resident_daemon::vm_service::extensions::ext;
use resident_daemon::vm_service::{
    self, DebugDumpKind, DebugToggle, ReloadReport, VmRequestHandle, FILE_SYSTEM_ALREADY_EXISTS,
};
use resident_daemon::{
    ApplicationPackage, ConnectOptions, DevFs, DevFsConfig, DeviceLauncher, LogStream,
    PackageStore, ServiceConnection, ServiceConnector, VmDevFsOperations,
};

use crate::console::Console;
use crate::message::RunnerMessage;

/// Grace period after asking views to exit.
const EXIT_GRACE: Duration = Duration::from_millis(100);

/// How long a restarted application may take to initialize its framework.
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(60);

/// How every session of a run launches and connects.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub project_root: PathBuf,
    /// Absolute path of the entry point.
    pub target: PathBuf,
    pub mode: RunMode,
    pub debugging: DebuggingOptions,
    pub connect: ConnectOptions,
    /// `None` disables the DevFS mirror; reloads then use local file URIs.
    pub devfs: Option<DevFsConfig>,
}

#[derive(Debug)]
pub enum StartOutcome {
    WithService,
    /// Launched without debugging, so there is nothing to attach to.
    WithoutService,
    Failed(Error),
}

/// Per-view result of reload, reassemble and exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewResult {
    pub view_id: String,
    pub result: OperationResult,
}

/// Per-view value of a query or toggle.
#[derive(Debug)]
pub struct ViewOutput<T> {
    pub view_id: String,
    pub value: Result<T>,
}

/// Package for `device`'s platform, or [`Error::NoPackage`].
pub fn resolve_package(store: &dyn PackageStore, device: &Device) -> Result<ApplicationPackage> {
    store
        .get_package_for_platform(device.platform)
        .ok_or_else(|| Error::no_package(device.platform.as_str()))
}

pub struct DeviceSession<L, C> {
    device: Device,
    package: ApplicationPackage,
    launcher: Arc<L>,
    connector: Arc<C>,
    options: Arc<SessionOptions>,
    connection: Option<ServiceConnection>,
    devfs: Option<DevFs<VmDevFsOperations>>,
    launched: bool,
    attached: bool,
    events_tx: Option<mpsc::Sender<RunnerMessage>>,
    done_watch: Option<JoinHandle<()>>,
    log_echo: Option<JoinHandle<()>>,
}

impl<L, C> DeviceSession<L, C>
where
    L: DeviceLauncher + Sync,
    C: ServiceConnector + Sync,
{
    pub fn new(
        device: Device,
        package: ApplicationPackage,
        launcher: Arc<L>,
        connector: Arc<C>,
        options: Arc<SessionOptions>,
    ) -> Self {
        Self {
            device,
            package,
            launcher,
            connector,
            options,
            connection: None,
            devfs: None,
            launched: false,
            attached: false,
            events_tx: None,
            done_watch: None,
            log_echo: None,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| !c.is_done())
    }

    /// A connection exists but its transport is gone.
    pub fn has_lost_connection(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.is_done())
    }

    pub fn service_uri(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.uri())
    }

    /// Reload and restart are possible on this device.
    pub fn supports_hot_mode(&self) -> bool {
        self.connection.is_some() && self.device.capabilities.supports_restart
    }

    fn connection(&self) -> Result<&ServiceConnection> {
        self.connection.as_ref().ok_or_else(|| {
            Error::connection(format!("{} has no service connection", self.device.name))
        })
    }

    // ─────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────

    /// Launch the application and, when debugging, attach to it.
    pub async fn start(&mut self) -> StartOutcome {
        let options = Arc::clone(&self.options);
        self.launch(&options.debugging).await
    }

    async fn launch(&mut self, debugging: &DebuggingOptions) -> StartOutcome {
        let launch = self
            .launcher
            .start_app(
                &self.device,
                &self.package,
                self.options.mode,
                &self.options.target,
                debugging,
            )
            .await;

        let launch = match launch {
            Ok(result) if result.started => result,
            Ok(_) => {
                return StartOutcome::Failed(Error::launch(format!(
                    "{} did not start on {}",
                    self.package.name, self.device.name
                )))
            }
            Err(err) => return StartOutcome::Failed(err),
        };
        self.launched = true;

        let Some(uri) = launch.service_uri else {
            if debugging.debugging_enabled {
                return StartOutcome::Failed(Error::launch(format!(
                    "{} did not report a service URI",
                    self.device.name
                )));
            }
            return StartOutcome::WithoutService;
        };

        match self.connect(&uri).await {
            Ok(()) => StartOutcome::WithService,
            Err(err) => StartOutcome::Failed(err),
        }
    }

    /// Connect to an application that is already running.
    pub async fn attach(&mut self, uri: &str) -> Result<()> {
        self.attached = true;
        self.connect(uri).await
    }

    async fn connect(&mut self, uri: &str) -> Result<()> {
        let connection =
            ServiceConnection::connect(self.connector.as_ref(), uri, &self.options.connect)
                .await?;
        let handle = connection.handle().clone();
        self.connection = Some(connection);

        if let Some(config) = &self.options.devfs {
            let mut devfs = DevFs::new(VmDevFsOperations::new(handle), config.clone());
            create_devfs(&mut devfs).await?;
            let bytes = devfs.update(None).await?;
            debug!(
                "Initial sync to {}: {} bytes",
                self.device.name, bytes
            );
            self.devfs = Some(devfs);
        }

        self.arm_done_watch();
        Ok(())
    }

    /// Post [`RunnerMessage::ConnectionLost`] when the current connection
    /// goes away on its own. Re-armed after every reconnect.
    pub fn watch_connection(&mut self, tx: mpsc::Sender<RunnerMessage>) {
        self.events_tx = Some(tx);
        self.arm_done_watch();
    }

    fn arm_done_watch(&mut self) {
        if let Some(old) = self.done_watch.take() {
            old.abort();
        }
        let (Some(tx), Some(connection)) = (self.events_tx.clone(), self.connection.as_ref())
        else {
            return;
        };

        let mut done = connection.done_signal();
        let device_id = self.device.id.clone();
        self.done_watch = Some(tokio::spawn(async move {
            let _ = done.wait_for(|d| *d).await;
            let _ = tx.send(RunnerMessage::ConnectionLost { device_id }).await;
        }));
    }

    /// Close the connection without reporting it as lost.
    async fn disconnect(&mut self) {
        if let Some(watch) = self.done_watch.take() {
            watch.abort();
        }
        self.devfs = None;
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
    }

    /// Echo the device's output through `console`, prefixed when several
    /// devices share the terminal.
    pub fn start_log_echo(&mut self, console: Arc<dyn Console>, prefix: Option<String>) {
        self.stop_log_echo();
        let mut logs = self.launcher.log_reader(&self.device).subscribe_filtered();
        self.log_echo = Some(tokio::spawn(async move {
            while let Some(line) = logs.next().await {
                let text = match &prefix {
                    Some(prefix) => format!("[{prefix}] {}", line.text),
                    None => line.text,
                };
                match line.stream {
                    LogStream::Stdout => console.print(&text),
                    LogStream::Stderr => console.error(&text),
                }
            }
        }));
    }

    fn stop_log_echo(&mut self) {
        if let Some(echo) = self.log_echo.take() {
            echo.abort();
        }
    }

    /// Relaunch the application and wait for its first frame.
    pub async fn restart(&mut self) -> OperationResult {
        if self.attached {
            return OperationResult::error("Hot restart is not supported in attach mode");
        }
        if !self.device.capabilities.supports_restart {
            return OperationResult::error(format!(
                "{} does not support restart",
                self.device.name
            ));
        }

        self.disconnect().await;
        if let Err(err) = self.launcher.stop_app(&self.device, &self.package).await {
            warn!("Stopping {} before restart failed: {}", self.device.name, err);
        }

        // Paused at start, the isolate cannot announce its framework before
        // the new connection subscribes to the Extension stream.
        let mut debugging = self.options.debugging.clone();
        debugging.start_paused |= self.device.capabilities.supports_start_paused;

        match self.launch(&debugging).await {
            StartOutcome::WithService => {}
            StartOutcome::WithoutService => return OperationResult::ok("Restarted"),
            StartOutcome::Failed(err) => return OperationResult::error(err.to_string()),
        }

        if self.device.platform.emits_framework_init() {
            if let Err(err) = self.wait_for_first_frame().await {
                return OperationResult::error(err.to_string());
            }
        }
        OperationResult::ok("Restarted")
    }

    async fn wait_for_first_frame(&self) -> Result<()> {
        let connection = self.connection()?;
        let initialized = async {
            tokio::select! {
                seen = connection.wait_for_extension_event(ext::FRAMEWORK_INITIALIZATION) => seen,
                ready = framework_registered(connection) => ready,
                _ = connection.done() => Err(Error::connection(format!(
                    "{} exited before its first frame",
                    self.device.name
                ))),
            }
        };
        tokio::time::timeout(FIRST_FRAME_TIMEOUT, initialized)
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "{} did not initialize within {}s",
                    self.device.name,
                    FIRST_FRAME_TIMEOUT.as_secs()
                ))
            })?
    }

    /// Leave the application running and drop the connection.
    pub async fn detach(&mut self) {
        self.stop_log_echo();
        self.disconnect().await;
    }

    /// Tear down at the end of a run. Unless `keep_app_running`, the DevFS
    /// is removed and the application asked to exit, then stopped.
    pub async fn cleanup(&mut self, keep_app_running: bool) {
        self.stop_log_echo();
        if !keep_app_running {
            if let Some(devfs) = self.devfs.as_mut() {
                if let Err(err) = devfs.destroy().await {
                    debug!("DevFS cleanup on {} failed: {}", self.device.name, err);
                }
            }
            for view in self.stop_apps().await {
                if !view.result.is_ok() {
                    debug!("Exit of {} failed: {}", view.view_id, view.result.message);
                }
            }
        }
        self.disconnect().await;

        if !keep_app_running && self.launched && !self.attached {
            if let Err(err) = self.launcher.stop_app(&self.device, &self.package).await {
                warn!("Stopping app on {} failed: {}", self.device.name, err);
            }
            self.launched = false;
        }
    }

    // ─────────────────────────────────────────────────────────
    // Fan-out operations
    // ─────────────────────────────────────────────────────────

    /// Run `op` against every view that has an isolate, concurrently.
    async fn for_each_view<T, F, Fut>(&self, op: F) -> Result<Vec<ViewOutput<T>>>
    where
        F: Fn(VmRequestHandle, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let connection = self.connection()?;
        let views = connection.refresh_views().await?;
        let handle = connection.handle();

        let calls = views
            .iter()
            .filter_map(|view| match view.isolate_id() {
                Some(isolate) => Some((view.id.clone(), isolate.to_string())),
                None => {
                    trace!("View {} has no isolate yet", view.id);
                    None
                }
            })
            .map(|(view_id, isolate)| {
                let call = op(handle.clone(), isolate);
                async move {
                    ViewOutput {
                        view_id,
                        value: call.await,
                    }
                }
            });
        Ok(join_all(calls).await)
    }

    /// Push changed files to the device. `changed` limits the scan.
    pub async fn update_devfs(&mut self, changed: Option<&[PathBuf]>) -> Result<u64> {
        match self.devfs.as_mut() {
            Some(devfs) => devfs.update(changed).await,
            None => Ok(0),
        }
    }

    /// Remote URI of the entry point: inside the DevFS when there is one.
    fn entry_uri(&self) -> Option<Url> {
        let target: &Path = &self.options.target;
        self.devfs
            .as_ref()
            .and_then(|devfs| devfs.relocate(target))
            .or_else(|| Url::from_file_path(target).ok())
    }

    /// `reloadSources` on every view's isolate.
    pub async fn reload_sources(&self, pause: bool) -> Result<Vec<ViewResult>> {
        let root = self.entry_uri().map(String::from);
        let packages = self
            .devfs
            .as_ref()
            .and_then(|devfs| devfs.packages_uri())
            .map(String::from);

        let outputs = self
            .for_each_view(|handle, isolate| {
                let root = root.clone();
                let packages = packages.clone();
                async move {
                    vm_service::reload_sources(
                        &handle,
                        &isolate,
                        root.as_deref(),
                        packages.as_deref(),
                        pause,
                    )
                    .await
                }
            })
            .await?;

        Ok(outputs
            .into_iter()
            .map(|output| ViewResult {
                view_id: output.view_id,
                result: reload_result(output.value),
            })
            .collect())
    }

    /// Rebuild every view's widget tree.
    pub async fn reassemble(&self) -> Result<Vec<ViewResult>> {
        let outputs = self
            .for_each_view(|handle, isolate| async move {
                vm_service::reassemble(&handle, &isolate).await
            })
            .await?;
        Ok(outputs
            .into_iter()
            .map(|output| ViewResult {
                view_id: output.view_id,
                result: match output.value {
                    Ok(()) => OperationResult::ok("Reassembled"),
                    Err(err) => OperationResult::error(err.to_string()),
                },
            })
            .collect())
    }

    /// Ask every view's isolate to exit and return after a short grace
    /// period, answered or not.
    pub async fn stop_apps(&self) -> Vec<ViewResult> {
        let exits = self.for_each_view(|handle, isolate| async move {
            vm_service::exit_app(&handle, &isolate).await
        });
        let (outputs, ()) = tokio::join!(
            tokio::time::timeout(EXIT_GRACE, exits),
            tokio::time::sleep(EXIT_GRACE)
        );
        let outputs = match outputs {
            Ok(Ok(outputs)) => outputs,
            Ok(Err(err)) => {
                debug!("Cannot stop views on {}: {}", self.device.name, err);
                return Vec::new();
            }
            Err(_) => {
                debug!("Views on {} did not answer exit", self.device.name);
                return Vec::new();
            }
        };

        outputs
            .into_iter()
            .map(|output| ViewResult {
                view_id: output.view_id,
                result: match output.value {
                    Ok(()) => OperationResult::ok("Stopped"),
                    Err(err) => OperationResult::error(err.to_string()),
                },
            })
            .collect()
    }

    pub async fn debug_dump(&self, kind: DebugDumpKind) -> Result<Vec<ViewOutput<String>>> {
        self.for_each_view(|handle, isolate| async move {
            vm_service::debug_dump(&handle, &isolate, kind).await
        })
        .await
    }

    /// Flip `toggle` on every view. Returns the new per-view state.
    pub async fn toggle(&self, toggle: DebugToggle) -> Result<Vec<ViewOutput<bool>>> {
        self.for_each_view(|handle, isolate| async move {
            vm_service::flip_toggle(&handle, toggle, &isolate).await
        })
        .await
    }

    /// Switch every view to the next simulated platform, based on what the
    /// first view reports.
    pub async fn toggle_platform(&self) -> Result<String> {
        let connection = self.connection()?;
        let views = connection.refresh_views().await?;
        let first = views
            .iter()
            .find_map(|view| view.isolate_id())
            .ok_or_else(|| Error::protocol("no view with a running isolate"))?;

        let current = vm_service::platform_override(connection.handle(), first, None).await?;
        let next = vm_service::next_platform_override(&current);

        for output in self
            .for_each_view(|handle, isolate| async move {
                vm_service::platform_override(&handle, &isolate, Some(next)).await
            })
            .await?
        {
            output.value?;
        }
        Ok(next.to_string())
    }

    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        if !self.device.capabilities.supports_screenshot {
            return Err(Error::protocol(format!(
                "{} does not support screenshots",
                self.device.name
            )));
        }
        vm_service::screenshot(self.connection()?.handle()).await
    }
}

impl<L, C> Drop for DeviceSession<L, C> {
    fn drop(&mut self) {
        if let Some(watch) = self.done_watch.take() {
            watch.abort();
        }
        if let Some(echo) = self.log_echo.take() {
            echo.abort();
        }
    }
}

/// Create the DevFS, replacing one left behind by an earlier run. If the
/// stale one cannot be removed, fall back to a fresh name.
async fn create_devfs(devfs: &mut DevFs<VmDevFsOperations>) -> Result<Url> {
    match devfs.create().await {
        Err(err) if err.rpc_code() == Some(FILE_SYSTEM_ALREADY_EXISTS) => {}
        other => return other,
    }

    info!("DevFS '{}' already exists, replacing it", devfs.fs_name());
    match devfs.destroy_stale().await {
        Ok(()) => match devfs.create().await {
            Err(err) if err.rpc_code() == Some(FILE_SYSTEM_ALREADY_EXISTS) => {}
            other => return other,
        },
        Err(err) => warn!("Could not remove stale DevFS: {}", err),
    }

    let fresh = format!("{}-{:08x}", devfs.fs_name(), rand::random::<u32>());
    devfs.rename(fresh)?;
    devfs.create().await
}

/// Resolves when the isolate already lists the framework's extensions, which
/// happens when initialization was announced before we subscribed. Stays
/// pending otherwise.
async fn framework_registered(connection: &ServiceConnection) -> Result<()> {
    if connection.isolate_has_extension(ext::REASSEMBLE).await? {
        return Ok(());
    }
    std::future::pending().await
}

fn reload_result(report: Result<ReloadReport>) -> OperationResult {
    match report {
        Ok(report) if report.success => OperationResult::ok("Reloaded"),
        Ok(report) => OperationResult::error(report.reason().unwrap_or("reload rejected")),
        Err(err) => OperationResult::error(err.to_string()),
    }
}
