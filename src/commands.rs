//! Command handlers behind the CLI

use std::path::{Path, PathBuf};
use std::sync::Arc;

use resident_app::config::{load_settings, Settings};
use resident_app::oneshot;
use resident_app::session::resolve_package;
use resident_app::signals::spawn_signal_handler;
use resident_app::terminal::{KeyReader, RawModeGuard};
use resident_app::watcher::{FileWatcher, WatcherConfig};
use resident_app::{
    Console, DeviceSession, ResidentRunner, RunnerConfig, SessionOptions, TerminalConsole,
};
use resident_core::prelude::*;
use resident_core::{DebuggingOptions, Device, RunMode, TargetPlatform};
use resident_daemon::{
    find_device, CommandDeviceSource, ConnectOptions, DeviceLauncher, DeviceRegistry,
    PackageStore, ProcessLauncher, ProjectPackageStore, ServiceConnector, WebSocketConnector,
};

use crate::cli::{AttachArgs, Cli, CliCommand, RunArgs};

/// Device query that selects every attached device.
const ALL_DEVICES: &str = "all";

/// Run the parsed command line. Returns the process exit code.
pub async fn run(cli: Cli) -> Result<i32> {
    color_eyre::install().map_err(|e| Error::terminal(e.to_string()))?;
    resident_core::logging::init()?;

    let project = match cli.project {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let project = dunce::canonicalize(&project)?;
    info!("Project: {}", project.display());
    let settings = load_settings(&project);

    let result = match cli.command {
        CliCommand::Run(args) => run_app(&project, &settings, args).await,
        CliCommand::Attach(args) => attach(&project, &settings, args).await,
        CliCommand::Devices => devices(&settings).await,
        CliCommand::Stop { debug_uri } => {
            let stopped =
                oneshot::stop_app(&WebSocketConnector, &debug_uri, &oneshot_options(&settings))
                    .await?;
            println!("Asked {stopped} view(s) to exit.");
            Ok(0)
        }
        CliCommand::Screenshot { debug_uri, out } => {
            let path = oneshot::take_screenshot(
                &WebSocketConnector,
                &debug_uri,
                &oneshot_options(&settings),
                out.as_deref(),
                &project,
            )
            .await?;
            println!("Screenshot written to {}.", path.display());
            Ok(0)
        }
    };

    if let Err(ref e) = result {
        error!("Fatal: {:?}", e);
    }
    info!("resident runner exiting");
    result
}

fn registry(settings: &Settings) -> DeviceRegistry<CommandDeviceSource> {
    let source = CommandDeviceSource::new(
        settings.discovery.program.clone(),
        settings.discovery.args.clone(),
    );
    DeviceRegistry::with_interval(source, settings.discovery.poll_interval())
}

async fn devices(settings: &Settings) -> Result<i32> {
    let lines = oneshot::list_devices(&registry(settings)).await?;
    if lines.is_empty() {
        println!("No devices detected.");
    }
    for line in lines {
        println!("{line}");
    }
    Ok(0)
}

/// One-shot commands only need the transport, not a healthy driver.
fn oneshot_options(settings: &Settings) -> ConnectOptions {
    ConnectOptions {
        health_check: false,
        ..settings.connection.connect_options()
    }
}

/// Pick the devices to run on. No query means the only attached device.
pub fn select_devices(devices: &[Device], queries: &[String]) -> Result<Vec<Device>> {
    if queries.iter().any(|q| q == ALL_DEVICES) {
        if devices.is_empty() {
            return Err(Error::device_not_found(ALL_DEVICES));
        }
        return Ok(devices.to_vec());
    }

    if queries.is_empty() {
        return match devices {
            [] => Err(Error::device_not_found("any attached device")),
            [only] => Ok(vec![only.clone()]),
            _ => Err(Error::config(format!(
                "{} devices attached; choose with --device-id (or --device-id all)",
                devices.len()
            ))),
        };
    }

    let mut selected: Vec<Device> = Vec::new();
    for query in queries {
        let device = find_device(devices, query).ok_or_else(|| Error::device_not_found(query))?;
        if !selected.iter().any(|d| d.id == device.id) {
            selected.push(device.clone());
        }
    }
    Ok(selected)
}

fn project_name(project: &Path) -> String {
    project
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app".to_string())
}

fn package_store(project: &Path, settings: &Settings) -> ProjectPackageStore {
    let name = settings
        .package
        .name
        .clone()
        .unwrap_or_else(|| project_name(project));
    let id = settings
        .package
        .id
        .clone()
        .unwrap_or_else(|| format!("com.example.{name}"));
    ProjectPackageStore::new(id, name, settings.package.platforms.clone())
}

pub fn session_options(
    project: &Path,
    settings: &Settings,
    mode: RunMode,
    target: Option<&Path>,
    start_paused: bool,
) -> SessionOptions {
    let target = target.unwrap_or(&settings.launch.target);
    let devfs = (settings.devfs.enabled && mode.is_debug())
        .then(|| settings.devfs.devfs_config(project, &project_name(project)));

    SessionOptions {
        project_root: project.to_path_buf(),
        target: project.join(target),
        mode,
        debugging: DebuggingOptions {
            debugging_enabled: mode != RunMode::Release,
            start_paused,
            observatory_port: None,
        },
        connect: settings.connection.connect_options(),
        devfs,
    }
}

/// Raw mode only makes sense when keys are read from a terminal.
fn console(resident: bool) -> Arc<dyn Console> {
    if resident && std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        match RawModeGuard::new() {
            Ok(guard) => return Arc::new(TerminalConsole::with_raw_mode(guard)),
            Err(e) => warn!("Raw mode unavailable: {}", e),
        }
    }
    Arc::new(TerminalConsole::new())
}

async fn run_app(project: &Path, settings: &Settings, args: RunArgs) -> Result<i32> {
    let registry = registry(settings);
    let devices = registry.devices().await?;
    let devices = select_devices(&devices, &args.device_ids)?;

    let mode = args.mode();
    let stay_resident = settings.behavior.stay_resident && !args.no_resident;
    let options = Arc::new(session_options(
        project,
        settings,
        mode,
        args.target.as_deref(),
        args.start_paused,
    ));
    let launcher = Arc::new(ProcessLauncher::new(settings.launch.launch_config(project)));
    let connector = Arc::new(WebSocketConnector);
    let store = package_store(project, settings);

    let mut sessions = Vec::new();
    for device in devices {
        match resolve_package(&store, &device) {
            Ok(package) => sessions.push(DeviceSession::new(
                device,
                package,
                Arc::clone(&launcher),
                Arc::clone(&connector),
                Arc::clone(&options),
            )),
            Err(e) => eprintln!("Skipping {}: {e}", device.display_name()),
        }
    }
    if sessions.is_empty() {
        return Err(Error::launch("no device can run this application"));
    }

    let config = RunnerConfig {
        mode,
        stay_resident,
        keep_app_running: settings.behavior.keep_app_running || args.keep_app_running,
        announce_dropped_input: settings.behavior.announce_dropped_input,
        screenshot_dir: project.to_path_buf(),
    };
    let mut runner = ResidentRunner::new(sessions, console(stay_resident), config);
    runner.start().await?;
    drive(runner, project, settings, stay_resident).await
}

async fn attach(project: &Path, settings: &Settings, args: AttachArgs) -> Result<i32> {
    let device = match &args.device_id {
        Some(query) => {
            let devices = registry(settings).devices().await?;
            find_device(&devices, query)
                .cloned()
                .ok_or_else(|| Error::device_not_found(query))?
        }
        None => Device::new("attached", "attached application", TargetPlatform::Unknown),
    };
    let store = package_store(project, settings);
    let package = store
        .get_package_for_platform(device.platform)
        .ok_or_else(|| Error::no_package(device.platform.as_str()))?;

    let options = Arc::new(session_options(project, settings, RunMode::Debug, None, false));
    let session = DeviceSession::new(
        device,
        package,
        Arc::new(ProcessLauncher::new(settings.launch.launch_config(project))),
        Arc::new(WebSocketConnector),
        options,
    );
    let config = RunnerConfig {
        mode: RunMode::Debug,
        stay_resident: true,
        keep_app_running: true,
        announce_dropped_input: settings.behavior.announce_dropped_input,
        screenshot_dir: project.to_path_buf(),
    };
    let mut runner = ResidentRunner::new(vec![session], console(true), config);
    runner.attach(&args.service_uri()).await?;
    drive(runner, project, settings, true).await
}

/// Wire keys, signals and the watcher into a started runner and run it.
async fn drive<L, C>(
    mut runner: ResidentRunner<L, C>,
    project: &Path,
    settings: &Settings,
    resident: bool,
) -> Result<i32>
where
    L: DeviceLauncher + Sync + 'static,
    C: ServiceConnector + Sync + 'static,
{
    let tx = runner.sender();
    let signals = spawn_signal_handler(tx.clone(), runner.wants_reload_signals());

    let mut watcher = FileWatcher::new(
        PathBuf::from(project),
        WatcherConfig::from(&settings.watcher),
    );
    if resident && settings.watcher.enabled && runner.is_hot_mode() {
        if let Err(e) = watcher.start(tx.clone()) {
            warn!("File watcher not started: {}", e);
        }
    }
    let keys = resident.then(|| KeyReader::spawn(tx));

    let outcome = runner.run().await;

    if let Some(keys) = keys {
        keys.stop();
    }
    watcher.stop();
    signals.abort();
    drop(runner);

    info!("Run ended: {:?}", outcome);
    Ok(outcome.exit_code())
}
