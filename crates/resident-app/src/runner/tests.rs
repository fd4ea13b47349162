use std::path::Path;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::time::{sleep, Instant};

use resident_core::{DebuggingOptions, Device, DeviceCapabilities, TargetPlatform};
use resident_daemon::test_utils::{
    test_device, test_package, FakeConnector, FakeLauncher, FakeResponse, FakeVm, FAKE_PNG,
};
use resident_daemon::{ConnectOptions, DevFsConfig, LogLine};

use super::*;
use crate::console::BufferConsole;
use crate::session::SessionOptions;

type TestRunner = ResidentRunner<FakeLauncher, FakeConnector>;

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("lib")).unwrap();
    std::fs::write(dir.path().join("lib/main.dart"), "void main() {}").unwrap();
    dir
}

fn options(root: &Path, mode: RunMode) -> Arc<SessionOptions> {
    let mut devfs = DevFsConfig::new(root, "app");
    devfs.paths = vec![PathBuf::from("lib")];
    Arc::new(SessionOptions {
        project_root: root.to_path_buf(),
        target: root.join("lib/main.dart"),
        mode,
        debugging: if mode.is_debug() {
            DebuggingOptions::enabled()
        } else {
            DebuggingOptions::disabled()
        },
        connect: ConnectOptions::default(),
        devfs: Some(devfs),
    })
}

struct Harness {
    dir: TempDir,
    launcher: FakeLauncher,
    connector: FakeConnector,
    console: Arc<BufferConsole>,
}

impl Harness {
    fn new(connector: FakeConnector) -> Self {
        Self {
            dir: project(),
            launcher: FakeLauncher::new(),
            connector,
            console: Arc::new(BufferConsole::default()),
        }
    }

    fn runner(&self, devices: Vec<Device>, config: RunnerConfig) -> TestRunner {
        let options = options(self.dir.path(), config.mode);
        let sessions = devices
            .into_iter()
            .map(|device| {
                DeviceSession::new(
                    device,
                    test_package(),
                    Arc::new(self.launcher.clone()),
                    Arc::new(self.connector.clone()),
                    Arc::clone(&options),
                )
            })
            .collect();
        let console: Arc<dyn Console> = self.console.clone();
        ResidentRunner::new(sessions, console, config)
    }
}

fn android(id: &str, name: &str) -> Device {
    test_device(&format!("android-{id}"), name)
}

fn slow_reload() -> FakeVm {
    FakeVm::new().respond(
        "reloadSources",
        FakeResponse::ok(json!({"type": "ReloadReport", "success": true}))
            .after(Duration::from_secs(2)),
    )
}

// ─────────────────────────────────────────────────────────
// Startup
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_drops_failed_devices() {
    let harness = Harness::new(FakeConnector::new(FakeVm::new()));
    harness.launcher.fail_starts_for("android-b");
    let mut runner = harness.runner(
        vec![android("a", "A"), android("b", "B"), android("c", "C")],
        RunnerConfig::default(),
    );

    runner.start().await.unwrap();

    let remaining: Vec<_> = runner.sessions().iter().map(|s| s.device().id.clone()).collect();
    assert_eq!(remaining, vec!["android-a", "android-c"]);
    assert!(harness.console.contains("Error launching application on B"));
    assert!(runner.is_hot_mode());
}

#[tokio::test]
async fn test_start_fails_when_no_device_starts() {
    let harness = Harness::new(FakeConnector::new(FakeVm::new()));
    harness.launcher.fail_starts_for("android-a");
    let mut runner = harness.runner(vec![android("a", "A")], RunnerConfig::default());

    assert!(runner.start().await.is_err());
    assert!(runner.sessions().is_empty());
}

#[tokio::test]
async fn test_release_mode_is_not_hot() {
    let harness = Harness::new(FakeConnector::new(FakeVm::new()));
    let config = RunnerConfig {
        mode: RunMode::Release,
        ..RunnerConfig::default()
    };
    let mut runner = harness.runner(vec![android("a", "A")], config);

    runner.start().await.unwrap();

    assert!(!runner.is_hot_mode());
    assert!(!runner.wants_reload_signals());
    assert_eq!(harness.connector.attempts(), 0);
}

#[tokio::test]
async fn test_reload_signals_need_restart_support_everywhere() {
    let harness = Harness::new(FakeConnector::new(FakeVm::new()));
    let limited = Device::new("android-b", "B", TargetPlatform::Android).with_capabilities(
        DeviceCapabilities {
            supports_restart: false,
            ..DeviceCapabilities::full()
        },
    );
    let mut runner = harness.runner(vec![android("a", "A"), limited], RunnerConfig::default());
    runner.start().await.unwrap();
    assert!(!runner.wants_reload_signals());

    let mut runner = harness.runner(vec![android("a", "A")], RunnerConfig::default());
    runner.start().await.unwrap();
    assert!(runner.wants_reload_signals());

    let config = RunnerConfig {
        stay_resident: false,
        ..RunnerConfig::default()
    };
    let mut runner = harness.runner(vec![android("a", "A")], config);
    runner.start().await.unwrap();
    assert!(!runner.wants_reload_signals());
}

#[tokio::test]
async fn test_multiple_devices_prefix_logs() {
    let harness = Harness::new(FakeConnector::new(FakeVm::new()));
    let mut runner = harness.runner(vec![android("a", "A"), android("b", "B")], RunnerConfig::default());
    runner.start().await.unwrap();
    let a = android("a", "A");

    harness
        .launcher
        .log_reader(&a)
        .publish(LogLine::stdout("flutter: hello"));

    tokio::time::timeout(Duration::from_secs(1), async {
        while !harness.console.contains("flutter: hello") {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(harness.console.contains("[A] flutter: hello"));
}

#[tokio::test]
async fn test_attach_connects_first_session() {
    let harness = Harness::new(FakeConnector::new(FakeVm::new()));
    let mut runner = harness.runner(vec![android("a", "A")], RunnerConfig::default());

    runner.attach("ws://127.0.0.1:8181/ws").await.unwrap();

    assert!(runner.sessions()[0].is_attached());
    assert!(runner.is_hot_mode());
    assert_eq!(harness.launcher.start_count(), 0);
}

// ─────────────────────────────────────────────────────────
// Reload / restart
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reload_failure_is_isolated_to_one_device() {
    let failing = android("b", "B");
    let connector = FakeConnector::new(FakeVm::new())
        .with_vm(&FakeLauncher::service_uri(&failing), FakeVm::new().failing_reload());
    let harness = Harness::new(connector);
    let mut runner = harness.runner(
        vec![android("a", "A"), failing, android("c", "C")],
        RunnerConfig::default(),
    );
    runner.start().await.unwrap();

    let results = runner.reload(None).await;

    assert_eq!(results.len(), 3);
    let failed: Vec<_> = results.iter().filter(|r| !r.result.is_ok()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].device_id, "android-b");
    assert!(failed[0].result.message.contains("Compilation failed"));
    assert!(harness.console.contains("Hot reload failed on B"));
    assert!(harness.console.contains("Reloaded 2 of 3 device(s)"));

    for device in ["android-a", "android-c"] {
        let uri = format!("ws://fake-{device}/ws");
        let control = harness.connector.control_for(&uri).unwrap();
        assert_eq!(control.count("reloadSources"), 1);
        assert!(control.count("ext.flutter.reassemble") >= 1);
    }
    let control = harness
        .connector
        .control_for("ws://fake-android-b/ws")
        .unwrap();
    assert_eq!(control.count("ext.flutter.reassemble"), 0);
}

#[tokio::test]
async fn test_reload_reports_success() {
    let harness = Harness::new(FakeConnector::new(FakeVm::new()));
    let mut runner = harness.runner(vec![android("a", "A")], RunnerConfig::default());
    runner.start().await.unwrap();

    let results = runner.reload(None).await;

    assert!(results[0].result.is_ok());
    assert!(harness.console.contains("Performing hot reload..."));
    assert!(harness.console.contains("Reloaded application on 1 device(s)"));
}

#[tokio::test]
async fn test_reassemble_failure_reported_as_its_own_phase() {
    let vm = FakeVm::new().respond(
        "ext.flutter.reassemble",
        FakeResponse::error(-32000, "Widget tree is locked"),
    );
    let harness = Harness::new(FakeConnector::new(vm));
    let mut runner = harness.runner(vec![android("a", "A")], RunnerConfig::default());
    runner.start().await.unwrap();

    let results = runner.reload(None).await;

    assert!(!results[0].result.is_ok());
    assert!(results[0].result.message.starts_with("reassemble failed"));
    let lines = harness.console.lines();
    let reload = lines.iter().position(|l| l == "Performing hot reload...").unwrap();
    let reassemble = lines
        .iter()
        .position(|l| l == "Reassembling application...")
        .unwrap();
    assert!(reload < reassemble);
    assert!(harness.console.contains("Reassemble failed on A"));
    assert!(!harness.console.contains("Hot reload failed"));
    assert!(harness.console.contains("Reloaded 0 of 1 device(s)"));
}

#[tokio::test]
async fn test_reload_counts_failing_views() {
    let vm = FakeVm::new().with_views(3).failing_reload_on("isolates/2");
    let harness = Harness::new(FakeConnector::new(vm));
    let mut runner = harness.runner(vec![android("a", "A")], RunnerConfig::default());
    runner.start().await.unwrap();

    let results = runner.reload(None).await;

    assert_eq!(
        results[0].result.message,
        "1 of 3 views failed: Compilation failed"
    );
    assert!(harness
        .console
        .contains("Hot reload failed on A: 1 of 3 views failed"));
    assert!(!harness.console.contains("Reassembling application..."));
    let control = harness.connector.last_control().unwrap();
    assert_eq!(control.count("reloadSources"), 3);
    assert_eq!(control.count("ext.flutter.reassemble"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_restart_reports_elapsed_time() {
    let connector =
        FakeConnector::new(FakeVm::new().initializes_framework_after(Duration::from_secs(1)));
    let harness = Harness::new(connector);
    let mut runner = harness.runner(vec![android("a", "A")], RunnerConfig::default());
    runner.start().await.unwrap();

    let results = runner.restart().await;

    assert!(results[0].result.is_ok());
    assert_eq!(harness.launcher.start_count(), 2);
    assert!(harness.console.contains("Restarted application on 1 device(s) in 1."));
}

// ─────────────────────────────────────────────────────────
// Run loop
// ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_restart_during_reload_is_dropped() {
    let harness = Harness::new(FakeConnector::new(slow_reload()));
    let mut runner = harness.runner(vec![android("a", "A")], RunnerConfig::default());
    runner.start().await.unwrap();
    let tx = runner.sender();

    let (outcome, ()) = tokio::join!(runner.run(), async move {
        tx.send(RunnerMessage::Key('r')).await.unwrap();
        sleep(Duration::from_millis(500)).await;
        tx.send(RunnerMessage::Key('R')).await.unwrap();
        sleep(Duration::from_secs(5)).await;
        tx.send(RunnerMessage::Key('q')).await.unwrap();
    });

    assert_eq!(outcome, RunOutcome::Quit);
    assert_eq!(harness.launcher.start_count(), 1);
    let control = harness.connector.last_control().unwrap();
    assert_eq!(control.count("reloadSources"), 1);
    assert!(!harness.console.contains("Busy"));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_input_is_announced_when_configured() {
    let harness = Harness::new(FakeConnector::new(slow_reload()));
    let config = RunnerConfig {
        announce_dropped_input: true,
        ..RunnerConfig::default()
    };
    let mut runner = harness.runner(vec![android("a", "A")], config);
    runner.start().await.unwrap();
    let tx = runner.sender();

    let (outcome, ()) = tokio::join!(runner.run(), async move {
        tx.send(RunnerMessage::ReloadSignal).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        tx.send(RunnerMessage::Key('r')).await.unwrap();
        sleep(Duration::from_secs(5)).await;
        tx.send(RunnerMessage::Key('q')).await.unwrap();
    });

    assert_eq!(outcome, RunOutcome::Quit);
    assert!(harness.console.contains("Busy"));
    let control = harness.connector.last_control().unwrap();
    assert_eq!(control.count("reloadSources"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_waits_for_current_operation() {
    let harness = Harness::new(FakeConnector::new(slow_reload()));
    let mut runner = harness.runner(vec![android("a", "A")], RunnerConfig::default());
    runner.start().await.unwrap();
    let tx = runner.sender();
    let started = Instant::now();

    let (outcome, ()) = tokio::join!(runner.run(), async move {
        tx.send(RunnerMessage::Key('r')).await.unwrap();
        sleep(Duration::from_millis(500)).await;
        tx.send(RunnerMessage::Terminate).await.unwrap();
    });

    assert_eq!(outcome, RunOutcome::Terminated);
    assert_eq!(outcome.exit_code(), 130);
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(harness.console.contains("Reloaded application on 1 device(s)"));
    assert!(!harness.console.contains("Abandoned"));
    assert_eq!(harness.launcher.stop_count(), 1);
    assert_eq!(harness.console.resets(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_abandons_reload_that_never_answers() {
    let vm = FakeVm::new().respond(
        "reloadSources",
        FakeResponse::ok(json!({"type": "ReloadReport", "success": true}))
            .after(Duration::from_secs(100_000)),
    );
    let harness = Harness::new(FakeConnector::new(vm));
    let mut runner = harness.runner(vec![android("a", "A")], RunnerConfig::default());
    runner.start().await.unwrap();
    let tx = runner.sender();
    let started = Instant::now();

    let (outcome, ()) = tokio::join!(runner.run(), async move {
        tx.send(RunnerMessage::Key('r')).await.unwrap();
        sleep(Duration::from_millis(500)).await;
        tx.send(RunnerMessage::Terminate).await.unwrap();
    });

    assert_eq!(outcome, RunOutcome::Terminated);
    assert!(started.elapsed() >= TERMINATE_GRACE);
    assert!(started.elapsed() < Duration::from_secs(60));
    assert!(harness.console.contains("Abandoned the current operation."));
    assert!(!harness.console.contains("Reloaded application"));
    assert_eq!(harness.console.resets(), 1);
    assert_eq!(harness.launcher.stop_count(), 1);
}

#[tokio::test]
async fn test_quit_stops_applications() {
    let harness = Harness::new(FakeConnector::new(FakeVm::new()));
    let mut runner = harness.runner(vec![android("a", "A"), android("b", "B")], RunnerConfig::default());
    runner.start().await.unwrap();
    runner.sender().send(RunnerMessage::Key('q')).await.unwrap();

    let outcome = runner.run().await;

    assert_eq!(outcome, RunOutcome::Quit);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(harness.launcher.stop_count(), 2);
    let control = harness.connector.last_control().unwrap();
    assert_eq!(control.count("ext.flutter.exit"), 1);
}

#[tokio::test]
async fn test_detach_leaves_applications_running() {
    let harness = Harness::new(FakeConnector::new(FakeVm::new()));
    let mut runner = harness.runner(vec![android("a", "A")], RunnerConfig::default());
    runner.start().await.unwrap();
    runner.sender().send(RunnerMessage::Key('d')).await.unwrap();

    assert_eq!(runner.run().await, RunOutcome::Detached);
    assert_eq!(harness.launcher.stop_count(), 0);
    let control = harness.connector.last_control().unwrap();
    assert_eq!(control.count("ext.flutter.exit"), 0);
}

#[tokio::test]
async fn test_terminate_keeps_apps_when_configured() {
    let harness = Harness::new(FakeConnector::new(FakeVm::new()));
    let config = RunnerConfig {
        keep_app_running: true,
        ..RunnerConfig::default()
    };
    let mut runner = harness.runner(vec![android("a", "A")], config);
    runner.start().await.unwrap();
    runner.sender().send(RunnerMessage::Terminate).await.unwrap();

    assert_eq!(runner.run().await, RunOutcome::Terminated);
    assert_eq!(harness.launcher.stop_count(), 0);
    assert_eq!(harness.console.resets(), 1);
}

#[tokio::test]
async fn test_connection_loss_resets_terminal_and_finishes() {
    let harness = Harness::new(FakeConnector::new(FakeVm::new()));
    let mut runner = harness.runner(vec![android("a", "A")], RunnerConfig::default());
    runner.start().await.unwrap();
    harness.connector.last_control().unwrap().disconnect();

    let outcome = runner.run().await;

    assert_eq!(outcome, RunOutcome::ConnectionLost);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(harness.console.resets(), 1);
    assert!(harness.console.contains("Lost connection to device."));
}

#[tokio::test]
async fn test_non_resident_run_returns_immediately() {
    let harness = Harness::new(FakeConnector::new(FakeVm::new()));
    let config = RunnerConfig {
        stay_resident: false,
        ..RunnerConfig::default()
    };
    let mut runner = harness.runner(vec![android("a", "A")], config);
    runner.start().await.unwrap();

    assert_eq!(runner.run().await, RunOutcome::NotResident);
    assert_eq!(harness.launcher.stop_count(), 0);
}

#[tokio::test]
async fn test_reload_keys_ignored_outside_hot_mode() {
    let harness = Harness::new(FakeConnector::new(FakeVm::new()));
    let config = RunnerConfig {
        mode: RunMode::Profile,
        ..RunnerConfig::default()
    };
    let mut runner = harness.runner(vec![android("a", "A")], config);
    runner.start().await.unwrap();
    let tx = runner.sender();
    tx.send(RunnerMessage::Key('r')).await.unwrap();
    tx.send(RunnerMessage::ReloadSignal).await.unwrap();
    tx.send(RunnerMessage::Key('q')).await.unwrap();

    assert_eq!(runner.run().await, RunOutcome::Quit);
    assert!(!harness.console.contains("Performing hot reload"));
}

#[tokio::test]
async fn test_file_changes_trigger_reload() {
    let harness = Harness::new(FakeConnector::new(FakeVm::new()));
    let mut runner = harness.runner(vec![android("a", "A")], RunnerConfig::default());
    runner.start().await.unwrap();
    let changed = harness.dir.path().join("lib/widget.dart");
    std::fs::write(&changed, "class W {}").unwrap();

    let tx = runner.sender();
    tx.send(RunnerMessage::FilesChanged(vec![changed])).await.unwrap();
    tx.send(RunnerMessage::Key('q')).await.unwrap();

    assert_eq!(runner.run().await, RunOutcome::Quit);
    let control = harness.connector.last_control().unwrap();
    assert_eq!(control.count("reloadSources"), 1);
    assert!(control
        .devfs_uploads("app")
        .contains(&"lib/widget.dart".to_string()));
}

#[tokio::test]
async fn test_help_and_toggles() {
    let harness = Harness::new(FakeConnector::new(FakeVm::new()));
    let mut runner = harness.runner(vec![android("a", "A")], RunnerConfig::default());
    runner.start().await.unwrap();
    let tx = runner.sender();
    for key in ['h', 'p', 'o', 'w', 'x', 'q'] {
        tx.send(RunnerMessage::Key(key)).await.unwrap();
    }

    assert_eq!(runner.run().await, RunOutcome::Quit);
    for line in help_text(true) {
        assert!(harness.console.contains(line), "missing help line {line}");
    }
    assert!(harness.console.contains("enabled on A"));
    assert!(harness.console.contains("Switched operating system to iOS on A"));
    assert!(harness.console.contains("widget tree of A"));
}

#[tokio::test]
async fn test_screenshot_written_to_directory() {
    let harness = Harness::new(FakeConnector::new(FakeVm::new()));
    let out = TempDir::new().unwrap();
    std::fs::write(out.path().join("flutter_01.png"), b"old").unwrap();
    let config = RunnerConfig {
        screenshot_dir: out.path().to_path_buf(),
        ..RunnerConfig::default()
    };
    let mut runner = harness.runner(vec![android("a", "A")], config);
    runner.start().await.unwrap();
    let tx = runner.sender();
    tx.send(RunnerMessage::Key('s')).await.unwrap();
    tx.send(RunnerMessage::Key('q')).await.unwrap();

    assert_eq!(runner.run().await, RunOutcome::Quit);
    let written = std::fs::read(out.path().join("flutter_02.png")).unwrap();
    assert_eq!(written, FAKE_PNG);
    assert!(harness.console.contains("Screenshot written to"));
}

#[test]
fn test_save_screenshot_picks_first_free_name() {
    let dir = TempDir::new().unwrap();
    let first = save_screenshot(dir.path(), b"a").unwrap();
    let second = save_screenshot(dir.path(), b"b").unwrap();

    assert!(first.ends_with("flutter_01.png"));
    assert!(second.ends_with("flutter_02.png"));
}

#[test]
fn test_idle_loop_waits_without_an_operation() {
    let mut op: Option<Pin<Box<dyn Future<Output = ()>>>> = None;
    let mut idle = tokio_test::task::spawn(poll_op(&mut op));
    tokio_test::assert_pending!(idle.poll());
}
