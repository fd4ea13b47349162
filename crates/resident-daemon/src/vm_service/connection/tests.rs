use std::time::Duration;

use tokio::time::Instant;

use super::*;
use crate::test_utils::{FakeConnector, FakeResponse, FakeVm};

const URI: &str = "ws://127.0.0.1:8181/abc=/ws";

async fn connect(connector: &FakeConnector) -> Result<ServiceConnection> {
    ServiceConnection::connect(connector, URI, &ConnectOptions::default()).await
}

// ─────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_retries_until_transport_opens() {
    let connector = FakeConnector::new(FakeVm::new()).failing_first(3);
    let started = Instant::now();

    let connection = connect(&connector).await.unwrap();

    assert_eq!(connector.attempts(), 4);
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(connection.uri(), URI);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_fails_after_connect_timeout() {
    let connector = FakeConnector::unreachable();
    let started = Instant::now();

    let err = connect(&connector).await.unwrap_err();

    assert!(matches!(err, Error::Connection { .. }));
    assert!(err.is_fatal());
    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert_eq!(connector.attempts(), 31);
}

// ─────────────────────────────────────────────────────────
// Pause states
// ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_paused_at_start_waits_for_registration() {
    let vm = FakeVm::new()
        .paused_at("PauseStart")
        .registers_extension_after(Duration::from_secs(2));
    let connector = FakeConnector::new(vm);
    let started = Instant::now();

    connect(&connector).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(2));
    let control = connector.last_control().unwrap();
    assert_eq!(control.count("resume"), 1);
    assert_eq!(control.count(ext::DRIVER), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_extension_fails_after_extension_timeout() {
    let vm = FakeVm::new().paused_at("PauseStart").without_extension();
    let connector = FakeConnector::new(vm);
    let started = Instant::now();

    let err = connect(&connector).await.unwrap_err();

    match &err {
        Error::ExtensionNotRegistered { extension } => assert_eq!(extension, ext::DRIVER),
        other => panic!("expected ExtensionNotRegistered, got {other:?}"),
    }
    assert!(err.to_string().contains("registers it during startup"));
    assert_eq!(started.elapsed(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_paused_at_start_with_extension_only_resumes() {
    let connector = FakeConnector::new(FakeVm::new().paused_at("PauseStart"));
    let started = Instant::now();

    connect(&connector).await.unwrap();

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(connector.last_control().unwrap().count("resume"), 1);
}

#[tokio::test]
async fn test_breakpoint_pause_is_resumed() {
    let connector = FakeConnector::new(FakeVm::new().paused_at("PauseBreakpoint"));
    connect(&connector).await.unwrap();
    assert_eq!(connector.last_control().unwrap().count("resume"), 1);
}

#[tokio::test]
async fn test_resume_race_is_absorbed() {
    // Another debugger resumed the isolate between getIsolate and resume.
    let vm = FakeVm::new().paused_at("PauseExit").respond(
        "resume",
        FakeResponse::error(ISOLATE_MUST_BE_PAUSED, "Isolate must be paused"),
    );
    let connector = FakeConnector::new(vm);
    connect(&connector).await.unwrap();
}

#[tokio::test]
async fn test_other_resume_failure_is_fatal() {
    let vm = FakeVm::new()
        .paused_at("PauseException")
        .respond("resume", FakeResponse::error(106, "Isolate is reloading"));
    let connector = FakeConnector::new(vm);

    let err = connect(&connector).await.unwrap_err();
    match err {
        Error::Remote { command, code, .. } => {
            assert_eq!(command, "resume");
            assert_eq!(code, 106);
        }
        other => panic!("expected Remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_running_isolate_is_not_resumed() {
    let connector = FakeConnector::new(FakeVm::new());
    connect(&connector).await.unwrap();
    assert_eq!(connector.last_control().unwrap().count("resume"), 0);
}

#[tokio::test]
async fn test_unknown_pause_state_is_permissive_by_default() {
    let connector = FakeConnector::new(FakeVm::new().paused_at("PausePostRequest"));
    connect(&connector).await.unwrap();
    assert_eq!(connector.last_control().unwrap().count("resume"), 0);
}

#[tokio::test]
async fn test_unknown_pause_state_fails_when_strict() {
    let connector = FakeConnector::new(FakeVm::new().paused_at("PausePostRequest"));
    let options = ConnectOptions {
        strict_pause_state: true,
        ..ConnectOptions::default()
    };

    let err = ServiceConnection::connect(&connector, URI, &options)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }));
}

// ─────────────────────────────────────────────────────────
// Health and commands
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unhealthy_app_fails_and_closes() {
    let connector = FakeConnector::new(FakeVm::new().unhealthy());

    let err = connect(&connector).await.unwrap_err();
    assert!(matches!(err, Error::HealthCheck { .. }));

    let control = connector.last_control().unwrap();
    tokio::time::timeout(Duration::from_secs(1), async {
        while !control.is_disconnected() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_health_check_can_be_skipped() {
    let connector = FakeConnector::new(FakeVm::new().unhealthy());
    let options = ConnectOptions {
        health_check: false,
        ..ConnectOptions::default()
    };
    ServiceConnection::connect(&connector, URI, &options)
        .await
        .unwrap();
    assert_eq!(connector.last_control().unwrap().count(ext::DRIVER), 0);
}

#[tokio::test]
async fn test_command_errors_carry_command_name() {
    let connector = FakeConnector::new(FakeVm::new());
    let connection = connect(&connector).await.unwrap();
    connector
        .last_control()
        .unwrap()
        .respond(ext::DRIVER, FakeResponse::error(-32603, "driver crashed"));

    let err = connection.send_command(&GetHealth).await.unwrap_err();
    match err {
        Error::Remote {
            command,
            code,
            message,
        } => {
            assert_eq!(command, "GetHealth");
            assert_eq!(code, -32603);
            assert_eq!(message, "driver crashed");
        }
        other => panic!("expected Remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_driver_is_error_reply_is_remote_error() {
    let connector = FakeConnector::new(FakeVm::new());
    let connection = connect(&connector).await.unwrap();
    connector.last_control().unwrap().respond(
        ext::DRIVER,
        FakeResponse::ok(serde_json::json!({"isError": true, "response": "no health"})),
    );

    let err = connection.send_command(&GetHealth).await.unwrap_err();
    assert!(matches!(err, Error::Remote { ref command, .. } if command == "GetHealth"));
}

// ─────────────────────────────────────────────────────────
// Views, events, lifecycle
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_views_returns_fresh_snapshot() {
    let connector = FakeConnector::new(FakeVm::new().with_views(3));
    let connection = connect(&connector).await.unwrap();
    assert!(connection.views().is_empty());

    let views = connection.refresh_views().await.unwrap();
    assert_eq!(views.len(), 3);
    assert_eq!(views[2].isolate_id(), Some("isolates/3"));
    assert_eq!(connection.views().len(), 3);
}

#[tokio::test]
async fn test_wait_for_extension_event() {
    let connector = FakeConnector::new(FakeVm::new());
    let connection = connect(&connector).await.unwrap();
    let control = connector.last_control().unwrap();

    control
        .emit(crate::test_utils::framework_initialized_event())
        .await;
    tokio::time::timeout(
        Duration::from_secs(1),
        connection.wait_for_extension_event(ext::FRAMEWORK_INITIALIZATION),
    )
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_isolate_lists_framework_extensions_once_initialized() {
    let vm = FakeVm::new().initializes_framework_after(Duration::from_secs(1));
    let connector = FakeConnector::new(vm);
    let connection = connect(&connector).await.unwrap();

    assert!(connection.isolate_has_extension(ext::DRIVER).await.unwrap());
    assert!(!connection
        .isolate_has_extension(ext::REASSEMBLE)
        .await
        .unwrap());

    connection
        .wait_for_extension_event(ext::FRAMEWORK_INITIALIZATION)
        .await
        .unwrap();
    assert!(connection
        .isolate_has_extension(ext::REASSEMBLE)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_done_fires_on_disconnect() {
    let connector = FakeConnector::new(FakeVm::new());
    let connection = connect(&connector).await.unwrap();
    assert!(!connection.is_done());

    connector.last_control().unwrap().disconnect();
    tokio::time::timeout(Duration::from_secs(1), connection.done())
        .await
        .unwrap();
    assert!(connection.is_done());
}

// ─────────────────────────────────────────────────────────
// URIs
// ─────────────────────────────────────────────────────────

#[test]
fn test_to_ws_uri() {
    assert_eq!(
        to_ws_uri("http://127.0.0.1:8181/abc=/").unwrap(),
        "ws://127.0.0.1:8181/abc=/ws"
    );
    assert_eq!(
        to_ws_uri("https://example.com:443/token/").unwrap(),
        "wss://example.com/token/ws"
    );
    assert_eq!(
        to_ws_uri("ws://127.0.0.1:8181/abc=/ws").unwrap(),
        "ws://127.0.0.1:8181/abc=/ws"
    );
    assert_eq!(
        to_ws_uri("http://127.0.0.1:8181").unwrap(),
        "ws://127.0.0.1:8181/ws"
    );
    assert!(to_ws_uri("ftp://host/").is_err());
    assert!(to_ws_uri("not a uri").is_err());
}
