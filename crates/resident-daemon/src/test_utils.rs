//! Test doubles for the daemon layer.
//!
//! Enabled for this crate's own tests and, through the `test-helpers`
//! feature, for downstream crates.
//!
//! [`FakeVm`] sits directly on the client's command channel, so everything
//! above the WebSocket (tracker aside) runs unmodified against it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose;
use base64::Engine as _;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Notify};

use resident_core::prelude::*;
use resident_core::{DebuggingOptions, Device, DeviceCapabilities, RunMode, TargetPlatform};

use crate::devfs::DevFsOperations;
use crate::devices::DeviceSource;
use crate::launcher::{ApplicationPackage, DeviceLauncher, LaunchResult};
use crate::log_reader::LogReader;
use crate::vm_service::client::{ClientCommand, VmServiceClient};
use crate::vm_service::connection::ServiceConnector;
use crate::vm_service::extensions::{ext, rpc};
use crate::vm_service::protocol::{
    IsolateRef, VmServiceEvent, EXTENSION_STREAM, FILE_SYSTEM_ALREADY_EXISTS, ISOLATE_MUST_BE_PAUSED,
    ISOLATE_STREAM,
};

pub const MAIN_ISOLATE: &str = "isolates/1";
const METHOD_NOT_FOUND: i32 = -32601;

/// Bytes every fake screenshot decodes to.
pub const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

/// A fully capable device whose platform is inferred from `id`.
pub fn test_device(id: &str, name: &str) -> Device {
    Device::new(id, name, TargetPlatform::from_id(id)).with_capabilities(DeviceCapabilities::full())
}

pub fn test_package() -> ApplicationPackage {
    ApplicationPackage {
        id: "com.example.app".to_string(),
        name: "app".to_string(),
        platform: TargetPlatform::Android,
    }
}

// ─────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────

pub fn extension_added_event(name: &str) -> VmServiceEvent {
    VmServiceEvent::new(
        ISOLATE_STREAM,
        "ServiceExtensionAdded",
        Some(IsolateRef::new(MAIN_ISOLATE, "main")),
        json!({ "extensionRPC": name }),
    )
}

pub fn framework_initialized_event() -> VmServiceEvent {
    VmServiceEvent::new(
        EXTENSION_STREAM,
        "Extension",
        Some(IsolateRef::new(MAIN_ISOLATE, "main")),
        json!({ "extensionKind": ext::FRAMEWORK_INITIALIZATION, "extensionData": {} }),
    )
}

// ─────────────────────────────────────────────────────────
// FakeVm
// ─────────────────────────────────────────────────────────

/// Canned reply for one method, optionally delayed.
#[derive(Debug, Clone)]
pub struct FakeResponse {
    result: std::result::Result<Value, (i32, String)>,
    delay: Option<Duration>,
}

impl FakeResponse {
    pub fn ok(value: Value) -> Self {
        Self {
            result: Ok(value),
            delay: None,
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            result: Err((code, message.into())),
            delay: None,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Builder for a scripted VM Service. Defaults to one runnable, resumed
/// isolate that already registered the driver extension, reports healthy,
/// and drives a single view.
#[derive(Debug, Clone)]
pub struct FakeVm {
    pause_kind: Option<String>,
    extensions: Vec<String>,
    register_after: Option<Duration>,
    healthy: bool,
    views: usize,
    reload_success: bool,
    failing_isolates: HashSet<String>,
    framework_init_after: Option<Duration>,
    devfs: Vec<String>,
    overrides: HashMap<String, FakeResponse>,
}

impl Default for FakeVm {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeVm {
    pub fn new() -> Self {
        Self {
            pause_kind: None,
            extensions: vec![ext::DRIVER.to_string()],
            register_after: None,
            healthy: true,
            views: 1,
            reload_success: true,
            failing_isolates: HashSet::new(),
            framework_init_after: None,
            devfs: Vec::new(),
            overrides: HashMap::new(),
        }
    }

    /// Report `kind` (e.g. `PauseStart`) from `getIsolate`.
    pub fn paused_at(mut self, kind: &str) -> Self {
        self.pause_kind = Some(kind.to_string());
        self
    }

    /// The driver extension is not registered and never will be.
    pub fn without_extension(mut self) -> Self {
        self.extensions.clear();
        self.register_after = None;
        self
    }

    /// The driver extension is registered `delay` after the first successful
    /// resume.
    pub fn registers_extension_after(mut self, delay: Duration) -> Self {
        self.extensions.clear();
        self.register_after = Some(delay);
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn with_views(mut self, count: usize) -> Self {
        self.views = count;
        self
    }

    pub fn failing_reload(mut self) -> Self {
        self.reload_success = false;
        self
    }

    /// Only the view running `isolate` (e.g. `isolates/2`) rejects reloads.
    pub fn failing_reload_on(mut self, isolate: &str) -> Self {
        self.failing_isolates.insert(isolate.to_string());
        self
    }

    /// Emit `Flutter.FrameworkInitialization` `delay` after the client
    /// subscribes to the `Extension` stream. Until then the isolate lists no
    /// framework extensions.
    pub fn initializes_framework_after(mut self, delay: Duration) -> Self {
        self.framework_init_after = Some(delay);
        self
    }

    /// A DevFS named `name` already exists on the device.
    pub fn with_existing_devfs(mut self, name: &str) -> Self {
        self.devfs.push(name.to_string());
        self
    }

    /// Answer every call to `method` with `response`.
    pub fn respond(mut self, method: &str, response: FakeResponse) -> Self {
        self.overrides.insert(method.to_string(), response);
        self
    }

    /// Spawn the fake and return a client wired to it.
    pub fn start(self) -> (VmServiceClient, FakeVmControl) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (done_tx, done_rx) = watch::channel(false);
        let stop = Arc::new(Notify::new());

        let state = Arc::new(Mutex::new(FakeVmState::new(self)));
        let control = FakeVmControl {
            state: Arc::clone(&state),
            event_tx: event_tx.clone(),
            stop: Arc::clone(&stop),
        };

        tokio::spawn(serve(state, cmd_rx, event_tx, done_tx, stop));

        (VmServiceClient::from_parts(cmd_tx, event_rx, done_rx), control)
    }
}

#[derive(Debug)]
struct FakeVmState {
    pause_kind: Option<String>,
    extensions: Vec<String>,
    register_after: Option<Duration>,
    healthy: bool,
    views: usize,
    reload_success: bool,
    failing_isolates: HashSet<String>,
    framework_init_after: Option<Duration>,
    /// The framework registered its `ext.flutter.*` extensions.
    framework_ready: bool,
    toggles: HashMap<String, bool>,
    platform: String,
    devfs: HashSet<String>,
    devfs_files: BTreeMap<String, Vec<String>>,
    overrides: HashMap<String, FakeResponse>,
    requests: Vec<(String, Option<Value>)>,
    disconnected: bool,
}

type Reply = std::result::Result<Value, (i32, String)>;

impl FakeVmState {
    fn new(vm: FakeVm) -> Self {
        Self {
            pause_kind: vm.pause_kind,
            extensions: vm.extensions,
            register_after: vm.register_after,
            healthy: vm.healthy,
            views: vm.views,
            reload_success: vm.reload_success,
            failing_isolates: vm.failing_isolates,
            framework_ready: vm.framework_init_after.is_none(),
            framework_init_after: vm.framework_init_after,
            toggles: HashMap::new(),
            platform: "android".to_string(),
            devfs: vm.devfs.into_iter().collect(),
            devfs_files: BTreeMap::new(),
            overrides: vm.overrides,
            requests: Vec::new(),
            disconnected: false,
        }
    }

    fn is_paused(&self) -> bool {
        self.pause_kind
            .as_deref()
            .is_some_and(|k| k.starts_with("Pause"))
    }

    /// Returns the reply, its delay, and events to emit after a delay.
    fn handle(
        &mut self,
        method: &str,
        params: &Option<Value>,
    ) -> (Reply, Option<Duration>, Vec<(Duration, VmServiceEvent)>) {
        self.requests.push((method.to_string(), params.clone()));

        if let Some(response) = self.overrides.get(method) {
            return (response.result.clone(), response.delay, Vec::new());
        }

        let mut scheduled = Vec::new();
        let param = |key: &str| -> Option<String> {
            params
                .as_ref()
                .and_then(|p| p.get(key))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        let reply = match method {
            "getVM" => Ok(json!({
                "type": "VM",
                "name": "vm",
                "version": "3.0",
                "isolates": [{
                    "type": "@Isolate",
                    "id": MAIN_ISOLATE,
                    "name": "main",
                    "isSystemIsolate": false
                }]
            })),
            "getIsolate" => {
                let id = param("isolateId").unwrap_or_else(|| MAIN_ISOLATE.to_string());
                let mut rpcs = self.extensions.clone();
                if self.framework_ready {
                    rpcs.push(ext::REASSEMBLE.to_string());
                }
                let mut isolate = json!({
                    "type": "Isolate",
                    "id": id,
                    "name": "main",
                    "runnable": true,
                    "extensionRPCs": rpcs,
                });
                if let Some(kind) = &self.pause_kind {
                    isolate["pauseEvent"] = json!({ "type": "Event", "kind": kind });
                }
                Ok(isolate)
            }
            "resume" => {
                if self.is_paused() {
                    self.pause_kind = Some("Resume".to_string());
                    if let Some(delay) = self.register_after.take() {
                        scheduled.push((delay, extension_added_event(ext::DRIVER)));
                        self.extensions.push(ext::DRIVER.to_string());
                    }
                    Ok(json!({ "type": "Success" }))
                } else {
                    Err((ISOLATE_MUST_BE_PAUSED, "Isolate must be paused".to_string()))
                }
            }
            "streamListen" => {
                if param("streamId").as_deref() == Some(EXTENSION_STREAM) {
                    if let Some(delay) = self.framework_init_after.take() {
                        scheduled.push((delay, framework_initialized_event()));
                    }
                }
                Ok(json!({ "type": "Success" }))
            }
            rpc::LIST_VIEWS => {
                let views: Vec<Value> = (0..self.views)
                    .map(|i| {
                        json!({
                            "type": "FlutterView",
                            "id": format!("_flutterView/0x{:x}", i + 1),
                            "isolate": {
                                "type": "@Isolate",
                                "id": format!("isolates/{}", i + 1),
                                "name": "main"
                            }
                        })
                    })
                    .collect();
                Ok(json!({ "type": "FlutterViewList", "views": views }))
            }
            rpc::RELOAD_SOURCES => {
                let isolate = param("isolateId").unwrap_or_default();
                if self.reload_success && !self.failing_isolates.contains(&isolate) {
                    Ok(json!({ "type": "ReloadReport", "success": true }))
                } else {
                    Ok(json!({
                        "type": "ReloadReport",
                        "success": false,
                        "notices": [{ "type": "ReasonForCancelling", "message": "Compilation failed" }]
                    }))
                }
            }
            ext::REASSEMBLE | ext::EXIT => Ok(json!({ "type": "_extensionType" })),
            ext::DEBUG_DUMP_APP
            | ext::DEBUG_DUMP_RENDER_TREE
            | ext::DEBUG_DUMP_LAYER_TREE
            | ext::DEBUG_DUMP_SEMANTICS_TREE => {
                let isolate = param("isolateId").unwrap_or_default();
                Ok(json!({ "data": format!("{method} of {isolate}") }))
            }
            ext::DEBUG_PAINT | ext::SHOW_PERFORMANCE_OVERLAY => {
                let key = format!("{method}:{}", param("isolateId").unwrap_or_default());
                if let Some(value) = param("enabled") {
                    self.toggles.insert(key.clone(), value == "true");
                }
                let enabled = self.toggles.get(&key).copied().unwrap_or(false);
                Ok(json!({ "enabled": enabled.to_string() }))
            }
            ext::PLATFORM_OVERRIDE => {
                if let Some(value) = param("value") {
                    self.platform = value;
                }
                Ok(json!({ "value": self.platform }))
            }
            rpc::SCREENSHOT => Ok(json!({
                "type": "Screenshot",
                "screenshot": general_purpose::STANDARD.encode(FAKE_PNG)
            })),
            rpc::CREATE_DEVFS => {
                let name = param("fsName").unwrap_or_default();
                if self.devfs.insert(name.clone()) {
                    Ok(json!({ "type": "FileSystem", "name": name, "uri": format!("file:///devfs/{name}/") }))
                } else {
                    Err((
                        FILE_SYSTEM_ALREADY_EXISTS,
                        format!("File system already exists: {name}"),
                    ))
                }
            }
            rpc::WRITE_DEVFS_FILES => {
                let name = param("fsName").unwrap_or_default();
                let paths = params
                    .as_ref()
                    .and_then(|p| p.get("files"))
                    .and_then(|f| f.as_array())
                    .map(|files| {
                        files
                            .iter()
                            .filter_map(|f| f.get(0).and_then(|p| p.as_str()).map(str::to_string))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                self.devfs_files.entry(name).or_default().extend(paths);
                Ok(json!({ "type": "Success" }))
            }
            rpc::DELETE_DEVFS_FILES => Ok(json!({ "type": "Success" })),
            rpc::DELETE_DEVFS => {
                let name = param("fsName").unwrap_or_default();
                self.devfs.remove(&name);
                self.devfs_files.remove(&name);
                Ok(json!({ "type": "Success" }))
            }
            other if self.extensions.iter().any(|e| e == other) => {
                match param("command").as_deref() {
                    Some("get_health") => {
                        let status = if self.healthy { "ok" } else { "bad" };
                        Ok(json!({ "isError": false, "response": { "status": status } }))
                    }
                    Some(command) => Ok(json!({
                        "isError": true,
                        "response": format!("unknown command: {command}")
                    })),
                    None => Err((-32602, "missing command".to_string())),
                }
            }
            _ => Err((METHOD_NOT_FOUND, format!("Method not found: {method}"))),
        };

        (reply, None, scheduled)
    }
}

async fn serve(
    state: Arc<Mutex<FakeVmState>>,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    event_tx: mpsc::Sender<VmServiceEvent>,
    done_tx: watch::Sender<bool>,
    stop: Arc<Notify>,
) {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(ClientCommand::SendRequest { method, params, response_tx }) => {
                    let handled = state.lock().ok().map(|mut s| s.handle(&method, &params));
                    let Some((reply, delay, scheduled)) = handled else {
                        break;
                    };
                    for (after, event) in scheduled {
                        let tx = event_tx.clone();
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            tokio::time::sleep(after).await;
                            if event.params.event.extension_kind()
                                == Some(ext::FRAMEWORK_INITIALIZATION)
                            {
                                if let Ok(mut state) = state.lock() {
                                    state.framework_ready = true;
                                }
                            }
                            let _ = tx.send(event).await;
                        });
                    }
                    let result = reply.map_err(|(code, message)| Error::Rpc { code, message });
                    match delay {
                        Some(delay) => {
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let _ = response_tx.send(result);
                            });
                        }
                        None => {
                            let _ = response_tx.send(result);
                        }
                    }
                }
                Some(ClientCommand::Disconnect) | None => break,
            },
            _ = stop.notified() => break,
        }
    }
    drop(cmd_rx);
    if let Ok(mut state) = state.lock() {
        state.disconnected = true;
    }
    let _ = done_tx.send(true);
}

/// Test-side handle on a running [`FakeVm`].
#[derive(Clone)]
pub struct FakeVmControl {
    state: Arc<Mutex<FakeVmState>>,
    event_tx: mpsc::Sender<VmServiceEvent>,
    stop: Arc<Notify>,
}

impl FakeVmControl {
    pub async fn emit(&self, event: VmServiceEvent) {
        let _ = self.event_tx.send(event).await;
    }

    pub fn emit_after(&self, delay: Duration, event: VmServiceEvent) {
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event).await;
        });
    }

    /// Drop the transport as if the process died.
    pub fn disconnect(&self) {
        self.stop.notify_one();
    }

    /// Whether the fake stopped serving, either because the client
    /// disconnected or [`disconnect`](Self::disconnect) was called.
    pub fn is_disconnected(&self) -> bool {
        self.state.lock().map(|s| s.disconnected).unwrap_or(true)
    }

    /// Change the reply for `method` on the running fake.
    pub fn respond(&self, method: &str, response: FakeResponse) {
        if let Ok(mut state) = self.state.lock() {
            state.overrides.insert(method.to_string(), response);
        }
    }

    pub fn requests(&self) -> Vec<(String, Option<Value>)> {
        self.state
            .lock()
            .map(|s| s.requests.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, method: &str) -> usize {
        self.state
            .lock()
            .map(|s| s.requests.iter().filter(|(m, _)| m == method).count())
            .unwrap_or(0)
    }

    /// Params of every call to `method`, in order.
    pub fn params_of(&self, method: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.unwrap_or(Value::Null))
            .collect()
    }

    pub fn devfs_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .map(|s| s.devfs.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Paths uploaded to the DevFS `name`, in upload order.
    pub fn devfs_uploads(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.devfs_files.get(name).cloned())
            .unwrap_or_default()
    }

    pub fn platform(&self) -> String {
        self.state
            .lock()
            .map(|s| s.platform.clone())
            .unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────
// FakeConnector
// ─────────────────────────────────────────────────────────

#[derive(Default)]
struct ConnectorState {
    default_vm: FakeVm,
    vms: HashMap<String, FakeVm>,
    fail_first: usize,
    unreachable: bool,
    attempts: usize,
    controls: Vec<(String, FakeVmControl)>,
}

/// [`ServiceConnector`] that hands out [`FakeVm`] clients.
#[derive(Clone, Default)]
pub struct FakeConnector {
    inner: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    /// Serve `vm` for every URI.
    pub fn new(vm: FakeVm) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ConnectorState {
                default_vm: vm,
                ..ConnectorState::default()
            })),
        }
    }

    /// Every open fails.
    pub fn unreachable() -> Self {
        let connector = Self::new(FakeVm::new());
        if let Ok(mut inner) = connector.inner.lock() {
            inner.unreachable = true;
        }
        connector
    }

    /// The first `n` opens fail.
    pub fn failing_first(self, n: usize) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_first = n;
        }
        self
    }

    /// Serve `vm` for `uri` instead of the default.
    pub fn with_vm(self, uri: &str, vm: FakeVm) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.vms.insert(uri.to_string(), vm);
        }
        self
    }

    pub fn attempts(&self) -> usize {
        self.inner.lock().map(|i| i.attempts).unwrap_or(0)
    }

    /// Number of opens that produced a client.
    pub fn open_count(&self) -> usize {
        self.inner.lock().map(|i| i.controls.len()).unwrap_or(0)
    }

    pub fn last_control(&self) -> Option<FakeVmControl> {
        self.inner
            .lock()
            .ok()
            .and_then(|i| i.controls.last().map(|(_, c)| c.clone()))
    }

    /// Most recent fake served for `uri`.
    pub fn control_for(&self, uri: &str) -> Option<FakeVmControl> {
        self.inner.lock().ok().and_then(|i| {
            i.controls
                .iter()
                .rev()
                .find(|(u, _)| u == uri)
                .map(|(_, c)| c.clone())
        })
    }
}

impl ServiceConnector for FakeConnector {
    async fn open(&self, uri: &str) -> Result<VmServiceClient> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::connection("fake connector poisoned"))?;
        inner.attempts += 1;
        if inner.unreachable || inner.attempts <= inner.fail_first {
            return Err(Error::connection(format!("{uri}: connection refused")));
        }
        let vm = inner
            .vms
            .get(uri)
            .cloned()
            .unwrap_or_else(|| inner.default_vm.clone());
        let (client, control) = vm.start();
        inner.controls.push((uri.to_string(), control));
        Ok(client)
    }
}

// ─────────────────────────────────────────────────────────
// FakeDeviceSource
// ─────────────────────────────────────────────────────────

/// Returns scripted snapshots in order, repeating the last one.
#[derive(Clone)]
pub struct FakeDeviceSource {
    snapshots: Arc<Vec<Vec<Device>>>,
    polls: Arc<AtomicUsize>,
}

impl FakeDeviceSource {
    pub fn new(snapshots: Vec<Vec<Device>>) -> Self {
        Self {
            snapshots: Arc::new(snapshots),
            polls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

impl DeviceSource for FakeDeviceSource {
    async fn polling_get_devices(&self) -> Result<Vec<Device>> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst);
        let index = n.min(self.snapshots.len().saturating_sub(1));
        Ok(self.snapshots.get(index).cloned().unwrap_or_default())
    }
}

// ─────────────────────────────────────────────────────────
// FakeDevFsOperations
// ─────────────────────────────────────────────────────────

#[derive(Debug)]
struct DevFsLog {
    written: Vec<String>,
    deleted: Vec<String>,
    remote: BTreeMap<String, Vec<u8>>,
    writes_allowed: usize,
    destroys: usize,
}

/// In-memory remote file system that records every operation.
#[derive(Debug, Clone)]
pub struct FakeDevFsOperations {
    log: Arc<Mutex<DevFsLog>>,
}

impl Default for FakeDevFsOperations {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDevFsOperations {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(DevFsLog {
                written: Vec::new(),
                deleted: Vec::new(),
                remote: BTreeMap::new(),
                writes_allowed: usize::MAX,
                destroys: 0,
            })),
        }
    }

    pub fn written_paths(&self) -> Vec<String> {
        self.log.lock().map(|l| l.written.clone()).unwrap_or_default()
    }

    pub fn deleted_paths(&self) -> Vec<String> {
        self.log.lock().map(|l| l.deleted.clone()).unwrap_or_default()
    }

    /// Paths currently present remotely, sorted.
    pub fn remote_files(&self) -> Vec<String> {
        self.log
            .lock()
            .map(|l| l.remote.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_log(&self) {
        if let Ok(mut log) = self.log.lock() {
            log.written.clear();
            log.deleted.clear();
        }
    }

    /// Allow `n` more successful write calls, then reject. `usize::MAX`
    /// removes the limit.
    pub fn fail_writes_after(&self, n: usize) {
        if let Ok(mut log) = self.log.lock() {
            log.writes_allowed = n;
        }
    }

    pub fn destroy_count(&self) -> usize {
        self.log.lock().map(|l| l.destroys).unwrap_or(0)
    }
}

impl DevFsOperations for FakeDevFsOperations {
    async fn create(&self, fs_name: &str) -> Result<String> {
        Ok(format!("file:///devfs/{fs_name}/"))
    }

    async fn write_files(&self, _fs_name: &str, files: Vec<(String, Vec<u8>)>) -> Result<()> {
        let mut log = self.log.lock().map_err(|_| Error::sync("log poisoned"))?;
        if log.writes_allowed == 0 {
            return Err(Error::Rpc {
                code: -32000,
                message: "write rejected".to_string(),
            });
        }
        if log.writes_allowed != usize::MAX {
            log.writes_allowed -= 1;
        }
        for (path, content) in files {
            log.written.push(path.clone());
            log.remote.insert(path, content);
        }
        Ok(())
    }

    async fn delete_files(&self, _fs_name: &str, paths: Vec<String>) -> Result<()> {
        let mut log = self.log.lock().map_err(|_| Error::sync("log poisoned"))?;
        for path in paths {
            log.remote.remove(&path);
            log.deleted.push(path);
        }
        Ok(())
    }

    async fn destroy(&self, _fs_name: &str) -> Result<()> {
        let mut log = self.log.lock().map_err(|_| Error::sync("log poisoned"))?;
        log.remote.clear();
        log.destroys += 1;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────
// FakeLauncher
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LauncherLog {
    starts: Vec<String>,
    stops: Vec<String>,
    failing: HashSet<String>,
    modes: Vec<RunMode>,
    start_paused: Vec<bool>,
    readers: HashMap<String, LogReader>,
}

/// Launcher that reports `ws://fake-<device id>/ws` as the service URI.
#[derive(Debug, Clone, Default)]
pub struct FakeLauncher {
    log: Arc<Mutex<LauncherLog>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service_uri(device: &Device) -> String {
        format!("ws://fake-{}/ws", device.id)
    }

    /// `start_app` on `device_id` fails from now on.
    pub fn fail_starts_for(&self, device_id: &str) {
        if let Ok(mut log) = self.log.lock() {
            log.failing.insert(device_id.to_string());
        }
    }

    pub fn start_count(&self) -> usize {
        self.log.lock().map(|l| l.starts.len()).unwrap_or(0)
    }

    pub fn stop_count(&self) -> usize {
        self.log.lock().map(|l| l.stops.len()).unwrap_or(0)
    }

    pub fn started_devices(&self) -> Vec<String> {
        self.log.lock().map(|l| l.starts.clone()).unwrap_or_default()
    }

    pub fn modes(&self) -> Vec<RunMode> {
        self.log.lock().map(|l| l.modes.clone()).unwrap_or_default()
    }

    /// `start_paused` of every launch, in order.
    pub fn start_paused_flags(&self) -> Vec<bool> {
        self.log
            .lock()
            .map(|l| l.start_paused.clone())
            .unwrap_or_default()
    }
}

impl DeviceLauncher for FakeLauncher {
    async fn start_app(
        &self,
        device: &Device,
        _package: &ApplicationPackage,
        mode: RunMode,
        _main_path: &Path,
        options: &DebuggingOptions,
    ) -> Result<LaunchResult> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| Error::launch("launcher log poisoned"))?;
        if log.failing.contains(&device.id) {
            return Err(Error::launch(format!("{} refused to start", device.id)));
        }
        log.starts.push(device.id.clone());
        log.modes.push(mode);
        log.start_paused.push(options.start_paused);
        Ok(LaunchResult {
            started: true,
            service_uri: options
                .debugging_enabled
                .then(|| Self::service_uri(device)),
        })
    }

    async fn stop_app(&self, device: &Device, _package: &ApplicationPackage) -> Result<bool> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| Error::launch("launcher log poisoned"))?;
        log.stops.push(device.id.clone());
        Ok(true)
    }

    fn log_reader(&self, device: &Device) -> LogReader {
        match self.log.lock() {
            Ok(mut log) => log.readers.entry(device.id.clone()).or_default().clone(),
            Err(_) => LogReader::new(),
        }
    }
}
