//! JSON-RPC 2.0 message types for the Dart VM Service.
//!
//! Requests are correlated with responses through string ids handed out by
//! [`VmRequestTracker`]. Stream notifications arrive without an id and carry
//! `method = "streamNotify"`.
//!
//! Protocol reference:
//! <https://github.com/dart-lang/sdk/blob/main/runtime/vm/service/service.md>

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

/// Error code returned by `resume` when the isolate is already running.
pub const ISOLATE_MUST_BE_PAUSED: i32 = 101;

/// Error code returned by `_createDevFS` when the name is already in use.
pub const FILE_SYSTEM_ALREADY_EXISTS: i32 = 1001;

/// Stream carrying isolate lifecycle and `ServiceExtensionAdded` events.
pub const ISOLATE_STREAM: &str = "Isolate";

/// Stream carrying `postEvent` notifications from the framework.
pub const EXTENSION_STREAM: &str = "Extension";

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct VmServiceRequest {
    pub jsonrpc: &'static str,
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl VmServiceRequest {
    pub fn new(id: String, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VmServiceResponse {
    pub id: Option<String>,
    pub result: Option<Value>,
    pub error: Option<VmServiceError>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
pub struct VmServiceError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct VmServiceEvent {
    pub method: String,
    pub params: StreamEventParams,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEventParams {
    pub stream_id: String,
    pub event: StreamEvent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub kind: String,
    pub isolate: Option<IsolateRef>,
    pub timestamp: Option<i64>,
    /// Kind-specific fields, kept untyped.
    #[serde(flatten)]
    pub data: Value,
}

impl StreamEvent {
    /// Name of the extension an `Isolate`/`ServiceExtensionAdded` event
    /// announces.
    pub fn extension_rpc(&self) -> Option<&str> {
        if self.kind != "ServiceExtensionAdded" {
            return None;
        }
        self.data.get("extensionRPC").and_then(Value::as_str)
    }

    /// `extensionKind` of an `Extension` stream event.
    pub fn extension_kind(&self) -> Option<&str> {
        if self.kind != "Extension" {
            return None;
        }
        self.data.get("extensionKind").and_then(Value::as_str)
    }
}

impl VmServiceEvent {
    /// Build a `streamNotify` event. Used by fakes and tests.
    pub fn new(stream_id: &str, kind: &str, isolate: Option<IsolateRef>, data: Value) -> Self {
        Self {
            method: "streamNotify".to_string(),
            params: StreamEventParams {
                stream_id: stream_id.to_string(),
                event: StreamEvent {
                    kind: kind.to_string(),
                    isolate,
                    timestamp: None,
                    data,
                },
            },
        }
    }
}

// ---------------------------------------------------------------------------
// VM / Isolate / View
// ---------------------------------------------------------------------------

/// Result of `getVM`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub isolates: Vec<IsolateRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolateRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub number: Option<String>,
    pub is_system_isolate: Option<bool>,
}

impl IsolateRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            number: None,
            is_system_isolate: Some(false),
        }
    }
}

/// Result of `getIsolate`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolateInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub runnable: Option<bool>,
    pub pause_event: Option<PauseEvent>,
    #[serde(rename = "extensionRPCs")]
    pub extension_rpcs: Option<Vec<String>>,
}

impl IsolateInfo {
    pub fn pause_kind(&self) -> Option<&str> {
        self.pause_event.as_ref().map(|e| e.kind.as_str())
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extension_rpcs
            .as_ref()
            .is_some_and(|rpcs| rpcs.iter().any(|r| r == name))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PauseEvent {
    pub kind: String,
}

/// A Flutter view and the isolate driving it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlutterView {
    pub id: String,
    pub isolate: Option<IsolateRef>,
}

impl FlutterView {
    /// Isolate id, if the view has an isolate attached yet.
    pub fn isolate_id(&self) -> Option<&str> {
        self.isolate.as_ref().map(|i| i.id.as_str())
    }
}

/// Result of `_flutter.listViews`
#[derive(Debug, Deserialize)]
pub struct ViewList {
    #[serde(default)]
    pub views: Vec<FlutterView>,
}

// ---------------------------------------------------------------------------
// Message parsing
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum VmServiceMessage {
    Response(VmServiceResponse),
    Event(VmServiceEvent),
    Unknown(String),
}

/// Classify a raw WebSocket text frame.
///
/// A non-null top-level `id` makes it a response; a `method` without an id
/// makes it a stream notification.
pub fn parse_vm_message(text: &str) -> VmServiceMessage {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return VmServiceMessage::Unknown(text.to_string()),
    };

    let has_id = value.get("id").is_some_and(|v| !v.is_null());
    let has_method = value.get("method").is_some();

    if has_id {
        match serde_json::from_value::<VmServiceResponse>(normalize_id(value)) {
            Ok(response) => VmServiceMessage::Response(response),
            Err(_) => VmServiceMessage::Unknown(text.to_string()),
        }
    } else if has_method {
        match serde_json::from_value::<VmServiceEvent>(value) {
            Ok(event) => VmServiceMessage::Event(event),
            Err(_) => VmServiceMessage::Unknown(text.to_string()),
        }
    } else {
        VmServiceMessage::Unknown(text.to_string())
    }
}

/// Some VM Service implementations echo numeric ids; requests always use strings.
fn normalize_id(mut value: Value) -> Value {
    if let Some(id) = value.get_mut("id") {
        if let Some(n) = id.as_i64() {
            *id = Value::String(n.to_string());
        }
    }
    value
}

// ---------------------------------------------------------------------------
// Request tracker
// ---------------------------------------------------------------------------

static VM_REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_vm_request_id() -> String {
    VM_REQUEST_ID_COUNTER
        .fetch_add(1, Ordering::SeqCst)
        .to_string()
}

struct PendingVmRequest {
    response_tx: oneshot::Sender<VmServiceResponse>,
    created_at: Instant,
}

/// Correlates in-flight request ids with their waiting callers.
#[derive(Default)]
pub struct VmRequestTracker {
    pending: HashMap<String, PendingVmRequest>,
}

impl VmRequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id and a receiver for its response.
    pub fn register(&mut self) -> (String, oneshot::Receiver<VmServiceResponse>) {
        let id = next_vm_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            PendingVmRequest {
                response_tx: tx,
                created_at: Instant::now(),
            },
        );
        (id, rx)
    }

    /// Route a response to its caller. Returns `false` for unknown ids.
    pub fn complete(&mut self, id: &str, response: VmServiceResponse) -> bool {
        match self.pending.remove(id) {
            Some(pending) => {
                let _ = pending.response_tx.send(response);
                true
            }
            None => false,
        }
    }

    /// Drop requests older than `timeout`, returning their ids.
    ///
    /// Only used for requests whose caller opted into a deadline; ordinary
    /// awaits are unbounded.
    pub fn cleanup_stale(&mut self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, req)| now.duration_since(req.created_at) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.pending.remove(id);
        }
        stale
    }

    /// Fail every outstanding request, as on disconnect.
    pub fn clear(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
