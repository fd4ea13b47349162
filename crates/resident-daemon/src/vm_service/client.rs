//! Async WebSocket client for the Dart VM Service.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     VmServiceClient                       │
//! │                                                           │
//! │  VmRequestHandle ──cmd──▶ background task                 │
//! │    request()       chan    WebSocket read/write loop       │
//! │                            response → VmRequestTracker     │
//! │  event_rx ◀───────evt────  event    → event channel        │
//! │  done_rx  ◀───────watch──  set once the socket is gone     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no reconnection: a process instance has exactly one live
//! connection, and losing it is reported through the `done` watch.

use std::collections::HashMap;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use resident_core::prelude::*;

use super::extensions::build_extension_params;
use super::protocol::{
    parse_vm_message, IsolateInfo, IsolateRef, VmInfo, VmRequestTracker, VmServiceError,
    VmServiceEvent, VmServiceMessage, VmServiceRequest, VmServiceResponse,
};

const CMD_CHANNEL_CAPACITY: usize = 32;
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Messages from the public API to the background task.
pub(crate) enum ClientCommand {
    SendRequest {
        method: String,
        params: Option<Value>,
        response_tx: oneshot::Sender<Result<Value>>,
    },
    Disconnect,
}

// ---------------------------------------------------------------------------
// VmRequestHandle
// ---------------------------------------------------------------------------

/// Clonable handle for issuing RPCs over a client's connection.
///
/// Requests fail with [`Error::ChannelClosed`] once the connection is gone.
#[derive(Clone)]
pub struct VmRequestHandle {
    cmd_tx: mpsc::Sender<ClientCommand>,
}

impl std::fmt::Debug for VmRequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmRequestHandle")
            .field("closed", &self.cmd_tx.is_closed())
            .finish()
    }
}

impl VmRequestHandle {
    /// Send a request and await its `result`.
    ///
    /// JSON-RPC errors come back as [`Error::Rpc`].
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let (response_tx, response_rx) = oneshot::channel();

        self.cmd_tx
            .send(ClientCommand::SendRequest {
                method: method.to_string(),
                params,
                response_tx,
            })
            .await
            .map_err(|_| Error::ChannelClosed)?;

        response_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Invoke a service extension on `isolate_id`. Argument values must be
    /// strings.
    pub async fn call_extension(
        &self,
        method: &str,
        isolate_id: &str,
        args: Option<HashMap<String, String>>,
    ) -> Result<Value> {
        let params = build_extension_params(isolate_id, args);
        self.request(method, Some(params)).await
    }

    pub async fn get_vm(&self) -> Result<VmInfo> {
        let result = self.request("getVM", None).await?;
        serde_json::from_value(result)
            .map_err(|e| Error::protocol(format!("parse getVM response: {e}")))
    }

    pub async fn get_isolate(&self, isolate_id: &str) -> Result<IsolateInfo> {
        let result = self
            .request("getIsolate", Some(json!({ "isolateId": isolate_id })))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| Error::protocol(format!("parse getIsolate response: {e}")))
    }

    pub async fn resume(&self, isolate_id: &str) -> Result<()> {
        self.request("resume", Some(json!({ "isolateId": isolate_id })))
            .await?;
        Ok(())
    }

    pub async fn stream_listen(&self, stream_id: &str) -> Result<()> {
        self.request("streamListen", Some(json!({ "streamId": stream_id })))
            .await?;
        Ok(())
    }

    /// First non-system isolate reported by `getVM`.
    pub async fn first_isolate(&self) -> Result<IsolateRef> {
        let vm = self.get_vm().await?;
        vm.isolates
            .into_iter()
            .find(|iso| !iso.is_system_isolate.unwrap_or(false))
            .ok_or_else(|| Error::protocol("no non-system isolate found"))
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    /// Ask the background task to close the socket. Returns immediately.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }
}

// ---------------------------------------------------------------------------
// VmServiceClient
// ---------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Owns one WebSocket connection to a VM Service.
pub struct VmServiceClient {
    handle: VmRequestHandle,
    event_rx: mpsc::Receiver<VmServiceEvent>,
    done_rx: watch::Receiver<bool>,
}

impl VmServiceClient {
    /// Open a WebSocket to `ws_uri` and spawn the I/O task.
    pub async fn connect(ws_uri: &str) -> Result<Self> {
        debug!("Connecting to VM Service at {}", ws_uri);
        let (ws_stream, _response) = connect_async(ws_uri)
            .await
            .map_err(|err| Error::connection(format!("{ws_uri}: {err}")))?;

        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (done_tx, done_rx) = watch::channel(false);

        tokio::spawn(async move {
            run_io_loop(ws_stream, cmd_rx, event_tx).await;
            let _ = done_tx.send(true);
            debug!("VM Service background task exiting");
        });

        Ok(Self::from_parts(cmd_tx, event_rx, done_rx))
    }

    /// Assemble a client over existing channels. Fakes drive the other ends.
    pub(crate) fn from_parts(
        cmd_tx: mpsc::Sender<ClientCommand>,
        event_rx: mpsc::Receiver<VmServiceEvent>,
        done_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            handle: VmRequestHandle { cmd_tx },
            event_rx,
            done_rx,
        }
    }

    pub fn request_handle(&self) -> VmRequestHandle {
        self.handle.clone()
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.handle.request(method, params).await
    }

    pub fn event_receiver(&mut self) -> &mut mpsc::Receiver<VmServiceEvent> {
        &mut self.event_rx
    }

    /// Split into the request handle, the event stream and the done signal.
    pub fn into_parts(
        self,
    ) -> (
        VmRequestHandle,
        mpsc::Receiver<VmServiceEvent>,
        watch::Receiver<bool>,
    ) {
        (self.handle, self.event_rx, self.done_rx)
    }

    pub async fn disconnect(&self) {
        self.handle.disconnect().await;
    }
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

async fn run_io_loop(
    ws_stream: WsStream,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    event_tx: mpsc::Sender<VmServiceEvent>,
) {
    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut tracker = VmRequestTracker::new();

    loop {
        tokio::select! {
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_ws_text(text.as_str(), &mut tracker, &event_tx);
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!("VM Service: received Close frame");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("VM Service: WebSocket read error: {}", err);
                        break;
                    }
                    None => {
                        debug!("VM Service: WebSocket stream ended");
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::SendRequest { method, params, response_tx }) => {
                        handle_send_request(&method, params, response_tx, &mut tracker, &mut ws_sink).await;
                    }
                    Some(ClientCommand::Disconnect) | None => {
                        send_close(&mut ws_sink).await;
                        break;
                    }
                }
            }
        }
    }

    let failed = tracker.clear();
    if failed > 0 {
        debug!("VM Service: {} request(s) abandoned on disconnect", failed);
    }
}

/// The first 120 characters of `raw`, cut on a char boundary.
fn preview(raw: &str) -> &str {
    let end = raw.char_indices().nth(120).map_or(raw.len(), |(i, _)| i);
    &raw[..end]
}

fn handle_ws_text(
    text: &str,
    tracker: &mut VmRequestTracker,
    event_tx: &mpsc::Sender<VmServiceEvent>,
) {
    match parse_vm_message(text) {
        VmServiceMessage::Response(mut response) => {
            if let Some(id) = response.id.take() {
                if !tracker.complete(&id, response) {
                    debug!("VM Service: response for unknown request id {}", id);
                }
            }
        }
        VmServiceMessage::Event(event) => {
            if let Err(err) = event_tx.try_send(event) {
                warn!("VM Service: dropping event: {}", err);
            }
        }
        VmServiceMessage::Unknown(raw) => {
            trace!("VM Service: ignoring message: {}", preview(&raw));
        }
    }
}

async fn handle_send_request(
    method: &str,
    params: Option<Value>,
    response_tx: oneshot::Sender<Result<Value>>,
    tracker: &mut VmRequestTracker,
    ws_sink: &mut SplitSink<WsStream, WsMessage>,
) {
    // Register first so a fast response finds its slot.
    let (id, response_rx) = tracker.register();
    let request = VmServiceRequest::new(id, method, params);

    let json = match serde_json::to_string(&request) {
        Ok(j) => j,
        Err(err) => {
            let _ = response_tx.send(Err(Error::protocol(format!(
                "serialize {method} request: {err}"
            ))));
            return;
        }
    };

    if let Err(err) = ws_sink.send(WsMessage::Text(json.into())).await {
        let _ = response_tx.send(Err(Error::connection(format!(
            "send {method} request: {err}"
        ))));
        return;
    }

    tokio::spawn(async move {
        let result = match response_rx.await {
            Ok(response) => response_to_result(response),
            Err(_) => Err(Error::ChannelClosed),
        };
        let _ = response_tx.send(result);
    });
}

/// Unwrap a JSON-RPC response into its result or a structured error.
pub(crate) fn response_to_result(response: VmServiceResponse) -> Result<Value> {
    if let Some(error) = response.error {
        Err(rpc_error(error))
    } else if let Some(result) = response.result {
        Ok(result)
    } else {
        Err(Error::protocol(
            "VM Service response contained neither result nor error",
        ))
    }
}

fn rpc_error(err: VmServiceError) -> Error {
    Error::Rpc {
        code: err.code,
        message: err.message,
    }
}

async fn send_close(ws_sink: &mut SplitSink<WsStream, WsMessage>) {
    let _ = ws_sink.send(WsMessage::Close(None)).await;
    let _ = ws_sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_client() -> (VmServiceClient, mpsc::Receiver<ClientCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let (_event_tx, event_rx) = mpsc::channel(4);
        let (_done_tx, done_rx) = watch::channel(false);
        (VmServiceClient::from_parts(cmd_tx, event_rx, done_rx), cmd_rx)
    }

    #[test]
    fn test_response_to_result_maps_rpc_error() {
        let response = VmServiceResponse {
            id: Some("1".into()),
            result: None,
            error: Some(VmServiceError {
                code: 101,
                message: "Isolate must be paused".into(),
                data: None,
            }),
        };
        match response_to_result(response) {
            Err(Error::Rpc { code, message }) => {
                assert_eq!(code, 101);
                assert_eq!(message, "Isolate must be paused");
            }
            other => panic!("expected Rpc error, got {other:?}"),
        }
    }

    #[test]
    fn test_response_without_result_is_protocol_error() {
        let response = VmServiceResponse {
            id: Some("1".into()),
            result: None,
            error: None,
        };
        assert!(matches!(
            response_to_result(response),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn test_preview_cuts_on_char_boundary() {
        let raw = format!("{}ééé", "a".repeat(119));
        assert_eq!(preview(&raw), format!("{}é", "a".repeat(119)));
        assert_eq!(preview("short"), "short");
    }

    #[tokio::test]
    async fn test_call_extension_sends_isolate_id() {
        let (client, mut cmd_rx) = channel_client();
        let handle = client.request_handle();

        let server = tokio::spawn(async move {
            let Some(ClientCommand::SendRequest {
                method,
                params,
                response_tx,
            }) = cmd_rx.recv().await
            else {
                panic!("expected request");
            };
            assert_eq!(method, "ext.flutter.debugDumpApp");
            assert_eq!(params.unwrap()["isolateId"], "isolates/9");
            let _ = response_tx.send(Ok(json!({ "data": "tree" })));
        });

        let result = handle
            .call_extension("ext.flutter.debugDumpApp", "isolates/9", None)
            .await
            .unwrap();
        assert_eq!(result["data"], "tree");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_after_close_is_channel_closed() {
        let (client, cmd_rx) = channel_client();
        drop(cmd_rx);
        let err = client.request("getVM", None).await.unwrap_err();
        assert!(matches!(err, Error::ChannelClosed));
        assert!(client.request_handle().is_closed());
    }
}
