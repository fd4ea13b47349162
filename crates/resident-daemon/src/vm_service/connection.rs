//! Attaching to a running process's VM Service.
//!
//! [`ServiceConnection::connect`] runs the attach handshake:
//!
//! 1. open the transport, retrying every `retry_interval` until
//!    `connect_timeout` has elapsed
//! 2. subscribe to the `Isolate` and `Extension` streams
//! 3. read the first isolate's pause state and resume it if needed; an
//!    isolate paused at start is resumed while concurrently waiting for the
//!    driver extension to be registered
//! 4. health check through the driver extension
//!
//! Resume is lenient: error 101 means another client got there first.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

use resident_core::prelude::*;
use resident_core::PauseState;

use super::client::{VmRequestHandle, VmServiceClient};
use super::commands::{decode_response, GetHealth, HealthStatus, ServiceCommand};
use super::extensions::{ext, rpc};
use super::protocol::{
    FlutterView, ViewList, VmServiceEvent, EXTENSION_STREAM, ISOLATE_MUST_BE_PAUSED,
    ISOLATE_STREAM,
};

const EVENT_BROADCAST_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Strategy for opening a transport to a VM Service URI.
#[trait_variant::make(ServiceConnector: Send)]
pub trait LocalServiceConnector {
    async fn open(&self, uri: &str) -> Result<VmServiceClient>;
}

/// Connects over a real WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl ServiceConnector for WebSocketConnector {
    async fn open(&self, uri: &str) -> Result<VmServiceClient> {
        let ws_uri = to_ws_uri(uri)?;
        VmServiceClient::connect(&ws_uri).await
    }
}

/// Normalize a VM Service URI to its WebSocket endpoint.
///
/// `http://127.0.0.1:8181/abc=/` becomes `ws://127.0.0.1:8181/abc=/ws`;
/// URIs already ending in `/ws` keep their path.
pub fn to_ws_uri(uri: &str) -> Result<String> {
    let mut url = Url::parse(uri.trim())
        .map_err(|e| Error::connection(format!("invalid service URI '{uri}': {e}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::connection(format!(
                "unsupported service URI scheme '{other}'"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::connection(format!("cannot convert '{uri}' to {scheme}")))?;

    if !url.path().ends_with("/ws") {
        let path = format!("{}/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
    }
    Ok(url.to_string())
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Extension used for health checks and driver commands.
    pub extension: String,
    pub connect_timeout: Duration,
    pub retry_interval: Duration,
    /// How long an isolate paused at start may take to register `extension`.
    pub extension_timeout: Duration,
    /// Fail on an unrecognized pause state instead of proceeding.
    pub strict_pause_state: bool,
    pub health_check: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            extension: ext::DRIVER.to_string(),
            connect_timeout: Duration::from_secs(30),
            retry_interval: Duration::from_secs(1),
            extension_timeout: Duration::from_secs(10),
            strict_pause_state: false,
            health_check: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Observed events
// ---------------------------------------------------------------------------

/// Everything the event pump has seen so far. Waiters check this instead of
/// racing the broadcast channel.
#[derive(Debug, Default)]
struct Observed {
    extensions: HashSet<String>,
    extension_events: HashMap<String, u64>,
}

impl Observed {
    fn record(&mut self, event: &VmServiceEvent) {
        let event = &event.params.event;
        if let Some(name) = event.extension_rpc() {
            self.extensions.insert(name.to_string());
        }
        if let Some(kind) = event.extension_kind() {
            *self.extension_events.entry(kind.to_string()).or_default() += 1;
        }
    }
}

async fn pump_events(
    mut event_rx: mpsc::Receiver<VmServiceEvent>,
    observed: watch::Sender<Observed>,
    broadcast_tx: broadcast::Sender<VmServiceEvent>,
) {
    while let Some(event) = event_rx.recv().await {
        trace!(
            stream = %event.params.stream_id,
            kind = %event.params.event.kind,
            "VM Service event"
        );
        observed.send_modify(|o| o.record(&event));
        let _ = broadcast_tx.send(event);
    }
}

// ---------------------------------------------------------------------------
// ServiceConnection
// ---------------------------------------------------------------------------

/// The live RPC channel to one process instance.
pub struct ServiceConnection {
    uri: String,
    handle: VmRequestHandle,
    extension: String,
    main_isolate: Mutex<Option<String>>,
    views: Mutex<Arc<[FlutterView]>>,
    observed: watch::Receiver<Observed>,
    events: broadcast::Sender<VmServiceEvent>,
    done: watch::Receiver<bool>,
    pump: JoinHandle<()>,
}

impl std::fmt::Debug for ServiceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConnection")
            .field("uri", &self.uri)
            .field("extension", &self.extension)
            .finish()
    }
}

impl ServiceConnection {
    /// Open and handshake. Any failure after the transport is open closes it.
    pub async fn connect<C>(connector: &C, uri: &str, options: &ConnectOptions) -> Result<Self>
    where
        C: ServiceConnector + Sync,
    {
        let client = open_with_retry(connector, uri, options).await?;
        let connection = Self::from_client(uri, client, &options.extension);

        if let Err(err) = connection.handshake(options).await {
            warn!("Attach to {} failed: {}", uri, err);
            connection.close().await;
            return Err(err);
        }

        info!("Connected to VM Service at {}", uri);
        Ok(connection)
    }

    /// Wrap an open client without running the handshake.
    pub fn from_client(uri: &str, client: VmServiceClient, extension: &str) -> Self {
        let (handle, event_rx, done) = client.into_parts();
        let (observed_tx, observed) = watch::channel(Observed::default());
        let (events, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        let pump = tokio::spawn(pump_events(event_rx, observed_tx, events.clone()));

        Self {
            uri: uri.to_string(),
            handle,
            extension: extension.to_string(),
            main_isolate: Mutex::new(None),
            views: Mutex::new(Arc::from(Vec::new())),
            observed,
            events,
            done,
            pump,
        }
    }

    async fn handshake(&self, options: &ConnectOptions) -> Result<()> {
        for stream in [ISOLATE_STREAM, EXTENSION_STREAM] {
            if let Err(err) = self.handle.stream_listen(stream).await {
                warn!("streamListen({}) failed: {}", stream, err);
            }
        }

        let isolate = self.handle.first_isolate().await?;
        let info = self.handle.get_isolate(&isolate.id).await?;
        self.set_main_isolate(&isolate.id);

        let state = PauseState::from_event_kind(info.pause_kind());
        debug!(isolate = %isolate.id, ?state, "Isolate pause state");

        match state {
            PauseState::Start => {
                if info.has_extension(&self.extension) {
                    self.resume_lenient(&isolate.id).await?;
                } else {
                    tokio::try_join!(
                        self.resume_lenient(&isolate.id),
                        self.wait_for_registration(options.extension_timeout),
                    )?;
                }
            }
            PauseState::Exit
            | PauseState::Breakpoint
            | PauseState::Exception
            | PauseState::Interrupted => {
                self.resume_lenient(&isolate.id).await?;
            }
            PauseState::Resumed => {}
            PauseState::Unknown => {
                let kind = info.pause_kind().unwrap_or("<none>");
                if options.strict_pause_state {
                    return Err(Error::protocol(format!(
                        "unrecognized isolate pause state '{kind}'"
                    )));
                }
                warn!(
                    "Unrecognized isolate pause state '{}', proceeding as resumed",
                    kind
                );
            }
        }

        if options.health_check {
            self.check_health().await?;
        }
        Ok(())
    }

    async fn wait_for_registration(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.wait_for_extension(&self.extension))
            .await
            .map_err(|_| Error::extension_not_registered(&self.extension))?
    }

    /// Resume `isolate_id`, treating "isolate must be paused" as success.
    pub async fn resume_lenient(&self, isolate_id: &str) -> Result<()> {
        match self.handle.resume(isolate_id).await {
            Ok(()) => Ok(()),
            Err(err) if err.rpc_code() == Some(ISOLATE_MUST_BE_PAUSED) => {
                debug!("Isolate {} already running", isolate_id);
                Ok(())
            }
            Err(err) => Err(err.with_command("resume")),
        }
    }

    /// Ask the driver extension for its health; anything but `ok` fails.
    pub async fn check_health(&self) -> Result<()> {
        match self.send_command(&GetHealth).await {
            Ok(health) if health.status == HealthStatus::Ok => Ok(()),
            Ok(health) => Err(Error::health_check(format!(
                "status {:?}",
                health.status
            ))),
            Err(err) => Err(Error::health_check(err.to_string())),
        }
    }

    /// Dispatch a driver command. Remote failures carry the command's name.
    pub async fn send_command<C: ServiceCommand>(&self, command: &C) -> Result<C::Response> {
        let isolate_id = self.main_isolate_id().await?;
        let result = self
            .handle
            .call_extension(&self.extension, &isolate_id, Some(command.to_args()))
            .await
            .map_err(|e| e.with_command(command.name()))?;
        decode_response(command.name(), result)
    }

    /// Fetch the current view list and keep it as the latest snapshot.
    pub async fn refresh_views(&self) -> Result<Arc<[FlutterView]>> {
        let result = self.handle.request(rpc::LIST_VIEWS, None).await?;
        let list: ViewList = serde_json::from_value(result)
            .map_err(|e| Error::protocol(format!("parse {} response: {e}", rpc::LIST_VIEWS)))?;
        let views: Arc<[FlutterView]> = Arc::from(list.views);
        if let Ok(mut guard) = self.views.lock() {
            *guard = Arc::clone(&views);
        }
        Ok(views)
    }

    /// Snapshot from the last [`refresh_views`](Self::refresh_views).
    pub fn views(&self) -> Arc<[FlutterView]> {
        self.views
            .lock()
            .map(|v| Arc::clone(&v))
            .unwrap_or_else(|_| Arc::from(Vec::new()))
    }

    /// Resolves once `name` has been announced by `ServiceExtensionAdded`.
    pub async fn wait_for_extension(&self, name: &str) -> Result<()> {
        let mut observed = self.observed.clone();
        let seen = observed
            .wait_for(|o| o.extensions.contains(name))
            .await
            .map(|_| ());
        seen.map_err(|_| Error::ChannelClosed)
    }

    /// Whether the main isolate already lists `name` among its registered
    /// extensions. Covers registrations that happened before this connection
    /// subscribed.
    pub async fn isolate_has_extension(&self, name: &str) -> Result<bool> {
        let isolate_id = self.main_isolate_id().await?;
        let info = self.handle.get_isolate(&isolate_id).await?;
        Ok(info.has_extension(name))
    }

    /// Resolves once an `Extension` event with this `extensionKind` has
    /// been seen on this connection.
    pub async fn wait_for_extension_event(&self, kind: &str) -> Result<()> {
        let mut observed = self.observed.clone();
        let seen = observed
            .wait_for(|o| o.extension_events.get(kind).copied().unwrap_or(0) > 0)
            .await
            .map(|_| ());
        seen.map_err(|_| Error::ChannelClosed)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<VmServiceEvent> {
        self.events.subscribe()
    }

    /// Resolves when the transport is gone.
    pub async fn done(&self) {
        let mut done = self.done.clone();
        let _ = done.wait_for(|d| *d).await;
    }

    /// Owned view of the done flag, for watchers that outlive a borrow.
    pub fn done_signal(&self) -> watch::Receiver<bool> {
        self.done.clone()
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow() || self.handle.is_closed()
    }

    pub async fn close(&self) {
        self.handle.disconnect().await;
        self.pump.abort();
    }

    pub fn handle(&self) -> &VmRequestHandle {
        &self.handle
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    async fn main_isolate_id(&self) -> Result<String> {
        let cached = self.main_isolate.lock().ok().and_then(|g| g.clone());
        if let Some(id) = cached {
            return Ok(id);
        }
        let isolate = self.handle.first_isolate().await?;
        self.set_main_isolate(&isolate.id);
        Ok(isolate.id)
    }

    fn set_main_isolate(&self, id: &str) {
        if let Ok(mut guard) = self.main_isolate.lock() {
            *guard = Some(id.to_string());
        }
    }
}

impl Drop for ServiceConnection {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn open_with_retry<C>(
    connector: &C,
    uri: &str,
    options: &ConnectOptions,
) -> Result<VmServiceClient>
where
    C: ServiceConnector + Sync,
{
    let deadline = Instant::now() + options.connect_timeout;
    let mut attempt = 1u32;

    loop {
        let last_error = match tokio::time::timeout_at(deadline, connector.open(uri)).await {
            Ok(Ok(client)) => return Ok(client),
            Ok(Err(err)) => err.to_string(),
            Err(_) => "attempt timed out".to_string(),
        };

        if Instant::now() + options.retry_interval > deadline {
            return Err(Error::connection(format!(
                "{uri} unreachable after {}s: {last_error}",
                options.connect_timeout.as_secs()
            )));
        }

        debug!(
            "Connect attempt {} to {} failed ({}), retrying",
            attempt, uri, last_error
        );
        attempt += 1;
        tokio::time::sleep(options.retry_interval).await;
    }
}

#[cfg(test)]
mod tests;
