//! Dart VM Service JSON-RPC over WebSocket.
//!
//! - [`protocol`]: wire types, the request tracker and the frame parser.
//! - [`client`]: the WebSocket client and its cloneable request handle.
//! - [`extensions`]: Flutter service extension names and typed calls.
//! - [`commands`]: driver-extension commands and response decoding.
//! - [`connection`]: the attach handshake and the connected session.

pub mod client;
pub mod commands;
pub mod connection;
pub mod extensions;
pub mod protocol;

pub use client::{VmRequestHandle, VmServiceClient};
pub use commands::{decode_response, GetHealth, Health, HealthStatus, ServiceCommand};
pub use connection::{
    to_ws_uri, ConnectOptions, LocalServiceConnector, ServiceConnection, ServiceConnector,
    WebSocketConnector,
};
pub use extensions::{
    debug_dump, exit_app, flip_toggle, next_platform_override, platform_override, reassemble,
    reload_sources, screenshot, DebugDumpKind, DebugToggle, ReloadReport,
};
pub use protocol::{
    FlutterView, IsolateInfo, IsolateRef, StreamEvent, VmServiceEvent,
    FILE_SYSTEM_ALREADY_EXISTS, ISOLATE_MUST_BE_PAUSED,
};
