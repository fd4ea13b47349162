//! # resident-daemon - Process and Device Plumbing
//!
//! Everything that talks to a running application or a device. Depends on
//! [`resident_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### VM Service
//! - [`ServiceConnection`] - Attach handshake, pause-state handling, driver commands
//! - [`ServiceConnector`] - Injected transport strategy ([`WebSocketConnector`] in production)
//! - [`vm_service::extensions`] - Reload, reassemble, dumps, toggles, screenshots
//!
//! ### Devices
//! - [`DeviceRegistry`] - Polling discovery with add/remove events
//! - [`CommandDeviceSource`] - `flutter devices --machine` backed source
//!
//! ### Sync
//! - [`DevFs`] - Incremental mirror of the project tree on the device
//!
//! ### Launch
//! - [`DeviceLauncher`], [`PackageStore`] - Launch collaborators
//! - [`ProcessLauncher`] - Child-process launcher that scrapes the service URI
//! - [`LogReader`] - Per-device output broadcast

pub mod devfs;
pub mod devices;
pub mod launcher;
pub mod log_reader;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod vm_service;

pub use devfs::{DevFs, DevFsConfig, DevFsOperations, SyncEntry, VmDevFsOperations};
pub use devices::{
    diff_devices, find_device, CommandDeviceSource, DeviceRegistry, DeviceSource,
    DEFAULT_POLL_INTERVAL,
};
pub use launcher::{
    ApplicationPackage, DeviceLauncher, LaunchConfig, LaunchResult, PackageStore,
    ProcessLauncher, ProjectPackageStore,
};
pub use log_reader::{is_service_banner, FilteredLogs, LogLine, LogReader, LogStream};
pub use vm_service::{ConnectOptions, ServiceConnection, ServiceConnector, WebSocketConnector};
