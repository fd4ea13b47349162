//! Device discovery
//!
//! [`DeviceRegistry`] polls a [`DeviceSource`] on a fixed interval and
//! turns successive snapshots into [`DeviceEvent`]s.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use resident_core::prelude::*;
use resident_core::{Device, DeviceCapabilities, DeviceEvent, TargetPlatform};

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

const EVENT_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Anything that can list the currently attached devices.
#[trait_variant::make(DeviceSource: Send)]
pub trait LocalDeviceSource {
    async fn polling_get_devices(&self) -> Result<Vec<Device>>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct RegistryInner<S> {
    source: S,
    interval: Duration,
    snapshot: RwLock<Arc<[Device]>>,
    polled: std::sync::atomic::AtomicBool,
    events: broadcast::Sender<DeviceEvent>,
}

impl<S: DeviceSource + Sync> RegistryInner<S> {
    async fn poll_once(&self) -> Result<Vec<DeviceEvent>> {
        let devices = self.source.polling_get_devices().await?;
        self.polled
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let events = {
            let mut snapshot = self
                .snapshot
                .write()
                .map_err(|_| Error::discovery("device snapshot lock poisoned"))?;
            let events = diff_devices(&snapshot, &devices);
            *snapshot = Arc::from(devices);
            events
        };

        for event in &events {
            debug!(
                "Device {}: {}",
                if event.is_added() { "added" } else { "removed" },
                event.device().id
            );
            let _ = self.events.send(event.clone());
        }
        Ok(events)
    }

    fn snapshot(&self) -> Arc<[Device]> {
        self.snapshot
            .read()
            .map(|s| Arc::clone(&s))
            .unwrap_or_else(|_| Arc::from(Vec::new()))
    }
}

/// Polling registry of attachable devices.
pub struct DeviceRegistry<S> {
    inner: Arc<RegistryInner<S>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl<S> DeviceRegistry<S>
where
    S: DeviceSource + Send + Sync + 'static,
{
    pub fn new(source: S) -> Self {
        Self::with_interval(source, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_interval(source: S, interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                source,
                interval,
                snapshot: RwLock::new(Arc::from(Vec::new())),
                polled: std::sync::atomic::AtomicBool::new(false),
                events,
            }),
            poller: Mutex::new(None),
        }
    }

    /// Start the background poll. Calling it again does nothing.
    pub fn start_polling(&self) {
        let Ok(mut poller) = self.poller.lock() else {
            return;
        };
        if poller.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        *poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.interval);
            loop {
                ticker.tick().await;
                if let Err(err) = inner.poll_once().await {
                    warn!("Device poll failed: {}", err);
                }
            }
        }));
        debug!("Device polling started every {:?}", self.inner.interval);
    }

    pub fn stop_polling(&self) {
        if let Ok(mut poller) = self.poller.lock() {
            if let Some(task) = poller.take() {
                task.abort();
            }
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller.lock().map(|p| p.is_some()).unwrap_or(false)
    }

    /// Current snapshot; polls once if nothing has been polled yet.
    pub async fn devices(&self) -> Result<Arc<[Device]>> {
        if !self.is_polling()
            && !self
                .inner
                .polled
                .load(std::sync::atomic::Ordering::SeqCst)
        {
            self.inner.poll_once().await?;
        }
        Ok(self.inner.snapshot())
    }

    /// Poll now, outside the regular cadence.
    pub async fn refresh(&self) -> Result<Vec<DeviceEvent>> {
        self.inner.poll_once().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.events.subscribe()
    }

    pub async fn get_device_by_id(&self, query: &str) -> Result<Option<Device>> {
        let devices = self.devices().await?;
        Ok(find_device(&devices, query).cloned())
    }
}

impl<S> Drop for DeviceRegistry<S> {
    fn drop(&mut self) {
        if let Ok(mut poller) = self.poller.lock() {
            if let Some(task) = poller.take() {
                task.abort();
            }
        }
    }
}

/// Removed devices (in old order) followed by added devices (in new order).
/// Devices present in both lists produce no event.
pub fn diff_devices(old: &[Device], new: &[Device]) -> Vec<DeviceEvent> {
    let removed = old
        .iter()
        .filter(|d| !new.iter().any(|n| n.id == d.id))
        .cloned()
        .map(DeviceEvent::Removed);
    let added = new
        .iter()
        .filter(|d| !old.iter().any(|o| o.id == d.id))
        .cloned()
        .map(DeviceEvent::Added);
    removed.chain(added).collect()
}

/// Resolve a user-supplied device id.
///
/// A case-insensitive exact match on id or name wins. Otherwise a prefix of
/// an id or name matches if exactly one device has it.
pub fn find_device<'a>(devices: &'a [Device], query: &str) -> Option<&'a Device> {
    let query = query.to_lowercase();

    if let Some(exact) = devices
        .iter()
        .find(|d| d.id.to_lowercase() == query || d.name.to_lowercase() == query)
    {
        return Some(exact);
    }

    let mut candidates = devices.iter().filter(|d| {
        d.id.to_lowercase().starts_with(&query) || d.name.to_lowercase().starts_with(&query)
    });
    match (candidates.next(), candidates.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Command-backed source
// ---------------------------------------------------------------------------

/// Runs a discovery program (by default `flutter devices --machine`) and
/// parses its JSON device list.
#[derive(Debug, Clone)]
pub struct CommandDeviceSource {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Default for CommandDeviceSource {
    fn default() -> Self {
        Self::new("flutter", vec!["devices".into(), "--machine".into()])
    }
}

impl CommandDeviceSource {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn resolve_program(&self) -> Result<PathBuf> {
        which::which(&self.program).map_err(|e| {
            Error::discovery(format!("'{}' not found on PATH: {e}", self.program))
        })
    }
}

impl DeviceSource for CommandDeviceSource {
    async fn polling_get_devices(&self) -> Result<Vec<Device>> {
        let program = self.resolve_program()?;
        let output = timeout(
            self.timeout,
            Command::new(&program)
                .args(&self.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| Error::timeout(format!("{} did not finish", self.program)))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            // Some backends fail (missing adb) yet still list other devices.
            if !(stdout.contains('[') && stdout.contains(']')) {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(Error::discovery(format!(
                    "{} exited with {:?}: {}",
                    self.program,
                    output.status.code(),
                    stderr.trim()
                )));
            }
            warn!(
                "{} exited with {:?} but produced a device list",
                self.program,
                output.status.code()
            );
        }

        parse_devices_output(&stdout)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineDevice {
    id: String,
    name: String,
    #[serde(alias = "targetPlatform")]
    platform: String,
    #[serde(default)]
    emulator: bool,
    #[serde(default)]
    capabilities: MachineCapabilities,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineCapabilities {
    #[serde(default)]
    hot_restart: bool,
    #[serde(default)]
    screenshot: bool,
    #[serde(default)]
    start_paused: bool,
}

impl From<MachineDevice> for Device {
    fn from(raw: MachineDevice) -> Self {
        Device::new(raw.id, raw.name, TargetPlatform::from_id(&raw.platform)).with_capabilities(
            DeviceCapabilities {
                supports_start_paused: raw.capabilities.start_paused,
                supports_restart: raw.capabilities.hot_restart,
                supports_screenshot: raw.capabilities.screenshot,
                is_local_emulator: raw.emulator,
            },
        )
    }
}

/// Parse a `--machine` device list, ignoring any text around the JSON array.
pub fn parse_devices_output(output: &str) -> Result<Vec<Device>> {
    let json_str = match (output.find('['), output.rfind(']')) {
        (Some(start), Some(end)) if end > start => &output[start..=end],
        _ => {
            warn!("No JSON array found in device list output");
            return Ok(Vec::new());
        }
    };

    let devices: Vec<MachineDevice> = serde_json::from_str(json_str)
        .map_err(|e| Error::protocol(format!("Failed to parse device list: {e}")))?;
    Ok(devices.into_iter().map(Device::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_device, FakeDeviceSource};

    #[test]
    fn test_parse_devices_output_with_noise() {
        let output = r#"Downloading tools...
[
  {
    "name": "Pixel 8 API 34",
    "id": "emulator-5554",
    "isSupported": true,
    "targetPlatform": "android-arm64",
    "emulator": true,
    "capabilities": {"hotReload": true, "hotRestart": true, "screenshot": true, "startPaused": true}
  },
  {
    "name": "Linux",
    "id": "linux",
    "targetPlatform": "linux-x64",
    "emulator": false,
    "capabilities": {"hotReload": true, "hotRestart": true, "screenshot": false, "startPaused": true}
  }
]
"#;
        let devices = parse_devices_output(output).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].platform, TargetPlatform::Android);
        assert!(devices[0].capabilities.is_local_emulator);
        assert!(devices[0].capabilities.supports_screenshot);
        assert_eq!(devices[1].platform, TargetPlatform::Linux);
        assert!(!devices[1].capabilities.supports_screenshot);
    }

    #[test]
    fn test_parse_devices_output_without_array() {
        assert!(parse_devices_output("No devices found").unwrap().is_empty());
    }

    #[test]
    fn test_diff_devices_scenario() {
        let a = test_device("A", "Alpha");
        let b = test_device("B", "Beta");
        let c = test_device("C", "Gamma");

        let first = diff_devices(&[], &[a.clone(), b.clone()]);
        assert_eq!(
            first,
            vec![DeviceEvent::Added(a.clone()), DeviceEvent::Added(b.clone())]
        );

        let second = diff_devices(&[a.clone(), b.clone()], &[b, c.clone()]);
        assert_eq!(
            second,
            vec![DeviceEvent::Removed(a), DeviceEvent::Added(c)]
        );
    }

    #[test]
    fn test_find_device_exact_then_unique_prefix() {
        let devices = vec![
            test_device("emulator-5554", "Pixel 8"),
            test_device("emulator-5556", "Pixel 7"),
            test_device("00008101-ABC", "iPhone 15"),
        ];

        assert_eq!(
            find_device(&devices, "EMULATOR-5554").map(|d| d.id.as_str()),
            Some("emulator-5554")
        );
        assert_eq!(
            find_device(&devices, "iphone").map(|d| d.id.as_str()),
            Some("00008101-ABC")
        );
        assert_eq!(
            find_device(&devices, "pixel 7").map(|d| d.id.as_str()),
            Some("emulator-5556")
        );
        // Ambiguous prefix
        assert!(find_device(&devices, "emulator").is_none());
        assert!(find_device(&devices, "pixel").is_none());
        assert!(find_device(&devices, "windows").is_none());
    }

    #[tokio::test]
    async fn test_registry_emits_diff_events() {
        let a = test_device("A", "Alpha");
        let b = test_device("B", "Beta");
        let c = test_device("C", "Gamma");
        let source = FakeDeviceSource::new(vec![vec![a.clone(), b.clone()], vec![b, c.clone()]]);
        let registry = DeviceRegistry::new(source);
        let mut events = registry.subscribe();

        registry.refresh().await.unwrap();
        registry.refresh().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[2], DeviceEvent::Removed(a));
        assert_eq!(seen[3], DeviceEvent::Added(c));
    }

    #[tokio::test]
    async fn test_devices_polls_lazily_once() {
        let source = FakeDeviceSource::new(vec![vec![test_device("A", "Alpha")]]);
        let registry = DeviceRegistry::new(source.clone());

        assert_eq!(registry.devices().await.unwrap().len(), 1);
        assert_eq!(registry.devices().await.unwrap().len(), 1);
        assert_eq!(source.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_polling_is_idempotent_and_periodic() {
        let source = FakeDeviceSource::new(vec![vec![test_device("A", "Alpha")]]);
        let registry = DeviceRegistry::new(source.clone());

        registry.start_polling();
        registry.start_polling();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.poll_count(), 1);

        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 2).await;
        assert_eq!(source.poll_count(), 3);

        registry.stop_polling();
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 2).await;
        assert_eq!(source.poll_count(), 3);
    }

    #[tokio::test]
    async fn test_get_device_by_id() {
        let source = FakeDeviceSource::new(vec![vec![
            test_device("emulator-5554", "Pixel 8"),
            test_device("linux", "Linux"),
        ]]);
        let registry = DeviceRegistry::new(source);
        let found = registry.get_device_by_id("lin").await.unwrap();
        assert_eq!(found.map(|d| d.id), Some("linux".to_string()));
    }
}
