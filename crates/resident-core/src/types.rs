//! Core domain types

use std::fmt;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────
// Target Platform
// ─────────────────────────────────────────────────────────

/// Platform a device runs.
///
/// Discovery tools report many spellings (`android-arm64`, `ios_x64`,
/// `darwin`, `web-javascript`); [`TargetPlatform::from_id`] folds them into
/// this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPlatform {
    Android,
    Ios,
    #[serde(alias = "darwin")]
    MacOs,
    Linux,
    Windows,
    Fuchsia,
    Web,
    Tester,
    Unknown,
}

impl TargetPlatform {
    /// Parse a platform identifier as reported by device discovery.
    pub fn from_id(id: &str) -> Self {
        let id = id.to_ascii_lowercase();
        match id.as_str() {
            p if p.starts_with("android") => TargetPlatform::Android,
            p if p.starts_with("ios") => TargetPlatform::Ios,
            "darwin" | "macos" | "darwin-x64" | "darwin-arm64" => TargetPlatform::MacOs,
            p if p.starts_with("linux") => TargetPlatform::Linux,
            p if p.starts_with("windows") => TargetPlatform::Windows,
            p if p.starts_with("fuchsia") => TargetPlatform::Fuchsia,
            "chrome" | "web" | "web-javascript" => TargetPlatform::Web,
            "tester" | "flutter-tester" => TargetPlatform::Tester,
            _ => TargetPlatform::Unknown,
        }
    }

    /// Stable identifier used in config files and package lookups.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetPlatform::Android => "android",
            TargetPlatform::Ios => "ios",
            TargetPlatform::MacOs => "macos",
            TargetPlatform::Linux => "linux",
            TargetPlatform::Windows => "windows",
            TargetPlatform::Fuchsia => "fuchsia",
            TargetPlatform::Web => "web",
            TargetPlatform::Tester => "tester",
            TargetPlatform::Unknown => "unknown",
        }
    }

    /// Short display name
    pub fn display_name(&self) -> &'static str {
        match self {
            TargetPlatform::Android => "Android",
            TargetPlatform::Ios => "iOS",
            TargetPlatform::MacOs => "macOS",
            TargetPlatform::Linux => "Linux",
            TargetPlatform::Windows => "Windows",
            TargetPlatform::Fuchsia => "Fuchsia",
            TargetPlatform::Web => "Web",
            TargetPlatform::Tester => "Tester",
            TargetPlatform::Unknown => "Unknown",
        }
    }

    /// Whether a relaunched app posts `Flutter.FrameworkInitialization`.
    ///
    /// Web targets restart in the browser and never send it.
    pub fn emits_framework_init(&self) -> bool {
        !matches!(self, TargetPlatform::Web | TargetPlatform::Unknown)
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────
// Device
// ─────────────────────────────────────────────────────────

/// Feature flags a device advertises at discovery time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    pub supports_start_paused: bool,
    pub supports_restart: bool,
    pub supports_screenshot: bool,
    pub is_local_emulator: bool,
}

impl DeviceCapabilities {
    /// Capabilities of a typical debuggable device.
    pub fn full() -> Self {
        Self {
            supports_start_paused: true,
            supports_restart: true,
            supports_screenshot: true,
            is_local_emulator: false,
        }
    }
}

/// An attachable target. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub platform: TargetPlatform,
    #[serde(default)]
    pub capabilities: DeviceCapabilities,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>, platform: TargetPlatform) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            platform,
            capabilities: DeviceCapabilities::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Display string, marking local emulators.
    pub fn display_name(&self) -> String {
        if self.capabilities.is_local_emulator {
            let kind = match self.platform {
                TargetPlatform::Ios => "simulator",
                TargetPlatform::Android => "emulator",
                _ => "virtual",
            };
            format!("{} ({})", self.name, kind)
        } else {
            self.name.clone()
        }
    }
}

// ─────────────────────────────────────────────────────────
// Pause State
// ─────────────────────────────────────────────────────────

/// Pause state of an isolate as observed when attaching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PauseState {
    Start,
    Exit,
    Breakpoint,
    Exception,
    Interrupted,
    Resumed,
    Unknown,
}

impl PauseState {
    /// Map a VM Service `pauseEvent.kind` to a pause state.
    ///
    /// A missing kind is treated as `None`, which a runnable isolate that has
    /// never paused reports.
    pub fn from_event_kind(kind: Option<&str>) -> Self {
        match kind.unwrap_or("None") {
            "PauseStart" => PauseState::Start,
            "PauseExit" => PauseState::Exit,
            "PauseBreakpoint" => PauseState::Breakpoint,
            "PauseException" => PauseState::Exception,
            "PauseInterrupted" => PauseState::Interrupted,
            "Resume" | "None" => PauseState::Resumed,
            _ => PauseState::Unknown,
        }
    }

    /// Paused somewhere other than at start; a plain resume is enough.
    pub fn is_paused_mid_run(&self) -> bool {
        matches!(
            self,
            PauseState::Exit
                | PauseState::Breakpoint
                | PauseState::Exception
                | PauseState::Interrupted
        )
    }
}

// ─────────────────────────────────────────────────────────
// Operation Result
// ─────────────────────────────────────────────────────────

/// Uniform result of reload, restart and stop. Code 0 is success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub code: i32,
    pub message: String,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            code: 0,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: 1,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} (code {})", self.message, self.code)
        }
    }
}

// ─────────────────────────────────────────────────────────
// Launch Options
// ─────────────────────────────────────────────────────────

/// Build mode the application is launched in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Debug,
    Profile,
    Release,
}

impl RunMode {
    pub fn as_arg(&self) -> &'static str {
        match self {
            RunMode::Debug => "debug",
            RunMode::Profile => "profile",
            RunMode::Release => "release",
        }
    }

    /// Only debug builds support hot reload and restart.
    pub fn is_debug(&self) -> bool {
        matches!(self, RunMode::Debug)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebuggingOptions {
    /// Expose a VM Service endpoint and wait for it after launch.
    pub debugging_enabled: bool,
    pub start_paused: bool,
    /// Fixed host port for the VM Service, if any.
    pub observatory_port: Option<u16>,
}

impl DebuggingOptions {
    pub fn enabled() -> Self {
        Self {
            debugging_enabled: true,
            ..Default::default()
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_state_mapping() {
        assert_eq!(
            PauseState::from_event_kind(Some("PauseStart")),
            PauseState::Start
        );
        assert_eq!(
            PauseState::from_event_kind(Some("PauseExit")),
            PauseState::Exit
        );
        assert_eq!(
            PauseState::from_event_kind(Some("PauseBreakpoint")),
            PauseState::Breakpoint
        );
        assert_eq!(
            PauseState::from_event_kind(Some("PauseException")),
            PauseState::Exception
        );
        assert_eq!(
            PauseState::from_event_kind(Some("PauseInterrupted")),
            PauseState::Interrupted
        );
        assert_eq!(
            PauseState::from_event_kind(Some("Resume")),
            PauseState::Resumed
        );
        assert_eq!(PauseState::from_event_kind(Some("None")), PauseState::Resumed);
        assert_eq!(PauseState::from_event_kind(None), PauseState::Resumed);
        assert_eq!(
            PauseState::from_event_kind(Some("PausePostRequest")),
            PauseState::Unknown
        );
    }

    #[test]
    fn test_paused_mid_run() {
        assert!(PauseState::Breakpoint.is_paused_mid_run());
        assert!(!PauseState::Start.is_paused_mid_run());
        assert!(!PauseState::Resumed.is_paused_mid_run());
        assert!(!PauseState::Unknown.is_paused_mid_run());
    }

    #[test]
    fn test_platform_from_id() {
        assert_eq!(
            TargetPlatform::from_id("android-arm64"),
            TargetPlatform::Android
        );
        assert_eq!(TargetPlatform::from_id("ios_x64"), TargetPlatform::Ios);
        assert_eq!(TargetPlatform::from_id("darwin"), TargetPlatform::MacOs);
        assert_eq!(
            TargetPlatform::from_id("web-javascript"),
            TargetPlatform::Web
        );
        assert_eq!(TargetPlatform::from_id("linux-x64"), TargetPlatform::Linux);
        assert_eq!(TargetPlatform::from_id("amiga"), TargetPlatform::Unknown);
    }

    #[test]
    fn test_platform_framework_init() {
        assert!(TargetPlatform::Android.emits_framework_init());
        assert!(!TargetPlatform::Web.emits_framework_init());
    }

    #[test]
    fn test_platform_serde_accepts_darwin() {
        let p: TargetPlatform = serde_json::from_str("\"darwin\"").unwrap();
        assert_eq!(p, TargetPlatform::MacOs);
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"macos\"");
    }

    #[test]
    fn test_operation_result() {
        let ok = OperationResult::ok("Reloaded in 120ms");
        assert!(ok.is_ok());
        assert_eq!(ok.to_string(), "Reloaded in 120ms");

        let err = OperationResult::error("Reload failed on pixel");
        assert!(!err.is_ok());
        assert_eq!(err.to_string(), "Reload failed on pixel (code 1)");
    }

    #[test]
    fn test_device_display_name() {
        let phone = Device::new("emulator-5554", "sdk gphone64", TargetPlatform::Android)
            .with_capabilities(DeviceCapabilities {
                is_local_emulator: true,
                ..DeviceCapabilities::full()
            });
        assert_eq!(phone.display_name(), "sdk gphone64 (emulator)");

        let desktop = Device::new("linux", "Linux", TargetPlatform::Linux);
        assert_eq!(desktop.display_name(), "Linux");
    }

    #[test]
    fn test_run_mode() {
        assert_eq!(RunMode::default(), RunMode::Debug);
        assert!(RunMode::Debug.is_debug());
        assert!(!RunMode::Release.is_debug());
        assert_eq!(RunMode::Profile.as_arg(), "profile");
    }
}
