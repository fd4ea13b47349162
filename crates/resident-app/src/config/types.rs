//! Configuration types
//!
//! Every section and field is optional in the file; missing values fall
//! back to the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use resident_core::TargetPlatform;
use resident_daemon::devfs::DevFsConfig;
use resident_daemon::launcher::LaunchConfig;
use resident_daemon::vm_service::extensions::ext;
use resident_daemon::ConnectOptions;

/// Settings loaded from `.resident/config.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub behavior: BehaviorSettings,

    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub devfs: DevFsSettings,

    #[serde(default)]
    pub discovery: DiscoverySettings,

    #[serde(default)]
    pub launch: LaunchSettings,

    #[serde(default)]
    pub package: PackageSettings,

    #[serde(default)]
    pub watcher: WatcherSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BehaviorSettings {
    /// Keep running and accept commands after the app starts
    #[serde(default = "default_true")]
    pub stay_resident: bool,

    /// Leave the app running when the runner exits
    #[serde(default)]
    pub keep_app_running: bool,

    /// Print a notice when input is dropped because an operation is running
    #[serde(default)]
    pub announce_dropped_input: bool,
}

impl Default for BehaviorSettings {
    fn default() -> Self {
        Self {
            stay_resident: true,
            keep_app_running: false,
            announce_dropped_input: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionSettings {
    /// Service extension used for health checks and driver commands
    #[serde(default = "default_extension")]
    pub extension: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    #[serde(default = "default_extension_timeout_secs")]
    pub extension_timeout_secs: u64,

    /// Fail instead of proceeding on an unrecognized pause state
    #[serde(default)]
    pub strict_pause_state: bool,

    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            extension: default_extension(),
            connect_timeout_secs: default_connect_timeout_secs(),
            retry_interval_ms: default_retry_interval_ms(),
            extension_timeout_secs: default_extension_timeout_secs(),
            strict_pause_state: false,
            health_check: true,
        }
    }
}

impl ConnectionSettings {
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            extension: self.extension.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            extension_timeout: Duration::from_secs(self.extension_timeout_secs),
            strict_pause_state: self.strict_pause_state,
            health_check: self.health_check,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DevFsSettings {
    /// Sync sources before each reload
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Compare file digests, not only size and mtime
    #[serde(default = "default_true")]
    pub content_hash: bool,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Files or directories to mirror, relative to the project root
    #[serde(default = "default_devfs_paths")]
    pub paths: Vec<PathBuf>,

    #[serde(default = "default_packages_file")]
    pub packages_file: PathBuf,
}

impl Default for DevFsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            content_hash: true,
            batch_size: default_batch_size(),
            paths: default_devfs_paths(),
            packages_file: default_packages_file(),
        }
    }
}

impl DevFsSettings {
    pub fn devfs_config(&self, root: &Path, fs_name: &str) -> DevFsConfig {
        DevFsConfig {
            root: root.to_path_buf(),
            fs_name: fs_name.to_string(),
            paths: self.paths.clone(),
            packages_file: self.packages_file.clone(),
            batch_size: self.batch_size,
            content_hash: self.content_hash,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoverySettings {
    #[serde(default = "default_flutter")]
    pub program: String,

    #[serde(default = "default_discovery_args")]
    pub args: Vec<String>,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            program: default_flutter(),
            args: default_discovery_args(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl DiscoverySettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LaunchSettings {
    #[serde(default = "default_flutter")]
    pub program: String,

    /// `{device}`, `{target}`, `{mode}` and `{package}` are substituted
    #[serde(default = "default_launch_args")]
    pub args: Vec<String>,

    /// Entry point, relative to the project root
    #[serde(default = "default_target")]
    pub target: PathBuf,

    /// How long to wait for the service URI after launch
    #[serde(default = "default_uri_timeout_secs")]
    pub uri_timeout_secs: u64,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            program: default_flutter(),
            args: default_launch_args(),
            target: default_target(),
            uri_timeout_secs: default_uri_timeout_secs(),
        }
    }
}

impl LaunchSettings {
    pub fn launch_config(&self, working_dir: &Path) -> LaunchConfig {
        LaunchConfig {
            program: self.program.clone(),
            args: self.args.clone(),
            working_dir: working_dir.to_path_buf(),
            uri_timeout: Duration::from_secs(self.uri_timeout_secs),
        }
    }
}

/// Application package identity. An empty platform list allows every
/// platform.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PackageSettings {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub platforms: Vec<TargetPlatform>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherSettings {
    /// Reload automatically when watched files change
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Paths to watch (relative to project root)
    #[serde(default = "default_watch_paths")]
    pub paths: Vec<String>,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            paths: default_watch_paths(),
            debounce_ms: default_debounce_ms(),
            extensions: default_extensions(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_extension() -> String {
    ext::DRIVER.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_retry_interval_ms() -> u64 {
    1000
}

fn default_extension_timeout_secs() -> u64 {
    10
}

fn default_batch_size() -> usize {
    64
}

fn default_devfs_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("lib"),
        PathBuf::from("pubspec.yaml"),
        PathBuf::from(".dart_tool/package_config.json"),
    ]
}

fn default_packages_file() -> PathBuf {
    PathBuf::from(".dart_tool/package_config.json")
}

fn default_flutter() -> String {
    "flutter".to_string()
}

fn default_discovery_args() -> Vec<String> {
    vec!["devices".to_string(), "--machine".to_string()]
}

fn default_poll_interval_secs() -> u64 {
    4
}

fn default_launch_args() -> Vec<String> {
    LaunchConfig::default().args
}

fn default_target() -> PathBuf {
    PathBuf::from("lib/main.dart")
}

fn default_uri_timeout_secs() -> u64 {
    120
}

fn default_watch_paths() -> Vec<String> {
    vec!["lib".to_string()]
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_extensions() -> Vec<String> {
    vec!["dart".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_match_defaults() {
        let options = ConnectionSettings::default().connect_options();
        let expected = ConnectOptions::default();
        assert_eq!(options.extension, expected.extension);
        assert_eq!(options.connect_timeout, expected.connect_timeout);
        assert_eq!(options.retry_interval, expected.retry_interval);
        assert_eq!(options.extension_timeout, expected.extension_timeout);
        assert!(!options.strict_pause_state);
    }

    #[test]
    fn test_devfs_config_carries_settings() {
        let settings = DevFsSettings {
            batch_size: 8,
            content_hash: false,
            ..DevFsSettings::default()
        };
        let config = settings.devfs_config(Path::new("/work/app"), "app");
        assert_eq!(config.root, PathBuf::from("/work/app"));
        assert_eq!(config.fs_name, "app");
        assert_eq!(config.batch_size, 8);
        assert!(!config.content_hash);
        assert_eq!(config.paths.len(), 3);
    }

    #[test]
    fn test_package_platforms_parse_lowercase() {
        let package: PackageSettings =
            toml::from_str("id = \"com.example\"\nplatforms = [\"android\", \"ios\"]").unwrap();
        assert_eq!(package.id.as_deref(), Some("com.example"));
        assert_eq!(
            package.platforms,
            vec![TargetPlatform::Android, TargetPlatform::Ios]
        );
    }
}
