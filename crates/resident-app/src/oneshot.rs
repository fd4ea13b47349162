//! Single-shot commands that run without a resident loop

use std::path::{Path, PathBuf};

use resident_core::prelude::*;
use resident_core::Device;
use resident_daemon::vm_service::{exit_app, screenshot};
use resident_daemon::{ConnectOptions, DeviceRegistry, DeviceSource, ServiceConnection, ServiceConnector};

use crate::runner::save_screenshot;

pub fn format_device(device: &Device) -> String {
    format!(
        "{} • {} • {}",
        device.name,
        device.id,
        device.platform.as_str()
    )
}

/// One line per attached device.
pub async fn list_devices<S>(registry: &DeviceRegistry<S>) -> Result<Vec<String>>
where
    S: DeviceSource + Send + Sync + 'static,
{
    let devices = registry.devices().await?;
    Ok(devices.iter().map(format_device).collect())
}

/// Ask every view behind `uri` to exit. Returns how many accepted.
pub async fn stop_app<C>(connector: &C, uri: &str, options: &ConnectOptions) -> Result<usize>
where
    C: ServiceConnector + Sync,
{
    let connection = ServiceConnection::connect(connector, uri, options).await?;
    let views = connection.refresh_views().await?;

    let mut stopped = 0;
    for isolate in views.iter().filter_map(|v| v.isolate_id()) {
        match exit_app(connection.handle(), isolate).await {
            Ok(()) => stopped += 1,
            Err(err) => warn!("Exit of isolate {} failed: {}", isolate, err),
        }
    }
    connection.close().await;
    Ok(stopped)
}

/// Capture the screen behind `uri` into `out`, or the next free
/// `flutter_NN.png` in `dir`.
pub async fn take_screenshot<C>(
    connector: &C,
    uri: &str,
    options: &ConnectOptions,
    out: Option<&Path>,
    dir: &Path,
) -> Result<PathBuf>
where
    C: ServiceConnector + Sync,
{
    let connection = ServiceConnection::connect(connector, uri, options).await?;
    let captured = screenshot(connection.handle()).await;
    connection.close().await;
    let png = captured?;

    match out {
        Some(path) => {
            std::fs::write(path, &png)?;
            Ok(path.to_path_buf())
        }
        None => save_screenshot(dir, &png),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resident_daemon::test_utils::{
        test_device, FakeConnector, FakeDeviceSource, FakeVm, FAKE_PNG,
    };
    use resident_daemon::vm_service::extensions::ext;
    use tempfile::TempDir;

    const URI: &str = "ws://127.0.0.1:8181/ws";

    #[tokio::test]
    async fn test_list_devices() {
        let registry = DeviceRegistry::new(FakeDeviceSource::new(vec![vec![
            test_device("android-arm64", "Pixel 7"),
            test_device("linux", "Linux"),
        ]]));

        let lines = list_devices(&registry).await.unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "Pixel 7 • android-arm64 • android");
    }

    #[tokio::test]
    async fn test_stop_exits_every_view() {
        let connector = FakeConnector::new(FakeVm::new().with_views(2));

        let stopped = stop_app(&connector, URI, &ConnectOptions::default())
            .await
            .unwrap();

        assert_eq!(stopped, 2);
        assert_eq!(connector.last_control().unwrap().count(ext::EXIT), 2);
    }

    #[tokio::test]
    async fn test_stop_unreachable_service() {
        let options = ConnectOptions {
            connect_timeout: std::time::Duration::from_millis(50),
            retry_interval: std::time::Duration::from_millis(10),
            ..ConnectOptions::default()
        };
        assert!(stop_app(&FakeConnector::unreachable(), URI, &options)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_screenshot_to_explicit_file() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("shot.png");
        let connector = FakeConnector::new(FakeVm::new());

        let path = take_screenshot(
            &connector,
            URI,
            &ConnectOptions::default(),
            Some(&out),
            dir.path(),
        )
        .await
        .unwrap();

        assert_eq!(path, out);
        assert_eq!(std::fs::read(&out).unwrap(), FAKE_PNG);
    }

    #[tokio::test]
    async fn test_screenshot_to_next_free_name() {
        let dir = TempDir::new().unwrap();
        let connector = FakeConnector::new(FakeVm::new());

        let path = take_screenshot(&connector, URI, &ConnectOptions::default(), None, dir.path())
            .await
            .unwrap();

        assert!(path.ends_with("flutter_01.png"));
    }
}
