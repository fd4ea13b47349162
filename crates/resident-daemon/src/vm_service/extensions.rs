//! Flutter service extension calls.
//!
//! All extension calls share one shape: method `ext.flutter.<name>`, a
//! required `isolateId`, and string-valued extra params. Responses are
//! objects whose interesting field is also a string (`"enabled": "true"`).

use std::collections::HashMap;

use base64::engine::general_purpose;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};

use resident_core::prelude::*;

use super::client::VmRequestHandle;

/// Extension method names
pub mod ext {
    // ── Reload / lifecycle ──────────────────────────────────────────────────

    pub const REASSEMBLE: &str = "ext.flutter.reassemble";

    /// Ask the application to exit gracefully.
    pub const EXIT: &str = "ext.flutter.exit";

    /// Driver extension used for health checks unless configured otherwise.
    pub const DRIVER: &str = "ext.flutter.driver";

    // ── Debug overlays ──────────────────────────────────────────────────────

    pub const DEBUG_PAINT: &str = "ext.flutter.debugPaint";
    pub const SHOW_PERFORMANCE_OVERLAY: &str = "ext.flutter.showPerformanceOverlay";
    pub const PLATFORM_OVERRIDE: &str = "ext.flutter.platformOverride";

    // ── Debug dumps ─────────────────────────────────────────────────────────

    pub const DEBUG_DUMP_APP: &str = "ext.flutter.debugDumpApp";
    pub const DEBUG_DUMP_RENDER_TREE: &str = "ext.flutter.debugDumpRenderTree";
    pub const DEBUG_DUMP_LAYER_TREE: &str = "ext.flutter.debugDumpLayerTree";
    pub const DEBUG_DUMP_SEMANTICS_TREE: &str =
        "ext.flutter.debugDumpSemanticsTreeInTraversalOrder";

    // ── Events ──────────────────────────────────────────────────────────────

    /// `extensionKind` posted once the framework has bound its first frame.
    pub const FRAMEWORK_INITIALIZATION: &str = "Flutter.FrameworkInitialization";
}

/// Flutter engine RPCs that are not `ext.*` extensions.
pub mod rpc {
    pub const LIST_VIEWS: &str = "_flutter.listViews";
    pub const SCREENSHOT: &str = "_flutter.screenshot";
    pub const RELOAD_SOURCES: &str = "reloadSources";
    pub const CREATE_DEVFS: &str = "_createDevFS";
    pub const WRITE_DEVFS_FILES: &str = "_writeDevFSFiles";
    pub const DELETE_DEVFS_FILES: &str = "_deleteDevFSFiles";
    pub const DELETE_DEVFS: &str = "_deleteDevFS";
}

// ---------------------------------------------------------------------------
// Params / response parsing
// ---------------------------------------------------------------------------

/// Build the params object for an extension call.
pub(crate) fn build_extension_params(
    isolate_id: &str,
    args: Option<HashMap<String, String>>,
) -> Value {
    let mut params = serde_json::Map::new();
    params.insert("isolateId".to_string(), json!(isolate_id));
    if let Some(extra) = args {
        for (k, v) in extra {
            params.insert(k, json!(v));
        }
    }
    Value::Object(params)
}

/// Parse `{"enabled": "true" | "false"}`. The value is a string, not a bool.
pub fn parse_bool_extension_response(result: &Value) -> Result<bool> {
    result
        .get("enabled")
        .and_then(|v| v.as_str())
        .map(|s| s == "true")
        .ok_or_else(|| Error::protocol("missing 'enabled' field in extension response"))
}

/// Parse `{"data": "..."}` as returned by the dump extensions.
pub fn parse_data_extension_response(result: &Value) -> Result<String> {
    result
        .get("data")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::protocol("missing 'data' field in extension response"))
}

fn parse_value_extension_response(result: &Value) -> Result<String> {
    result
        .get("value")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::protocol("missing 'value' field in extension response"))
}

// ---------------------------------------------------------------------------
// Debug dumps
// ---------------------------------------------------------------------------

/// Which tree to dump as text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugDumpKind {
    WidgetTree,
    RenderTree,
    LayerTree,
    SemanticsTree,
}

impl DebugDumpKind {
    pub fn method(&self) -> &'static str {
        match self {
            Self::WidgetTree => ext::DEBUG_DUMP_APP,
            Self::RenderTree => ext::DEBUG_DUMP_RENDER_TREE,
            Self::LayerTree => ext::DEBUG_DUMP_LAYER_TREE,
            Self::SemanticsTree => ext::DEBUG_DUMP_SEMANTICS_TREE,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::WidgetTree => "widget tree",
            Self::RenderTree => "render tree",
            Self::LayerTree => "layer tree",
            Self::SemanticsTree => "semantics tree",
        }
    }
}

pub async fn debug_dump(
    handle: &VmRequestHandle,
    isolate_id: &str,
    kind: DebugDumpKind,
) -> Result<String> {
    let result = handle
        .call_extension(kind.method(), isolate_id, None)
        .await
        .map_err(|e| e.with_command(kind.method()))?;
    parse_data_extension_response(&result)
}

// ---------------------------------------------------------------------------
// Toggles
// ---------------------------------------------------------------------------

/// Boolean debug overlays that can be flipped per view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugToggle {
    DebugPaint,
    PerformanceOverlay,
}

impl DebugToggle {
    pub fn method(&self) -> &'static str {
        match self {
            Self::DebugPaint => ext::DEBUG_PAINT,
            Self::PerformanceOverlay => ext::SHOW_PERFORMANCE_OVERLAY,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::DebugPaint => "debug paint",
            Self::PerformanceOverlay => "performance overlay",
        }
    }
}

/// Set (`Some`) or query (`None`) a boolean extension; returns the state
/// after the call.
pub async fn toggle_bool_extension(
    handle: &VmRequestHandle,
    method: &str,
    isolate_id: &str,
    enabled: Option<bool>,
) -> Result<bool> {
    let args = enabled.map(|e| HashMap::from([("enabled".to_string(), e.to_string())]));
    let result = handle
        .call_extension(method, isolate_id, args)
        .await
        .map_err(|e| e.with_command(method))?;
    parse_bool_extension_response(&result)
}

/// Read the current state and write its negation.
pub async fn flip_toggle(
    handle: &VmRequestHandle,
    toggle: DebugToggle,
    isolate_id: &str,
) -> Result<bool> {
    let current = toggle_bool_extension(handle, toggle.method(), isolate_id, None).await?;
    toggle_bool_extension(handle, toggle.method(), isolate_id, Some(!current)).await
}

/// Query (`None`) or set the platform the framework pretends to run on.
pub async fn platform_override(
    handle: &VmRequestHandle,
    isolate_id: &str,
    value: Option<&str>,
) -> Result<String> {
    let args = value.map(|v| HashMap::from([("value".to_string(), v.to_string())]));
    let result = handle
        .call_extension(ext::PLATFORM_OVERRIDE, isolate_id, args)
        .await
        .map_err(|e| e.with_command(ext::PLATFORM_OVERRIDE))?;
    parse_value_extension_response(&result)
}

// ---------------------------------------------------------------------------
// Reload / lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReloadNotice {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

/// Result of `reloadSources` for one isolate.
#[derive(Debug, Clone, Deserialize)]
pub struct ReloadReport {
    pub success: bool,
    #[serde(default)]
    pub notices: Vec<ReloadNotice>,
}

impl ReloadReport {
    /// First notice message, used as the failure reason.
    pub fn reason(&self) -> Option<&str> {
        self.notices
            .iter()
            .map(|n| n.message.as_str())
            .find(|m| !m.is_empty())
    }
}

/// `reloadSources` with an optional relocated entry point and package map.
pub async fn reload_sources(
    handle: &VmRequestHandle,
    isolate_id: &str,
    root_lib_uri: Option<&str>,
    packages_uri: Option<&str>,
    pause: bool,
) -> Result<ReloadReport> {
    let mut params = serde_json::Map::new();
    params.insert("isolateId".to_string(), json!(isolate_id));
    params.insert("pause".to_string(), json!(pause));
    if let Some(uri) = root_lib_uri {
        params.insert("rootLibUri".to_string(), json!(uri));
    }
    if let Some(uri) = packages_uri {
        params.insert("packagesUri".to_string(), json!(uri));
    }

    let result = handle
        .request(rpc::RELOAD_SOURCES, Some(Value::Object(params)))
        .await
        .map_err(|e| e.with_command(rpc::RELOAD_SOURCES))?;
    serde_json::from_value(result)
        .map_err(|e| Error::protocol(format!("malformed reloadSources response: {e}")))
}

pub async fn reassemble(handle: &VmRequestHandle, isolate_id: &str) -> Result<()> {
    handle
        .call_extension(ext::REASSEMBLE, isolate_id, None)
        .await
        .map_err(|e| e.with_command(ext::REASSEMBLE))?;
    Ok(())
}

/// Ask the framework to exit the application gracefully.
pub async fn exit_app(handle: &VmRequestHandle, isolate_id: &str) -> Result<()> {
    handle
        .call_extension(ext::EXIT, isolate_id, None)
        .await
        .map_err(|e| e.with_command(ext::EXIT))?;
    Ok(())
}

/// Capture the device screen as PNG bytes.
pub async fn screenshot(handle: &VmRequestHandle) -> Result<Vec<u8>> {
    let result = handle
        .request(rpc::SCREENSHOT, None)
        .await
        .map_err(|e| e.with_command(rpc::SCREENSHOT))?;
    let encoded = result
        .get("screenshot")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::protocol("missing 'screenshot' field in response"))?;
    general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::protocol(format!("screenshot is not valid base64: {e}")))
}

/// Platform to switch to from `current`: iOS goes to android, anything
/// else goes to iOS.
pub fn next_platform_override(current: &str) -> &'static str {
    if current == "iOS" {
        "android"
    } else {
        "iOS"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_extension_params() {
        let params = build_extension_params(
            "isolates/1",
            Some(HashMap::from([("enabled".to_string(), "true".to_string())])),
        );
        assert_eq!(params["isolateId"], "isolates/1");
        assert_eq!(params["enabled"], "true");

        let bare = build_extension_params("isolates/2", None);
        assert_eq!(bare.as_object().map(|m| m.len()), Some(1));
    }

    #[test]
    fn test_parse_bool_extension_response() {
        assert!(parse_bool_extension_response(&json!({"enabled": "true"})).unwrap());
        assert!(!parse_bool_extension_response(&json!({"enabled": "false"})).unwrap());
        // JSON booleans are not what the framework sends
        assert!(parse_bool_extension_response(&json!({"enabled": true})).is_err());
        assert!(parse_bool_extension_response(&json!({})).is_err());
    }

    #[test]
    fn test_parse_data_extension_response() {
        let data = parse_data_extension_response(&json!({"data": "MyApp\n └Scaffold"})).unwrap();
        assert!(data.contains("Scaffold"));
        assert!(parse_data_extension_response(&json!({"value": "x"})).is_err());
    }

    #[test]
    fn test_dump_kind_methods() {
        assert_eq!(DebugDumpKind::WidgetTree.method(), ext::DEBUG_DUMP_APP);
        assert_eq!(
            DebugDumpKind::SemanticsTree.method(),
            "ext.flutter.debugDumpSemanticsTreeInTraversalOrder"
        );
    }

    #[test]
    fn test_next_platform_override() {
        assert_eq!(next_platform_override("iOS"), "android");
        assert_eq!(next_platform_override("android"), "iOS");
        assert_eq!(next_platform_override("fuchsia"), "iOS");
    }

    #[test]
    fn test_reload_report_reason() {
        let report: ReloadReport = serde_json::from_value(json!({
            "type": "ReloadReport",
            "success": false,
            "notices": [
                {"type": "ReasonForCancelling", "message": "Const class cannot become non-const"}
            ]
        }))
        .unwrap();
        assert!(!report.success);
        assert_eq!(report.reason(), Some("Const class cannot become non-const"));

        let ok: ReloadReport = serde_json::from_value(json!({"success": true})).unwrap();
        assert!(ok.success);
        assert_eq!(ok.reason(), None);
    }
}
