//! Commands sent through the driver extension.
//!
//! Each command is a flat string map with a `command` discriminator,
//! delivered as one extension call. Replies come either wrapped as
//! `{"response": {...}, "isError": bool}` or as the bare map.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use resident_core::prelude::*;

/// Code reported when the driver itself answers with `isError: true`.
pub const DRIVER_ERROR_CODE: i32 = -32000;

/// A typed driver command.
pub trait ServiceCommand {
    type Response: DeserializeOwned;

    /// Value of the `command` discriminator.
    fn kind(&self) -> &'static str;

    /// Extra string fields sent alongside `command`.
    fn fields(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Name used when wrapping remote errors.
    fn name(&self) -> &'static str;

    /// Flatten into the extension argument map.
    fn to_args(&self) -> HashMap<String, String> {
        let mut args = self.fields();
        args.insert("command".to_string(), self.kind().to_string());
        args
    }
}

/// Decode a driver reply for `command_name`.
pub fn decode_response<R: DeserializeOwned>(command_name: &str, result: Value) -> Result<R> {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let body = match result.get("response") {
        Some(inner) => inner.clone(),
        None => result,
    };

    if is_error {
        let message = match &body {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(Error::Remote {
            command: command_name.to_string(),
            code: DRIVER_ERROR_CODE,
            message,
        });
    }

    serde_json::from_value(body)
        .map_err(|e| Error::protocol(format!("decode {command_name} response: {e}")))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct GetHealth;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Bad,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Health {
    pub status: HealthStatus,
}

impl ServiceCommand for GetHealth {
    type Response = Health;

    fn kind(&self) -> &'static str {
        "get_health"
    }

    fn name(&self) -> &'static str {
        "GetHealth"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_health_args() {
        let args = GetHealth.to_args();
        assert_eq!(args.get("command").map(String::as_str), Some("get_health"));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_decode_wrapped_response() {
        let health: Health = decode_response(
            "GetHealth",
            json!({"isError": false, "response": {"status": "ok"}}),
        )
        .unwrap();
        assert_eq!(health.status, HealthStatus::Ok);
    }

    #[test]
    fn test_decode_flat_response() {
        let health: Health = decode_response("GetHealth", json!({"status": "bad"})).unwrap();
        assert_eq!(health.status, HealthStatus::Bad);
    }

    #[test]
    fn test_decode_driver_error_is_wrapped() {
        let err = decode_response::<Health>(
            "GetHealth",
            json!({"isError": true, "response": "Unknown command"}),
        )
        .unwrap_err();
        match err {
            Error::Remote {
                command, message, ..
            } => {
                assert_eq!(command, "GetHealth");
                assert_eq!(message, "Unknown command");
            }
            other => panic!("expected Remote, got {other:?}"),
        }
    }
}
