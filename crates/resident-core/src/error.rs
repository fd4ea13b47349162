//! Application error types with rich context

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Terminal error: {message}")]
    Terminal { message: String },

    // ─────────────────────────────────────────────────────────────
    // Service Connection Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to connect to service: {message}")]
    Connection { message: String },

    #[error(
        "Timed out waiting for extension '{extension}' to be registered. \
         Verify that the application registers it during startup."
    )]
    ExtensionNotRegistered { extension: String },

    #[error("Health check failed: {message}")]
    HealthCheck { message: String },

    #[error("VM Service error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("{command} failed with error {code}: {message}")]
    Remote {
        command: String,
        code: i32,
        message: String,
    },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // ─────────────────────────────────────────────────────────────
    // Sync Errors
    // ─────────────────────────────────────────────────────────────
    #[error("DevFS sync error: {message}")]
    Sync { message: String },

    // ─────────────────────────────────────────────────────────────
    // Device / Launch Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to launch application: {message}")]
    Launch { message: String },

    #[error("No application package available for platform: {platform}")]
    NoPackage { platform: String },

    #[error("No device found matching: {query}")]
    DeviceNotFound { query: String },

    #[error("Device discovery error: {message}")]
    Discovery { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    #[error("Timed out: {message}")]
    Timeout { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn extension_not_registered(extension: impl Into<String>) -> Self {
        Self::ExtensionNotRegistered {
            extension: extension.into(),
        }
    }

    pub fn health_check(message: impl Into<String>) -> Self {
        Self::HealthCheck {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync {
            message: message.into(),
        }
    }

    pub fn launch(message: impl Into<String>) -> Self {
        Self::Launch {
            message: message.into(),
        }
    }

    pub fn no_package(platform: impl Into<String>) -> Self {
        Self::NoPackage {
            platform: platform.into(),
        }
    }

    pub fn device_not_found(query: impl Into<String>) -> Self {
        Self::DeviceNotFound {
            query: query.into(),
        }
    }

    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Wrap a raw JSON-RPC error with the name of the command that caused it.
    ///
    /// Errors that are not [`Error::Rpc`] pass through unchanged.
    pub fn with_command(self, command: &str) -> Self {
        match self {
            Error::Rpc { code, message } => Error::Remote {
                command: command.to_string(),
                code,
                message,
            },
            other => other,
        }
    }

    /// Numeric remote error code, if this error came from the remote side.
    pub fn rpc_code(&self) -> Option<i32> {
        match self {
            Error::Rpc { code, .. } | Error::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Rpc { .. }
                | Error::Remote { .. }
                | Error::Protocol { .. }
                | Error::Sync { .. }
                | Error::ChannelSend { .. }
                | Error::Timeout { .. }
        )
    }

    /// Check if this error should abort startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. }
                | Error::ExtensionNotRegistered { .. }
                | Error::HealthCheck { .. }
                | Error::Launch { .. }
                | Error::NoPackage { .. }
                | Error::DeviceNotFound { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
