//! # resident-core - Core Domain Types
//!
//! Foundation crate for the resident runner. Provides the device model, the
//! remote pause-state vocabulary, uniform operation results, error handling,
//! and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`Device`] - An attachable target with its [`DeviceCapabilities`]
//! - [`TargetPlatform`] - Platform a device runs (android, ios, linux, ...)
//! - [`PauseState`] - Closed set of isolate pause states seen at connect time
//! - [`OperationResult`] - `{code, message}` result of reload/restart/stop
//! - [`RunMode`], [`DebuggingOptions`] - How an application is launched
//!
//! ### Events (`events`)
//! - [`DeviceEvent`] - Added/removed notifications from the device registry
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! ```rust
//! use resident_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod types;

/// Prelude for common imports used throughout all resident crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use error::{Error, Result, ResultExt};
pub use events::DeviceEvent;
pub use types::{
    DebuggingOptions, Device, DeviceCapabilities, OperationResult, PauseState, RunMode,
    TargetPlatform,
};
