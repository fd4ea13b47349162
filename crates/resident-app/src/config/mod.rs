//! Project configuration (`.resident/config.toml`)

pub mod settings;
pub mod types;

pub use settings::{config_path, load_settings, CONFIG_FILENAME, RESIDENT_DIR};
pub use types::*;
