//! Settings loading

use std::path::{Path, PathBuf};

use resident_core::prelude::*;

use super::types::Settings;

pub const CONFIG_FILENAME: &str = "config.toml";
pub const RESIDENT_DIR: &str = ".resident";

pub fn config_path(project_path: &Path) -> PathBuf {
    project_path.join(RESIDENT_DIR).join(CONFIG_FILENAME)
}

/// Load `.resident/config.toml` from the project. A missing or unreadable
/// file yields the defaults.
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = config_path(project_path);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}
