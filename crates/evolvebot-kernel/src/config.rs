//! Configuration loading from `~/.evolvebot/config.toml` with defaults.

use evolvebot_types::config::EvolveConfig;
use evolvebot_types::evolvebot_home;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default config location.
pub fn default_config_path() -> PathBuf {
    evolvebot_home().join("config.toml")
}

/// Load configuration from a TOML file.
///
/// A missing, unreadable, or invalid file is logged and replaced by defaults,
/// so a bad config never prevents the agent itself from starting.
pub fn load_config(path: Option<&Path>) -> EvolveConfig {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return EvolveConfig::default();
    }

    let contents = match std::fs::read_to_string(&config_path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            return EvolveConfig::default();
        }
    };

    match toml::from_str::<EvolveConfig>(&contents) {
        Ok(config) => {
            info!(path = %config_path.display(), "Loaded configuration");
            config
        }
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to parse config, using defaults"
            );
            EvolveConfig::default()
        }
    }
}
