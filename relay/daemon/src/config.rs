//! Configuration file loading
//!
//! An explicit `--config` path must exist. Without one, the default path is
//! used if present, otherwise the environment.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use relay_core::DispatcherConfig;

/// `$XDG_CONFIG_HOME/relay/relay.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("relay").join("relay.toml"))
}

/// Parse one TOML file
pub fn load_config_from_path(path: &Path) -> Result<DispatcherConfig> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {path:?}"))?;
    let config = DispatcherConfig::from_toml_str(&source)
        .with_context(|| format!("Invalid config file: {path:?}"))?;
    info!(path = ?path, "Loaded configuration");
    Ok(config)
}

/// Resolve the configuration for this run
pub fn load_config(explicit: Option<&Path>) -> Result<DispatcherConfig> {
    if let Some(path) = explicit {
        return load_config_from_path(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => {
            debug!("No config file, using environment");
            Ok(DispatcherConfig::from_env())
        }
    }
}
