//! User configuration loading for wsrpc.
//!
//! User config location: $XDG_CONFIG_HOME/wsrpc/wsrpc.toml
//! Fallback: the platform config directory (e.g. ~/.config/wsrpc/wsrpc.toml)

use std::fs;
use std::path::{Path, PathBuf};

use super::settings::RpcSettings;
use crate::error::{RpcError, RpcResult};

/// Returns the path to the user configuration file.
///
/// Returns None if no config directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join("wsrpc").join("wsrpc.toml"));
    }

    dirs::config_dir().map(|dir| dir.join("wsrpc").join("wsrpc.toml"))
}

/// Read and parse one settings file.
pub fn load_settings_file(path: &Path) -> RpcResult<RpcSettings> {
    let contents = fs::read_to_string(path)?;
    toml::from_str::<RpcSettings>(&contents)
        .map_err(|e| RpcError::config(format!("failed to parse {}: {}", path.display(), e)))
}

/// Load the user config.
///
/// Returns `Ok(None)` when no user config file exists.
pub fn load_user_config() -> RpcResult<Option<RpcSettings>> {
    let Some(path) = user_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }
    load_settings_file(&path).map(Some)
}
