pub mod defaults;
pub mod settings;
pub mod user;

use std::path::Path;

use log::{info, warn};

pub use settings::{
    EngineSettings, HealthPolicy, HealthSettings, ReconnectPolicy, ReconnectSettings, RpcSettings,
};
pub use user::{load_settings_file, load_user_config, user_config_path};

use crate::error::RpcResult;

/// Merge a list of settings layers, later layers taking precedence.
pub fn merge_all(configs: &[Option<RpcSettings>]) -> Option<RpcSettings> {
    configs.iter().cloned().reduce(merge_settings).flatten()
}

/// Merge two RpcSettings, preferring values from `primary` over `fallback`
pub fn merge_settings(
    fallback: Option<RpcSettings>,
    primary: Option<RpcSettings>,
) -> Option<RpcSettings> {
    match (fallback, primary) {
        (None, None) => None,
        (Some(settings), None) => Some(settings),
        (None, Some(settings)) => Some(settings),
        (Some(fallback), Some(primary)) => Some(RpcSettings {
            endpoint: primary.endpoint.or(fallback.endpoint),
            websocket_url: primary.websocket_url.or(fallback.websocket_url),
            disable_websocket: primary.disable_websocket.or(fallback.disable_websocket),
            // Header tables merge key by key
            default_headers: match (fallback.default_headers, primary.default_headers) {
                (Some(mut base), Some(over)) => {
                    base.extend(over);
                    Some(base)
                }
                (base, over) => over.or(base),
            },
            reconnect: match (fallback.reconnect, primary.reconnect) {
                (Some(base), Some(over)) => Some(ReconnectSettings {
                    floor_ms: over.floor_ms.or(base.floor_ms),
                    ceiling_ms: over.ceiling_ms.or(base.ceiling_ms),
                }),
                (base, over) => over.or(base),
            },
            health: match (fallback.health, primary.health) {
                (Some(base), Some(over)) => Some(HealthSettings {
                    interval_ms: over.interval_ms.or(base.interval_ms),
                    error_threshold: over.error_threshold.or(base.error_threshold),
                }),
                (base, over) => over.or(base),
            },
        }),
    }
}

/// Load settings from every layer and resolve them.
///
/// Layers, lowest precedence first: programmed defaults, user config,
/// `project_file`, `overrides`. A broken user config is skipped with a
/// warning; a broken explicit project file is an error.
pub fn load_settings(
    project_file: Option<&Path>,
    overrides: Option<RpcSettings>,
) -> RpcResult<EngineSettings> {
    let defaults = Some(defaults::default_settings());

    let user_config = match load_user_config() {
        Ok(Some(settings)) => {
            info!(target: "wsrpc::config", "Loaded user config");
            Some(settings)
        }
        Ok(None) => None,
        Err(err) => {
            warn!(target: "wsrpc::config", "Failed to load user config: {}", err);
            None
        }
    };

    let project = match project_file {
        Some(path) => {
            let settings = load_settings_file(path)?;
            info!(target: "wsrpc::config", "Loaded config file: {}", path.display());
            Some(settings)
        }
        None => None,
    };

    let merged = merge_all(&[defaults, user_config, project, overrides]).unwrap_or_default();
    EngineSettings::try_from(merged)
}
