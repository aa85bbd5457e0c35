//! Default configuration values for wsrpc.

use super::settings::{HealthSettings, ReconnectSettings, RpcSettings};

/// Reconnect delay floor; every successful open resets the delay to it.
pub const RECONNECT_FLOOR_MS: u64 = 100;

/// Reconnect delay cap (20 minutes).
pub const RECONNECT_CEILING_MS: u64 = 1_200_000;

/// Health monitor window.
pub const HEALTH_INTERVAL_MS: u64 = 5_000;

/// Transport errors within one window that force-close the socket.
pub const HEALTH_ERROR_THRESHOLD: u32 = 10;

/// Returns the programmed defaults, the lowest settings layer.
pub fn default_settings() -> RpcSettings {
    RpcSettings {
        endpoint: None,
        websocket_url: None,
        disable_websocket: Some(false),
        default_headers: None,
        reconnect: Some(ReconnectSettings {
            floor_ms: Some(RECONNECT_FLOOR_MS),
            ceiling_ms: Some(RECONNECT_CEILING_MS),
        }),
        health: Some(HealthSettings {
            interval_ms: Some(HEALTH_INTERVAL_MS),
            error_threshold: Some(HEALTH_ERROR_THRESHOLD),
        }),
    }
}
