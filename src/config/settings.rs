use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{RpcError, RpcResult};

/// Reconnect backoff section of the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectSettings {
    pub floor_ms: Option<u64>,
    pub ceiling_ms: Option<u64>,
}

/// Health monitor section of the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSettings {
    pub interval_ms: Option<u64>,
    pub error_threshold: Option<u32>,
}

/// Settings as written in `wsrpc.toml`, every field optional so layers can be merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcSettings {
    pub endpoint: Option<String>,
    pub websocket_url: Option<String>,
    pub disable_websocket: Option<bool>,
    pub default_headers: Option<BTreeMap<String, String>>,
    pub reconnect: Option<ReconnectSettings>,
    pub health: Option<HealthSettings>,
}

/// Exponential reconnect backoff: floor, doubling, capped at ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub floor: Duration,
    pub ceiling: Duration,
}

/// Health monitor window and error threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub interval: Duration,
    pub error_threshold: u32,
}

/// Fully resolved engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Base endpoint (`http(s)://` or `ws(s)://`). Required only by `RpcClient::connect`.
    pub endpoint: Option<Url>,
    /// Explicit bidirectional URL; derived from `endpoint` when absent.
    pub websocket_url: Option<Url>,
    /// Run on the discrete transport only.
    pub disable_websocket: bool,
    /// Headers for discrete requests whose envelopes carry no header.
    pub default_headers: BTreeMap<String, String>,
    pub reconnect: ReconnectPolicy,
    pub health: HealthPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            websocket_url: None,
            disable_websocket: false,
            default_headers: BTreeMap::new(),
            reconnect: ReconnectPolicy {
                floor: Duration::from_millis(super::defaults::RECONNECT_FLOOR_MS),
                ceiling: Duration::from_millis(super::defaults::RECONNECT_CEILING_MS),
            },
            health: HealthPolicy {
                interval: Duration::from_millis(super::defaults::HEALTH_INTERVAL_MS),
                error_threshold: super::defaults::HEALTH_ERROR_THRESHOLD,
            },
        }
    }
}

fn parse_url(field: &str, raw: &str) -> RpcResult<Url> {
    Url::parse(raw).map_err(|e| RpcError::config(format!("{} {:?} is not a URL: {}", field, raw, e)))
}

/// Swap the scheme between the discrete and bidirectional families.
fn with_scheme(url: &Url, scheme: &str) -> RpcResult<Url> {
    let mut swapped = url.clone();
    swapped
        .set_scheme(scheme)
        .map_err(|_| RpcError::config(format!("cannot use scheme {} for {}", scheme, url)))?;
    Ok(swapped)
}

impl EngineSettings {
    /// URL for discrete round trips: the endpoint with an `http`/`https` scheme.
    pub fn http_url(&self) -> RpcResult<Url> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| RpcError::config("endpoint is not set"))?;
        match endpoint.scheme() {
            "http" | "https" => Ok(endpoint.clone()),
            "ws" => with_scheme(endpoint, "http"),
            "wss" => with_scheme(endpoint, "https"),
            other => Err(RpcError::config(format!("unsupported endpoint scheme: {}", other))),
        }
    }

    /// URL for the bidirectional transport: `websocketUrl`, or the endpoint with `ws`/`wss`.
    pub fn websocket_url(&self) -> RpcResult<Url> {
        if let Some(url) = &self.websocket_url {
            return Ok(url.clone());
        }
        let http = self.http_url()?;
        match http.scheme() {
            "https" => with_scheme(&http, "wss"),
            _ => with_scheme(&http, "ws"),
        }
    }
}

impl TryFrom<RpcSettings> for EngineSettings {
    type Error = RpcError;

    fn try_from(settings: RpcSettings) -> RpcResult<Self> {
        let mut resolved = EngineSettings::default();

        if let Some(endpoint) = settings.endpoint.as_deref() {
            resolved.endpoint = Some(parse_url("endpoint", endpoint)?);
        }
        if let Some(websocket_url) = settings.websocket_url.as_deref() {
            resolved.websocket_url = Some(parse_url("websocketUrl", websocket_url)?);
        }
        resolved.disable_websocket = settings.disable_websocket.unwrap_or(false);
        resolved.default_headers = settings.default_headers.unwrap_or_default();

        if let Some(reconnect) = settings.reconnect {
            if let Some(floor) = reconnect.floor_ms {
                resolved.reconnect.floor = std::time::Duration::from_millis(floor);
            }
            if let Some(ceiling) = reconnect.ceiling_ms {
                resolved.reconnect.ceiling = std::time::Duration::from_millis(ceiling);
            }
        }
        if resolved.reconnect.floor.is_zero() {
            return Err(RpcError::config("reconnect.floorMs must be greater than 0"));
        }
        if resolved.reconnect.ceiling < resolved.reconnect.floor {
            return Err(RpcError::config(
                "reconnect.ceilingMs must be >= reconnect.floorMs",
            ));
        }

        if let Some(health) = settings.health {
            if let Some(interval) = health.interval_ms {
                resolved.health.interval = std::time::Duration::from_millis(interval);
            }
            if let Some(threshold) = health.error_threshold {
                resolved.health.error_threshold = threshold;
            }
        }
        if resolved.health.interval.is_zero() {
            return Err(RpcError::config("health.intervalMs must be greater than 0"));
        }
        if resolved.health.error_threshold == 0 {
            return Err(RpcError::config(
                "health.errorThreshold must be greater than 0",
            ));
        }

        Ok(resolved)
    }
}
