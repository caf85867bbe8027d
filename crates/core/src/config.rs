//! Configuration management for the ResQ vehicle core.
//!
//! Configuration is read from a TOML file, optionally overridden from the
//! environment, and validated before any component is started.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment override for `server.graphql_http_url`
pub const ENV_GRAPHQL_HTTP_URL: &str = "RESQ_GRAPHQL_HTTP_URL";
/// Environment override for `server.graphql_ws_url`
pub const ENV_GRAPHQL_WS_URL: &str = "RESQ_GRAPHQL_WS_URL";
/// Environment override for `server.asset_base_url`
pub const ENV_ASSET_BASE_URL: &str = "RESQ_ASSET_BASE_URL";
/// Environment override for `routing.provider_url`
pub const ENV_ROUTING_URL: &str = "RESQ_ROUTING_URL";
/// Environment override for `session.db_path`
pub const ENV_SESSION_DB: &str = "RESQ_SESSION_DB";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub graphql_http_url: String,
    pub graphql_ws_url: String,
    /// Base for relative proof-image paths. Empty means paths are kept as-is.
    #[serde(default)]
    pub asset_base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_location_fallback_secs")]
    pub location_fallback_secs: u64,
    #[serde(default = "default_assignment_poll_secs")]
    pub assignment_poll_secs: u64,
    #[serde(default = "default_countdown_tick_ms")]
    pub countdown_tick_ms: u64,
    #[serde(default = "default_offer_ttl_secs")]
    pub default_offer_ttl_secs: u32,
    #[serde(default = "default_feed_max_reconnects")]
    pub feed_max_reconnects: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingConfig {
    /// OSRM-compatible base URL. Without it every route is the straight two-point view.
    #[serde(default)]
    pub provider_url: Option<String>,
    #[serde(default = "default_recompute_drift_m")]
    pub recompute_drift_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_session_db")]
    pub db_path: PathBuf,
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_location_fallback_secs() -> u64 {
    9
}

fn default_assignment_poll_secs() -> u64 {
    10
}

fn default_countdown_tick_ms() -> u64 {
    250
}

fn default_offer_ttl_secs() -> u32 {
    15
}

fn default_feed_max_reconnects() -> u32 {
    5
}

fn default_recompute_drift_m() -> f64 {
    25.0
}

fn default_session_db() -> PathBuf {
    PathBuf::from("resq-session.db")
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            location_fallback_secs: default_location_fallback_secs(),
            assignment_poll_secs: default_assignment_poll_secs(),
            countdown_tick_ms: default_countdown_tick_ms(),
            default_offer_ttl_secs: default_offer_ttl_secs(),
            feed_max_reconnects: default_feed_max_reconnects(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            provider_url: None,
            recompute_drift_m: default_recompute_drift_m(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            db_path: default_session_db(),
        }
    }
}

impl TimingConfig {
    pub fn location_fallback(&self) -> Duration {
        Duration::from_secs(self.location_fallback_secs)
    }

    pub fn assignment_poll(&self) -> Duration {
        Duration::from_secs(self.assignment_poll_secs)
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Config {
    /// Load a configuration file, apply environment overrides and validate.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            server: ServerConfig {
                graphql_http_url: "http://localhost:5000/graphql".to_string(),
                graphql_ws_url: "ws://localhost:5000/graphql".to_string(),
                asset_base_url: "http://localhost:5000".to_string(),
                request_timeout_ms: default_request_timeout_ms(),
            },
            timing: TimingConfig::default(),
            routing: RoutingConfig::default(),
            session: SessionConfig::default(),
        }
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_GRAPHQL_HTTP_URL) {
            self.server.graphql_http_url = v;
        }
        if let Some(v) = lookup(ENV_GRAPHQL_WS_URL) {
            self.server.graphql_ws_url = v;
        }
        if let Some(v) = lookup(ENV_ASSET_BASE_URL) {
            self.server.asset_base_url = v;
        }
        if let Some(v) = lookup(ENV_ROUTING_URL) {
            self.routing.provider_url = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = lookup(ENV_SESSION_DB) {
            self.session.db_path = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_url(&self.server.graphql_http_url, &["http", "https"], "server.graphql_http_url")?;
        check_url(&self.server.graphql_ws_url, &["ws", "wss"], "server.graphql_ws_url")?;
        if !self.server.asset_base_url.is_empty() {
            check_url(&self.server.asset_base_url, &["http", "https"], "server.asset_base_url")?;
        }
        if let Some(provider) = &self.routing.provider_url {
            check_url(provider, &["http", "https"], "routing.provider_url")?;
        }

        let timing = &self.timing;
        if timing.location_fallback_secs == 0 {
            return Err(invalid("timing.location_fallback_secs must be > 0"));
        }
        if timing.assignment_poll_secs == 0 {
            return Err(invalid("timing.assignment_poll_secs must be > 0"));
        }
        if timing.countdown_tick_ms == 0 {
            return Err(invalid("timing.countdown_tick_ms must be > 0"));
        }
        if timing.default_offer_ttl_secs == 0 {
            return Err(invalid("timing.default_offer_ttl_secs must be > 0"));
        }
        if !(self.routing.recompute_drift_m >= 0.0) {
            return Err(invalid("routing.recompute_drift_m must be >= 0"));
        }
        if self.server.request_timeout_ms == 0 {
            return Err(invalid("server.request_timeout_ms must be > 0"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> Error {
    Error::ConfigInvalid(msg.to_string())
}

fn check_url(raw: &str, schemes: &[&str], field: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| Error::ConfigInvalid(format!("{field}: {e}")))?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(Error::ConfigInvalid(format!(
            "{field}: unsupported scheme '{}', expected one of {:?}",
            parsed.scheme(),
            schemes
        )));
    }
    Ok(())
}
