//! Gateway configuration model
//!
//! The document has two sections: `mcpProxy` with the gateway's own settings
//! (listen address, base URL, default backend options) and `mcpServers`, a
//! map from backend name to that backend's connection settings and options.
//! Backend options inherit field-by-field from `mcpProxy.options`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::ServerInfo;

/// Default listen address
const DEFAULT_ADDR: &str = ":9090";
/// Default shutdown drain deadline in seconds
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;
/// Default per-backend health probe timeout in seconds
const DEFAULT_HEALTH_PROBE_TIMEOUT_SECS: u64 = 10;

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid backend name '{0}': must be non-empty and must not contain '/'")]
    InvalidBackendName(String),

    #[error("Invalid listen address '{0}'")]
    InvalidAddr(String),
}

/// Top-level configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Gateway settings
    #[serde(default)]
    pub mcp_proxy: GatewaySettings,
    /// Backends by name
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, BackendConfig>,
}

impl ProxyConfig {
    /// Check invariants the loader cannot express through serde alone
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mcp_proxy.addr.trim().is_empty() {
            return Err(ConfigError::InvalidAddr(self.mcp_proxy.addr.clone()));
        }
        for name in self.mcp_servers.keys() {
            if name.is_empty() || name.contains('/') {
                return Err(ConfigError::InvalidBackendName(name.clone()));
            }
        }
        Ok(())
    }

    /// Effective options for a backend, after inheriting gateway defaults
    pub fn effective_options(&self, backend: &BackendConfig) -> EffectiveOptions {
        backend.options.inherit(&self.mcp_proxy.options)
    }
}

/// Settings for the gateway process itself
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySettings {
    /// Public base URL; only its path is used, as the prefix of every mount
    #[serde(rename = "baseURL", default)]
    pub base_url: String,
    /// Listen address (`host:port`, or `:port` for all interfaces)
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Display name presented to backends
    #[serde(default = "default_name")]
    pub name: String,
    /// Version presented to backends
    #[serde(default = "default_version")]
    pub version: String,
    /// Graceful shutdown deadline in seconds
    #[serde(rename = "shutdownTimeout", default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    /// Per-backend health probe timeout in seconds
    #[serde(rename = "healthProbeTimeout", default = "default_health_probe_timeout")]
    pub health_probe_timeout_secs: u64,
    /// Default options inherited by every backend
    #[serde(default)]
    pub options: BackendOptions,
}

fn default_addr() -> String {
    DEFAULT_ADDR.to_string()
}

fn default_name() -> String {
    "mcpx".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_shutdown_timeout() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

fn default_health_probe_timeout() -> u64 {
    DEFAULT_HEALTH_PROBE_TIMEOUT_SECS
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            addr: default_addr(),
            name: default_name(),
            version: default_version(),
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            health_probe_timeout_secs: DEFAULT_HEALTH_PROBE_TIMEOUT_SECS,
            options: BackendOptions::default(),
        }
    }
}

impl GatewaySettings {
    /// Address in a form `TcpListener::bind` accepts.
    ///
    /// `:9090` binds every interface, like the conventional Go notation.
    pub fn listen_addr(&self) -> String {
        let addr = self.addr.trim();
        if addr.starts_with(':') {
            format!("0.0.0.0{}", addr)
        } else {
            addr.to_string()
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health_probe_timeout_secs)
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

/// Connection settings for one backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Backend endpoint URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extra headers sent with every request to the backend
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Per-request timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Per-backend options; unset fields inherit gateway defaults
    #[serde(default)]
    pub options: BackendOptions,
}

impl BackendConfig {
    /// Config for a backend reachable at `url`, with default options
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }
}

/// Verbosity of the per-backend request log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Options as written in the configuration; `None` means "inherit"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendOptions {
    /// Abort the whole gateway when this backend fails to connect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panic_if_invalid: Option<bool>,
    /// Log every request routed to this backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_enabled: Option<bool>,
    /// Level used by the request log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
    /// Accepted bearer tokens; empty disables auth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_tokens: Option<Vec<String>>,
}

impl BackendOptions {
    /// Resolve against `defaults`, field by field
    pub fn inherit(&self, defaults: &BackendOptions) -> EffectiveOptions {
        EffectiveOptions {
            panic_if_invalid: self
                .panic_if_invalid
                .or(defaults.panic_if_invalid)
                .unwrap_or(false),
            log_enabled: self.log_enabled.or(defaults.log_enabled).unwrap_or(false),
            log_level: self.log_level.or(defaults.log_level).unwrap_or_default(),
            auth_tokens: self
                .auth_tokens
                .clone()
                .or_else(|| defaults.auth_tokens.clone())
                .unwrap_or_default(),
        }
    }
}

/// Fully resolved per-backend options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveOptions {
    pub panic_if_invalid: bool,
    pub log_enabled: bool,
    pub log_level: LogLevel,
    pub auth_tokens: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let json = r#"{
            "mcpProxy": {
                "baseURL": "https://mcp.example.com/mcp",
                "addr": ":9090",
                "name": "Gateway",
                "version": "1.0.0",
                "shutdownTimeout": 3,
                "options": { "logEnabled": true, "authTokens": ["root"] }
            },
            "mcpServers": {
                "weather": {
                    "url": "http://127.0.0.1:3001/mcp",
                    "headers": { "X-Api-Key": "k" },
                    "options": { "panicIfInvalid": true, "logLevel": "debug" }
                }
            }
        }"#;
        let config: ProxyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.mcp_proxy.base_url, "https://mcp.example.com/mcp");
        assert_eq!(config.mcp_proxy.shutdown_timeout(), Duration::from_secs(3));
        assert_eq!(
            config.mcp_proxy.health_probe_timeout(),
            Duration::from_secs(DEFAULT_HEALTH_PROBE_TIMEOUT_SECS)
        );

        let weather = &config.mcp_servers["weather"];
        assert_eq!(weather.headers["X-Api-Key"], "k");

        let effective = config.effective_options(weather);
        assert!(effective.panic_if_invalid);
        assert!(effective.log_enabled);
        assert_eq!(effective.log_level, LogLevel::Debug);
        assert_eq!(effective.auth_tokens, vec!["root".to_string()]);
    }

    #[test]
    fn options_default_when_unset() {
        let effective = BackendOptions::default().inherit(&BackendOptions::default());
        assert_eq!(effective, EffectiveOptions::default());
        assert!(!effective.panic_if_invalid);
        assert!(effective.auth_tokens.is_empty());
    }

    #[test]
    fn explicit_empty_tokens_override_defaults() {
        let defaults = BackendOptions {
            auth_tokens: Some(vec!["root".into()]),
            ..Default::default()
        };
        let own = BackendOptions {
            auth_tokens: Some(vec![]),
            ..Default::default()
        };
        assert!(own.inherit(&defaults).auth_tokens.is_empty());
    }

    #[test]
    fn listen_addr_expands_port_only_form() {
        let mut settings = GatewaySettings::default();
        assert_eq!(settings.listen_addr(), "0.0.0.0:9090");
        settings.addr = "127.0.0.1:8080".into();
        assert_eq!(settings.listen_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn validate_rejects_slash_in_name() {
        let mut config = ProxyConfig::default();
        config
            .mcp_servers
            .insert("a/b".into(), BackendConfig::default());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBackendName(name)) if name == "a/b"
        ));
    }

    #[test]
    fn validate_accepts_defaults() {
        let mut config = ProxyConfig::default();
        config
            .mcp_servers
            .insert("weather".into(), BackendConfig::with_url("http://x"));
        assert!(config.validate().is_ok());
    }
}
