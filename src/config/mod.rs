//! Configuration loading and address resolution
//!
//! ```yaml
//! endpoint:
//!   host: qms.plant.local
//!   port: 8000
//!   secure: true
//!   # base_url: https://gateway.plant.local   (overrides host/port/secure)
//! reconnect:
//!   max_attempts: 10
//!   delay_ms: 5000
//! consumer:
//!   recent_messages: 100
//!   auto_connect: true
//! ```
//!
//! Every section and field is optional. The environment variable
//! [`BASE_URL_ENV`] overrides `endpoint.base_url` for non-default
//! deployments.

use crate::core::ConfigError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use url::Url;

/// Path appended to the base address when no explicit address is given
pub const WS_PATH: &str = "/ws/realtime/";

/// Environment variable overriding the base address
pub const BASE_URL_ENV: &str = "REALTIME_BASE_URL";

/// Where the server lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,

    /// Use `wss://` instead of `ws://`
    pub secure: bool,

    /// Full base address; wins over host, port and secure when set
    pub base_url: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            secure: false,
            base_url: None,
        }
    }
}

impl EndpointConfig {
    /// Base address without the WebSocket path
    ///
    /// `http(s)` base URLs are mapped to `ws(s)`.
    pub fn base_address(&self) -> String {
        match &self.base_url {
            Some(base) => {
                let base = base.trim_end_matches('/');
                if let Some(rest) = base.strip_prefix("https://") {
                    format!("wss://{}", rest)
                } else if let Some(rest) = base.strip_prefix("http://") {
                    format!("ws://{}", rest)
                } else {
                    base.to_string()
                }
            }
            None => {
                let scheme = if self.secure { "wss" } else { "ws" };
                format!("{}://{}:{}", scheme, self.host, self.port)
            }
        }
    }
}

/// Reconnection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 5000,
        }
    }
}

/// Defaults for consumer adapters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Capacity of each consumer's recent-message buffer
    pub recent_messages: usize,
    pub auto_connect: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            recent_messages: 100,
            auto_connect: true,
        }
    }
}

/// Complete client configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: EndpointConfig,
    pub reconnect: ReconnectConfig,
    pub consumer: ConsumerConfig,
}

impl ClientConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the client unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consumer.recent_messages == 0 {
            return Err(ConfigError::InvalidValue {
                field: "consumer.recent_messages".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.endpoint.base_url.is_none() && self.endpoint.host.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "endpoint.host".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        validate_address(&self.resolve_address(None))?;
        Ok(())
    }

    /// Apply the [`BASE_URL_ENV`] override, if set
    pub fn apply_env_overrides(self) -> Self {
        let base_url = std::env::var(BASE_URL_ENV).ok();
        self.with_base_url_override(base_url)
    }

    /// Replace the base address when `base_url` is a non-empty value
    pub fn with_base_url_override(mut self, base_url: Option<String>) -> Self {
        if let Some(base_url) = base_url.filter(|b| !b.trim().is_empty()) {
            tracing::debug!(base_url = %base_url, "Base address overridden");
            self.endpoint.base_url = Some(base_url.trim().to_string());
        }
        self
    }

    /// The address a consumer connects to
    ///
    /// `explicit` wins; otherwise the base address plus [`WS_PATH`].
    pub fn resolve_address(&self, explicit: Option<&str>) -> String {
        match explicit {
            Some(address) => address.to_string(),
            None => format!("{}{}", self.endpoint.base_address(), WS_PATH),
        }
    }
}

/// Parse `address` and make sure a WebSocket can be opened to it
pub fn validate_address(address: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let url = Url::parse(address).map_err(|e| invalid(e.to_string()))?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(invalid(format!(
            "unsupported scheme '{}', expected ws or wss",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }

    Ok(url)
}
