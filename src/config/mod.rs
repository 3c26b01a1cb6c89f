//! Configuration management

use crate::proxy::ProxyData;
use crate::secret::Secret;
use crate::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server to connect to
    pub endpoint: Option<EndpointConfig>,
    /// Proxy to connect through
    pub proxy: Option<ProxyData>,
    /// Socket settings
    #[serde(default)]
    pub transport: TransportConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, crate::Error> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }

    /// Effective proxy, `None` when unset
    pub fn proxy(&self) -> ProxyData {
        self.proxy.clone().unwrap_or_default()
    }

    /// Socket settings, widened to the file-transfer buffers when `files` is set
    pub fn transport_profile(&self, files: bool) -> TransportConfig {
        if !files {
            return self.transport.clone();
        }
        TransportConfig {
            connect_timeout: self.transport.connect_timeout,
            read_chunk_size: self.transport.read_chunk_size,
            nodelay: self.transport.nodelay,
            ..TransportConfig::for_files()
        }
    }

    /// Check that the configured secrets and proxy are usable
    pub fn validate(&self) -> Result<(), crate::Error> {
        if let Some(endpoint) = &self.endpoint {
            let secret = endpoint.secret();
            if !endpoint.secret.trim().is_empty() && secret.is_empty() {
                return Err(crate::Error::InvalidSecret(
                    "endpoint secret is neither hex nor base64".to_string(),
                ));
            }
            if !secret.validate() {
                return Err(crate::Error::InvalidSecret(format!(
                    "endpoint secret has unsupported shape ({} bytes)",
                    secret.len()
                )));
            }
        }
        if let Some(proxy) = &self.proxy {
            if !proxy.valid() {
                return Err(crate::Error::Config(format!(
                    "Incomplete {:?} proxy settings",
                    proxy.kind
                )));
            }
        }
        Ok(())
    }
}

/// Server endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Connection secret, hex or base64url (empty for none)
    #[serde(default)]
    pub secret: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "149.154.167.51".to_string(),
            port: 443,
            secret: String::new(),
        }
    }
}

impl EndpointConfig {
    /// Decoded connection secret
    pub fn secret(&self) -> Secret {
        Secret::parse(&self.secret)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,
    /// Log output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Filter directive to install, a command line level wins over the file
    pub fn filter(&self, override_level: Option<&str>) -> String {
        override_level.unwrap_or(&self.level).to_string()
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Generate example configuration
pub fn generate_example_config() -> Config {
    Config {
        endpoint: Some(EndpointConfig {
            secret: "ee000102030405060708090a0b0c0d0e0f7777772e676f6f676c652e636f6d".to_string(),
            ..EndpointConfig::default()
        }),
        proxy: Some(ProxyData::socks5("127.0.0.1", 1080)),
        transport: TransportConfig::default(),
        logging: LoggingConfig::default(),
    }
}
