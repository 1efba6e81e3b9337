//! Host configuration loaded from TOML.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smartpad_protocol::keepalive::{
    DEFAULT_CONNECTION_TIMEOUT, DEFAULT_KEEP_ALIVE_INTERVAL, DEFAULT_STORED_PINGS,
};
use smartpad_protocol::{ClientConfig, KeepAliveConfig};
use smartpad_types::{
    CodeError, CodeGenerator, ConnectionCode, ADDRESS_PREFIX, DEFAULT_ALPHABET, DEFAULT_CODE_LENGTH,
};

use crate::server::{ServerSettings, DEFAULT_MAX_RETRIES};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub keepalive: KeepAliveSection,
    #[serde(default)]
    pub log: LogConfig,
}

/// Connection code and address settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_alphabet")]
    pub alphabet: String,
    #[serde(default = "default_code_length")]
    pub code_length: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Code to try first on start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_code: Option<String>,
    #[serde(default = "default_address_prefix")]
    pub address_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            alphabet: default_alphabet(),
            code_length: default_code_length(),
            max_retries: default_max_retries(),
            desired_code: None,
            address_prefix: default_address_prefix(),
        }
    }
}

impl ServerConfig {
    pub fn code_generator(&self) -> Result<CodeGenerator, CodeError> {
        CodeGenerator::new(&self.alphabet, self.code_length)
    }

    pub fn desired_code(&self) -> Result<Option<ConnectionCode>, CodeError> {
        self.desired_code
            .as_deref()
            .map(ConnectionCode::parse)
            .transpose()
    }
}

/// Keepalive timing, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveSection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_stored_pings")]
    pub stored_pings: usize,
}

impl Default for KeepAliveSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
            stored_pings: default_stored_pings(),
        }
    }
}

impl KeepAliveSection {
    pub fn to_keep_alive(&self) -> KeepAliveConfig {
        KeepAliveConfig {
            interval: Duration::from_millis(self.interval_ms),
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            stored_pings: self.stored_pings,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn server_settings(&self) -> Result<ServerSettings, CodeError> {
        Ok(ServerSettings {
            generator: self.server.code_generator()?,
            address_prefix: self.server.address_prefix.clone(),
            max_retries: self.server.max_retries,
            keep_alive: self.keepalive.to_keep_alive(),
        })
    }

    /// Settings for clients connecting to a server with this config.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            address_prefix: self.server.address_prefix.clone(),
            keep_alive: self.keepalive.to_keep_alive(),
            ..ClientConfig::default()
        }
    }
}

fn default_alphabet() -> String {
    DEFAULT_ALPHABET.to_string()
}

fn default_code_length() -> usize {
    DEFAULT_CODE_LENGTH
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_address_prefix() -> String {
    ADDRESS_PREFIX.to_string()
}

fn default_interval_ms() -> u64 {
    u64::try_from(DEFAULT_KEEP_ALIVE_INTERVAL.as_millis()).unwrap_or(100)
}

fn default_connection_timeout_ms() -> u64 {
    u64::try_from(DEFAULT_CONNECTION_TIMEOUT.as_millis()).unwrap_or(5000)
}

fn default_stored_pings() -> usize {
    DEFAULT_STORED_PINGS
}

fn default_log_level() -> String {
    "info".to_string()
}
