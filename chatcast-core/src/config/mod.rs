//! Configuration management for chatcast
//!
//! Defaults, an optional TOML file, then `CHATCAST_<SECTION>_<KEY>`
//! environment overrides, then validation.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub chat: ChatConfig,
    pub logging: LoggingConfig,
}

/// Transport and HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,

    /// Maximum concurrent WebSocket connections
    pub max_connections: usize,

    /// Outbound events buffered per peer before it is skipped
    pub peer_buffer: usize,

    /// Largest inbound frame accepted
    pub max_frame_bytes: usize,

    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Reject upgrades that carry no identity header
    pub require_identity: bool,

    /// Header carrying the authenticated user name, if any
    pub identity_header: String,
}

/// Which [`crate::chat::MessageStore`] backs the history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::invalid("store.backend", format!("unknown backend '{}'", other))),
        }
    }
}

/// Message store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// SQLite database file (sqlite backend only)
    pub path: PathBuf,

    pub pool_size: u32,

    /// Upper bound on any single store call
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
}

/// One ephemeral relay route: inbound event name to outbound event name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRoute {
    pub inbound: String,
    pub outbound: String,
}

impl RelayRoute {
    pub fn new(inbound: impl Into<String>, outbound: impl Into<String>) -> Self {
        Self {
            inbound: inbound.into(),
            outbound: outbound.into(),
        }
    }
}

/// Chat engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Dispatcher event queue capacity
    pub dispatcher_capacity: usize,

    /// Submissions one connection may have waiting behind its in-flight append
    pub max_pending_per_connection: usize,

    pub relay_routes: Vec<RelayRoute>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    pub json_format: bool,

    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 3000)),
            max_connections: 10_000,
            peer_buffer: 64,
            max_frame_bytes: 64 * 1024,
            shutdown_timeout: Duration::from_secs(30),
            require_identity: false,
            identity_header: "x-chat-user".to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: PathBuf::from("./data/chat.db"),
            pool_size: 4,
            operation_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            dispatcher_capacity: 1024,
            max_pending_per_connection: 32,
            relay_routes: vec![RelayRoute::new("productList", "updatedProducts")],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

/// Event names owned by the chat stream; relay routes may not use them
const RESERVED_EVENTS: [&str; 3] = [
    crate::chat::CHAT_EVENT,
    crate::chat::HISTORY_EVENT,
    crate::chat::JOIN_EVENT,
];

fn parse_var<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e| ConfigError::invalid(key, e))
}

impl Config {
    /// Defaults plus environment overrides
    ///
    /// Variables follow `CHATCAST_<SECTION>_<KEY>`, e.g.
    /// `CHATCAST_SERVER_BIND_ADDRESS=0.0.0.0:3000`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file; missing keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// File (if given) then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CHATCAST_SERVER_BIND_ADDRESS") {
            self.server.bind_address = parse_var("server.bind_address", &v)?;
        }
        if let Some(v) = lookup("CHATCAST_SERVER_MAX_CONNECTIONS") {
            self.server.max_connections = parse_var("server.max_connections", &v)?;
        }
        if let Some(v) = lookup("CHATCAST_SERVER_PEER_BUFFER") {
            self.server.peer_buffer = parse_var("server.peer_buffer", &v)?;
        }
        if let Some(v) = lookup("CHATCAST_SERVER_REQUIRE_IDENTITY") {
            self.server.require_identity = parse_var("server.require_identity", &v)?;
        }
        if let Some(v) = lookup("CHATCAST_SERVER_IDENTITY_HEADER") {
            self.server.identity_header = v;
        }

        if let Some(v) = lookup("CHATCAST_STORE_BACKEND") {
            self.store.backend = v.parse()?;
        }
        if let Some(v) = lookup("CHATCAST_STORE_PATH") {
            self.store.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("CHATCAST_STORE_POOL_SIZE") {
            self.store.pool_size = parse_var("store.pool_size", &v)?;
        }
        if let Some(v) = lookup("CHATCAST_STORE_OPERATION_TIMEOUT") {
            self.store.operation_timeout = humantime_serde::re::humantime::parse_duration(&v)
                .map_err(|e| ConfigError::invalid("store.operation_timeout", e))?;
        }

        if let Some(v) = lookup("CHATCAST_CHAT_DISPATCHER_CAPACITY") {
            self.chat.dispatcher_capacity = parse_var("chat.dispatcher_capacity", &v)?;
        }
        if let Some(v) = lookup("CHATCAST_CHAT_MAX_PENDING_PER_CONNECTION") {
            self.chat.max_pending_per_connection = parse_var("chat.max_pending_per_connection", &v)?;
        }

        if let Some(v) = lookup("CHATCAST_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("CHATCAST_LOG_JSON") {
            self.logging.json_format = parse_var("logging.json_format", &v)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_connections == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        if self.server.peer_buffer == 0 {
            return Err(ConfigError::ValidationFailed(
                "peer_buffer must be greater than 0".to_string(),
            ));
        }
        if self.server.max_frame_bytes == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_frame_bytes must be greater than 0".to_string(),
            ));
        }
        if self.server.identity_header.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "identity_header must not be empty".to_string(),
            ));
        }

        if self.store.pool_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "pool_size must be greater than 0".to_string(),
            ));
        }
        if self.store.operation_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "operation_timeout must be non-zero".to_string(),
            ));
        }

        if self.chat.dispatcher_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "dispatcher_capacity must be greater than 0".to_string(),
            ));
        }
        if self.chat.max_pending_per_connection == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_pending_per_connection must be greater than 0".to_string(),
            ));
        }
        for route in &self.chat.relay_routes {
            if route.inbound.is_empty() || route.outbound.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "relay route event names must not be empty".to_string(),
                ));
            }
            for name in [&route.inbound, &route.outbound] {
                if RESERVED_EVENTS.contains(&name.as_str()) {
                    return Err(ConfigError::ValidationFailed(format!(
                        "'{}' is a chat stream event and cannot be relayed",
                        name
                    )));
                }
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(
            config.chat.relay_routes,
            vec![RelayRoute::new("productList", "updatedProducts")]
        );
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.server.max_connections = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.store.operation_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config = Config::default();
        config.chat.relay_routes.push(RelayRoute::new("message", "echo"));
        assert!(config.validate().is_err());

        config = Config::default();
        config.chat.max_pending_per_connection = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relay_routes_cannot_use_chat_stream_events() {
        use crate::chat::{CHAT_EVENT, HISTORY_EVENT, JOIN_EVENT};

        for reserved in [CHAT_EVENT, HISTORY_EVENT, JOIN_EVENT] {
            let mut config = Config::default();
            config.chat.relay_routes.push(RelayRoute::new("spoof", reserved));
            assert!(
                matches!(config.validate(), Err(ConfigError::ValidationFailed(_))),
                "outbound '{}' accepted",
                reserved
            );

            let mut config = Config::default();
            config.chat.relay_routes.push(RelayRoute::new(reserved, "spoof"));
            assert!(config.validate().is_err(), "inbound '{}' accepted", reserved);
        }
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = Config::default();

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env_of(&[
                ("CHATCAST_SERVER_BIND_ADDRESS", "0.0.0.0:9000"),
                ("CHATCAST_STORE_BACKEND", "memory"),
                ("CHATCAST_STORE_OPERATION_TIMEOUT", "250ms"),
                ("CHATCAST_CHAT_MAX_PENDING_PER_CONNECTION", "4"),
                ("CHATCAST_LOG_LEVEL", "debug"),
            ]))
            .unwrap();

        assert_eq!(config.server.bind_address.port(), 9000);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.operation_timeout, Duration::from_millis(250));
        assert_eq!(config.chat.max_pending_per_connection, 4);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        let err = config
            .apply_env(env_of(&[("CHATCAST_SERVER_PEER_BUFFER", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "server.peer_buffer"));

        assert!(config.apply_env(env_of(&[("CHATCAST_STORE_BACKEND", "redis")])).is_err());
    }

    #[test]
    fn test_file_round_trip_and_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatcast.toml");

        let mut config = Config::default();
        config.store.backend = StoreBackend::Memory;
        config.server.require_identity = true;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.store.backend, StoreBackend::Memory);
        assert!(loaded.server.require_identity);

        std::fs::write(&path, "[store]\nbackend = \"memory\"\noperation_timeout = \"2s\"\n").unwrap();
        let partial = Config::from_file(&path).unwrap();
        assert_eq!(partial.store.operation_timeout, Duration::from_secs(2));
        assert_eq!(partial.server.peer_buffer, ServerConfig::default().peer_buffer);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::from_file("/nonexistent/chatcast.toml"),
            Err(ConfigError::FileReadError(_))
        ));
    }
}
