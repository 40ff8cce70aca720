//! Gateway Configuration
//!
//! Defaults come from the module constants; each field can be overridden
//! through a `GATEWAY_*` environment variable.

use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;
use tracing::Level;

use crate::address::Network;
use crate::bridge::BridgeConfig;
use crate::bus::BusConfig;

/// Default WebSocket listen port, on all interfaces
pub const DEFAULT_PORT: u16 = 5000;

/// Default upper bound for one inbound frame
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

pub const ENV_LISTEN_ADDR: &str = "GATEWAY_LISTEN_ADDR";
pub const ENV_REDIS_URL: &str = "GATEWAY_REDIS_URL";
pub const ENV_NETWORK: &str = "GATEWAY_NETWORK";
pub const ENV_BUS_ROLE: &str = "GATEWAY_BUS_ROLE";
pub const ENV_KEY_PREFIX: &str = "GATEWAY_KEY_PREFIX";
pub const ENV_HEARTBEAT_MS: &str = "GATEWAY_HEARTBEAT_MS";
pub const ENV_POLL_MS: &str = "GATEWAY_POLL_MS";
pub const ENV_HEARTBEAT_TTL_SECS: &str = "GATEWAY_HEARTBEAT_TTL_SECS";
pub const ENV_MAX_MESSAGE_SIZE: &str = "GATEWAY_MAX_MESSAGE_SIZE";
pub const ENV_LOG_LEVEL: &str = "GATEWAY_LOG_LEVEL";

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub network: Network,
    pub max_message_size: usize,
    pub log_level: Level,
    pub bus: BusConfig,
    pub bridge: BridgeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            network: Network::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            log_level: Level::INFO,
            bus: BusConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl Config {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns per variable name
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = parsed(&lookup, ENV_LISTEN_ADDR)? {
            config.listen_addr = addr;
        }
        if let Some(network) = parsed(&lookup, ENV_NETWORK)? {
            config.network = network;
        }
        if let Some(size) = parsed(&lookup, ENV_MAX_MESSAGE_SIZE)? {
            config.max_message_size = size;
        }
        if let Some(level) = parsed(&lookup, ENV_LOG_LEVEL)? {
            config.log_level = level;
        }

        if let Some(url) = lookup(ENV_REDIS_URL) {
            config.bus.redis_url = url;
        }
        if let Some(role) = lookup(ENV_BUS_ROLE) {
            config.bus.role = role;
        }
        if let Some(prefix) = lookup(ENV_KEY_PREFIX) {
            config.bus.key_prefix = prefix;
        }
        if let Some(ttl) = parsed(&lookup, ENV_HEARTBEAT_TTL_SECS)? {
            config.bus.heartbeat_ttl_secs = ttl;
        }

        if let Some(ms) = parsed(&lookup, ENV_HEARTBEAT_MS)? {
            config.bridge.heartbeat_interval_ms = ms;
        }
        if let Some(ms) = parsed(&lookup, ENV_POLL_MS)? {
            config.bridge.poll_interval_ms = ms;
        }

        Ok(config)
    }
}

fn parsed<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}
