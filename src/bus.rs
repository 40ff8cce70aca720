//! Bus Client
//!
//! Notices from the block/transaction processor arrive on a Redis list named
//! for this service's role. A heartbeat key with a TTL marks the consumer as live.
//! Handles the initial connection with exponential backoff.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Default Redis URL of the internal bus
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default prefix of every bus key
pub const DEFAULT_KEY_PREFIX: &str = "mq";

/// Role this service consumes notices as
pub const DEFAULT_ROLE: &str = "client";

/// Heartbeat key lifetime in seconds
pub const DEFAULT_HEARTBEAT_TTL_SECS: u64 = 5;

/// Most notices drained in a single poll
pub const MAX_POLL_BATCH: usize = 256;

/// Maximum number of connection attempts before giving up
pub const MAX_CONNECT_ATTEMPTS: u32 = 10;

/// Initial backoff delay between connection attempts
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff delay between connection attempts
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Errors that can occur talking to the bus
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Max connection attempts ({0}) exceeded")]
    MaxConnectAttemptsExceeded(u32),
}

/// Kind of event a notice announces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    NewBlock,
    NewTransaction,
    /// Any kind this service does not route
    #[serde(other)]
    Other,
}

/// Event announcement placed on the bus by the processing pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    #[serde(rename = "msg")]
    pub kind: NoticeKind,
    /// Hex hash of the block or transaction
    pub hash: String,
}

impl Notice {
    pub fn new_block(hash: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::NewBlock,
            hash: hash.into(),
        }
    }

    pub fn new_transaction(hash: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::NewTransaction,
            hash: hash.into(),
        }
    }

    /// Serialize the notice to its bus JSON form
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a notice from its bus JSON form
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Connection to the internal bus, seen from the consuming side
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Refresh this consumer's liveness marker
    async fn heartbeat(&self) -> Result<(), BusError>;

    /// Drain the notices currently pending for this consumer
    async fn poll(&self) -> Result<Vec<Notice>, BusError>;
}

/// Configuration for the bus connection
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub redis_url: String,
    pub key_prefix: String,
    pub role: String,
    pub heartbeat_ttl_secs: u64,
    pub max_connect_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            role: DEFAULT_ROLE.to_string(),
            heartbeat_ttl_secs: DEFAULT_HEARTBEAT_TTL_SECS,
            max_connect_attempts: MAX_CONNECT_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }
}

impl BusConfig {
    /// Create a new config for the given Redis URL
    pub fn with_url(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            ..Default::default()
        }
    }

    /// List notices are pushed onto
    pub fn queue_key(&self) -> String {
        format!("{}:{}", self.key_prefix, self.role)
    }

    /// Key refreshed on every heartbeat
    pub fn heartbeat_key(&self) -> String {
        format!("{}:heartbeat:{}", self.key_prefix, self.role)
    }

    /// Calculate backoff delay for a given attempt number
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_backoff_ms * 2u64.pow(attempt.min(10));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }
}

/// Open a multiplexed connection, retrying with exponential backoff
pub async fn connect_with_backoff(config: &BusConfig) -> Result<MultiplexedConnection, BusError> {
    let client = redis::Client::open(config.redis_url.as_str())?;
    let mut attempt = 0;

    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(connection) => {
                info!("Connected to Redis at {}", config.redis_url);
                return Ok(connection);
            }
            Err(e) => {
                attempt += 1;
                if attempt >= config.max_connect_attempts {
                    error!("Connection attempt {} failed: {}", attempt, e);
                    return Err(BusError::MaxConnectAttemptsExceeded(config.max_connect_attempts));
                }

                let delay = config.backoff_delay(attempt - 1);
                warn!(
                    "Connection attempt {}/{} failed: {}, retrying in {:?}",
                    attempt, config.max_connect_attempts, e, delay
                );
                sleep(delay).await;
            }
        }
    }
}

/// Redis-backed bus client for one consumer role
pub struct RedisBus {
    connection: MultiplexedConnection,
    queue_key: String,
    heartbeat_key: String,
    heartbeat_ttl_secs: u64,
}

impl RedisBus {
    /// Connect to Redis and bind to the configured role
    pub async fn connect(config: &BusConfig) -> Result<Self, BusError> {
        let connection = connect_with_backoff(config).await?;
        Ok(Self::from_connection(connection, config))
    }

    /// Bind an established connection to the configured role
    pub fn from_connection(connection: MultiplexedConnection, config: &BusConfig) -> Self {
        Self {
            connection,
            queue_key: config.queue_key(),
            heartbeat_key: config.heartbeat_key(),
            heartbeat_ttl_secs: config.heartbeat_ttl_secs,
        }
    }

    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }

    pub fn heartbeat_key(&self) -> &str {
        &self.heartbeat_key
    }

    /// Enqueue a notice for this role, as the processing pipeline does
    ///
    /// # Returns
    /// The queue length after the push
    pub async fn push_notice(&self, notice: &Notice) -> Result<i64, BusError> {
        let json = notice.to_json()?;
        let mut connection = self.connection.clone();
        let length: i64 = connection.lpush(&self.queue_key, json).await?;
        Ok(length)
    }
}

#[async_trait]
impl BusClient for RedisBus {
    async fn heartbeat(&self) -> Result<(), BusError> {
        let mut connection = self.connection.clone();
        let _: () = connection
            .set_ex(
                &self.heartbeat_key,
                current_timestamp_millis(),
                self.heartbeat_ttl_secs,
            )
            .await?;
        Ok(())
    }

    async fn poll(&self) -> Result<Vec<Notice>, BusError> {
        let mut connection = self.connection.clone();
        let mut notices = Vec::new();

        while notices.len() < MAX_POLL_BATCH {
            let raw: Option<String> = connection.rpop(&self.queue_key, None).await?;
            let Some(raw) = raw else {
                break;
            };

            match Notice::from_json(&raw) {
                Ok(notice) => notices.push(notice),
                Err(e) => warn!(error = %e, raw = %raw, "Skipping malformed bus notice"),
            }
        }

        Ok(notices)
    }
}
