//! Chain Storage
//!
//! Lookups the gateway needs from the indexer's storage, keyed by hash.
//! A miss is `Ok(None)`, never an error.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::bus::{connect_with_backoff, BusConfig, BusError};
use crate::records::{Block, Transaction};

/// Errors that can occur during a lookup
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Corrupt record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(#[from] BusError),
}

/// Read access to blocks and transactions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Block with the given hash
    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, StoreError>;

    /// Confirmed or pending transaction with the given hash
    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<Transaction>, StoreError>;

    /// Current head of the main chain
    async fn head_block(&self) -> Result<Option<Block>, StoreError>;

    /// Most recently seen pending transaction
    async fn latest_pending_transaction(&self) -> Result<Option<Transaction>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    blocks: HashMap<String, Block>,
    head: Option<String>,
    transactions: HashMap<String, Transaction>,
    pending: Vec<String>,
}

/// In-process store, used for tests and local development
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block; it becomes the head if it is the highest seen so far
    pub fn insert_block(&self, block: Block) {
        let mut state = self.state.write();
        let is_head = match state.head.as_ref().and_then(|h| state.blocks.get(h)) {
            Some(head) => block.height > head.height,
            None => true,
        };
        if is_head {
            state.head = Some(block.hash.clone());
        }
        state.blocks.insert(block.hash.clone(), block);
    }

    /// Add a transaction; pending ones become the latest pending transaction
    pub fn insert_transaction(&self, tx: Transaction) {
        let mut state = self.state.write();
        state.pending.retain(|hash| hash != &tx.hash);
        if tx.is_pending() {
            state.pending.push(tx.hash.clone());
        }
        state.transactions.insert(tx.hash.clone(), tx);
    }

    pub fn block_count(&self) -> usize {
        self.state.read().blocks.len()
    }
}

#[async_trait]
impl ChainStore for MemoryStore {
    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, StoreError> {
        Ok(self.state.read().blocks.get(hash).cloned())
    }

    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<Transaction>, StoreError> {
        Ok(self.state.read().transactions.get(hash).cloned())
    }

    async fn head_block(&self) -> Result<Option<Block>, StoreError> {
        let state = self.state.read();
        Ok(state.head.as_ref().and_then(|h| state.blocks.get(h)).cloned())
    }

    async fn latest_pending_transaction(&self) -> Result<Option<Transaction>, StoreError> {
        let state = self.state.read();
        Ok(state
            .pending
            .last()
            .and_then(|h| state.transactions.get(h))
            .cloned())
    }
}

/// Store reading the JSON records the indexing pipeline keeps in Redis
///
/// Keys: `{prefix}:block:{hash}`, `{prefix}:tx:{hash}`, and the hashes at
/// `{prefix}:head_block` and `{prefix}:latest_tx`.
pub struct RedisStore {
    connection: MultiplexedConnection,
    prefix: String,
}

impl RedisStore {
    /// Connect using the bus connection settings
    pub async fn connect(config: &BusConfig) -> Result<Self, StoreError> {
        let connection = connect_with_backoff(config).await?;
        Ok(Self::new(connection, config.key_prefix.clone()))
    }

    pub fn new(connection: MultiplexedConnection, prefix: impl Into<String>) -> Self {
        Self {
            connection,
            prefix: prefix.into(),
        }
    }

    pub fn block_key(&self, hash: &str) -> String {
        format!("{}:block:{}", self.prefix, hash)
    }

    pub fn transaction_key(&self, hash: &str) -> String {
        format!("{}:tx:{}", self.prefix, hash)
    }

    pub fn head_key(&self) -> String {
        format!("{}:head_block", self.prefix)
    }

    pub fn latest_transaction_key(&self) -> String {
        format!("{}:latest_tx", self.prefix)
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = connection.get(key).await?;
        Ok(raw)
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get_string(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ChainStore for RedisStore {
    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, StoreError> {
        self.get_json(&self.block_key(hash)).await
    }

    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<Transaction>, StoreError> {
        self.get_json(&self.transaction_key(hash)).await
    }

    async fn head_block(&self) -> Result<Option<Block>, StoreError> {
        match self.get_string(&self.head_key()).await? {
            Some(hash) => self.block_by_hash(&hash).await,
            None => Ok(None),
        }
    }

    async fn latest_pending_transaction(&self) -> Result<Option<Transaction>, StoreError> {
        match self.get_string(&self.latest_transaction_key()).await? {
            Some(hash) => self.transaction_by_hash(&hash).await,
            None => Ok(None),
        }
    }
}
