//! TxnScope Gateway Library
//!
//! This crate provides the WebSocket push layer of the indexer: bus notices
//! are bridged onto in-process channels, filtered per connection, and
//! written to subscribed clients.

pub mod address;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod connection;
pub mod filter;
pub mod hub;
pub mod protocol;
pub mod reactor;
pub mod records;
pub mod registry;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use address::{Address, AddressError, Network};
pub use bridge::{BridgeConfig, BridgeHandle, BusBridge};
pub use bus::{BusClient, BusConfig, BusError, Notice, NoticeKind, RedisBus};
pub use config::{Config, ConfigError};
pub use connection::{ClientConnection, ConnectionId, ConnectionState, Delivery};
pub use filter::{filter_transaction, AddressMatches};
pub use hub::{BroadcastHub, Channel, SubscriptionId};
pub use protocol::{ApiError, Command, Request, ServerMessage};
pub use reactor::Reactor;
pub use records::{Block, Transaction, TxInput, TxOutput};
pub use registry::ConnectionRegistry;
pub use server::{router, run_socket, serve, ServerError};
pub use store::{ChainStore, MemoryStore, RedisStore, StoreError};
