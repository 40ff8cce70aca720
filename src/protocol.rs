//! Client Protocol
//!
//! Decodes client requests into typed commands and shapes the messages
//! pushed back over the socket.
//!
//! A request is one JSON object that may carry any of the `subscribe`,
//! `unsubscribe` and `fetch` keys. They are decoded in that order no matter
//! where they appear in the object.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::address::{Address, AddressError, AddressKind, Network};
use crate::filter::AddressMatches;
use crate::records::{Block, Transaction};

/// Semantically invalid request; reported to the client as `{"error": ...}`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("no address specified")]
    NoAddress,

    #[error("invalid address")]
    InvalidAddress,

    #[error("unsupported address type")]
    UnsupportedAddressType,

    #[error("unknown subscription")]
    UnknownSubscription,

    #[error("unknown entity type")]
    UnknownEntity,
}

impl From<AddressError> for ApiError {
    fn from(err: AddressError) -> Self {
        match err {
            AddressError::UnsupportedType => ApiError::UnsupportedAddressType,
            AddressError::Invalid | AddressError::UnknownNetwork(_) => ApiError::InvalidAddress,
        }
    }
}

/// What a subscribe or unsubscribe command targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    Address(Address),
    Blocks,
    Transactions,
}

/// What a fetch command retrieves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    LatestBlock,
    LatestTransaction,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::LatestBlock => "latest_block",
            Entity::LatestTransaction => "latest_transaction",
        }
    }
}

/// A single decoded client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subscribe(Topic),
    Unsubscribe(Topic),
    Fetch(Entity),
}

/// A decoded request: its commands in processing order
///
/// A command that failed to decode keeps its slot, so commands before it
/// still run and the ones after it are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub commands: Vec<Result<Command, ApiError>>,
}

impl Request {
    /// Decode a raw client message
    ///
    /// # Arguments
    /// * `text` - The raw frame text
    /// * `network` - Network addresses are validated against
    ///
    /// # Returns
    /// `None` if the text is not a JSON object; such input is echoed back
    pub fn decode(text: &str, network: Network) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        let object = value.as_object()?;
        Some(Self::from_object(object, network))
    }

    fn from_object(object: &Map<String, Value>, network: Network) -> Self {
        let mut commands = Vec::new();

        if let Some(target) = object.get("subscribe") {
            commands.push(decode_topic(target, object, network, true).map(Command::Subscribe));
        }
        if let Some(target) = object.get("unsubscribe") {
            commands.push(decode_topic(target, object, network, false).map(Command::Unsubscribe));
        }
        if let Some(target) = object.get("fetch") {
            commands.push(decode_entity(target).map(Command::Fetch));
        }

        Self { commands }
    }
}

/// Decode a subscription target; subscribing requires a hash160 address
fn decode_topic(
    target: &Value,
    object: &Map<String, Value>,
    network: Network,
    require_hash160: bool,
) -> Result<Topic, ApiError> {
    match target.as_str() {
        Some("address") => {
            let raw = object.get("address").ok_or(ApiError::NoAddress)?;
            let raw = raw.as_str().ok_or(ApiError::InvalidAddress)?;
            let address = Address::parse(raw, network)?;
            if require_hash160 && address.kind() != AddressKind::Hash160 {
                return Err(ApiError::UnsupportedAddressType);
            }
            Ok(Topic::Address(address))
        }
        Some("blocks") => Ok(Topic::Blocks),
        Some("transactions") => Ok(Topic::Transactions),
        _ => Err(ApiError::UnknownSubscription),
    }
}

fn decode_entity(target: &Value) -> Result<Entity, ApiError> {
    match target.as_str() {
        Some("latest_block") => Ok(Entity::LatestBlock),
        Some("latest_transaction") => Ok(Entity::LatestTransaction),
        _ => Err(ApiError::UnknownEntity),
    }
}

/// Message pushed from the gateway to a client
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Echo of input that could not be decoded
    MessageReceived { message_received: String },
    Error { error: String },
    AddressActivity {
        subscription: &'static str,
        in_matches: Vec<String>,
        out_matches: Vec<String>,
        data: Transaction,
    },
    Block {
        subscription: &'static str,
        data: Block,
    },
    Transaction {
        subscription: &'static str,
        data: Transaction,
    },
    FetchedBlock {
        fetched: &'static str,
        data: Block,
    },
    FetchedTransaction {
        fetched: &'static str,
        data: Transaction,
    },
}

impl ServerMessage {
    pub fn echo(raw: &str) -> Self {
        ServerMessage::MessageReceived {
            message_received: raw.to_string(),
        }
    }

    pub fn error(err: &ApiError) -> Self {
        ServerMessage::Error {
            error: err.to_string(),
        }
    }

    pub fn block(block: Block) -> Self {
        ServerMessage::Block {
            subscription: "blocks",
            data: block,
        }
    }

    pub fn transaction(tx: Transaction) -> Self {
        ServerMessage::Transaction {
            subscription: "transactions",
            data: tx,
        }
    }

    pub fn address_activity(matches: AddressMatches, tx: Transaction) -> Self {
        ServerMessage::AddressActivity {
            subscription: "address",
            in_matches: matches.in_matches,
            out_matches: matches.out_matches,
            data: tx,
        }
    }

    pub fn fetched_block(block: Block) -> Self {
        ServerMessage::FetchedBlock {
            fetched: Entity::LatestBlock.as_str(),
            data: block,
        }
    }

    pub fn fetched_transaction(tx: Transaction) -> Self {
        ServerMessage::FetchedTransaction {
            fetched: Entity::LatestTransaction.as_str(),
            data: tx,
        }
    }

    /// Serialize the message to a JSON frame
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
