//! Client Connection
//!
//! Per-socket state: channel subscriptions, the address interest set and the
//! outbound frame queue. Commands and hub deliveries for one connection are
//! handled by that connection's task only, so none of this state is shared.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use crate::bus::Notice;
use crate::filter::filter_transaction;
use crate::hub::{Channel, Handler, SubscriptionId};
use crate::protocol::{ApiError, Command, Entity, Request, ServerMessage, Topic};
use crate::registry::ConnectionRegistry;
use crate::store::StoreError;

/// Stable identity of one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// A notice routed to this connection by one of its hub subscriptions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub channel: Channel,
    pub notice: Notice,
}

/// Deliveries a connection may have queued before new ones are dropped
pub const MAILBOX_CAPACITY: usize = 256;

/// Frames a connection may have queued for its socket before new ones are dropped
pub const OUTBOUND_CAPACITY: usize = 256;

/// Receiving end of a connection's deliveries
pub type Mailbox = mpsc::Receiver<Delivery>;

/// Outbound JSON frames waiting to be written to the socket
pub type Outbound = mpsc::Sender<String>;

pub struct ClientConnection {
    id: ConnectionId,
    state: ConnectionState,
    registry: Arc<ConnectionRegistry>,
    subscriptions: HashMap<Channel, SubscriptionId>,
    interest: HashSet<String>,
    outbound: Outbound,
    deliveries: mpsc::Sender<Delivery>,
}

impl ClientConnection {
    pub(crate) fn new(
        id: ConnectionId,
        registry: Arc<ConnectionRegistry>,
        outbound: Outbound,
    ) -> (Self, Mailbox) {
        let (deliveries, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        let connection = Self {
            id,
            state: ConnectionState::Open,
            registry,
            subscriptions: HashMap::new(),
            interest: HashSet::new(),
            outbound,
            deliveries,
        };
        (connection, mailbox)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_subscribed(&self, channel: Channel) -> bool {
        self.subscriptions.contains_key(&channel)
    }

    /// Addresses this connection wants address activity for
    pub fn interest(&self) -> &HashSet<String> {
        &self.interest
    }

    /// Handle one inbound frame
    ///
    /// Undecodable input is echoed back. Commands run in order; the first
    /// failing one is reported and the rest of the request is skipped.
    pub async fn handle_message(&mut self, text: &str) {
        if self.state == ConnectionState::Closed {
            return;
        }

        let Some(request) = Request::decode(text, self.registry.network()) else {
            debug!(connection_id = %self.id, "Echoing undecodable message");
            self.write(ServerMessage::echo(text));
            return;
        };

        for command in request.commands {
            let result = match command {
                Ok(command) => self.apply(command).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                debug!(connection_id = %self.id, error = %e, "Rejected command");
                self.write(ServerMessage::error(&e));
                return;
            }
        }
    }

    async fn apply(&mut self, command: Command) -> Result<(), ApiError> {
        match command {
            Command::Subscribe(Topic::Address(address)) => {
                self.interest.insert(address.into_string());
                self.subscribe_channel(Channel::Addresses);
            }
            Command::Subscribe(Topic::Blocks) => self.subscribe_channel(Channel::Blocks),
            Command::Subscribe(Topic::Transactions) => self.subscribe_channel(Channel::Transactions),
            Command::Unsubscribe(Topic::Address(address)) => {
                self.interest.remove(address.as_str());
                if self.interest.is_empty() {
                    self.unsubscribe_channel(Channel::Addresses);
                }
            }
            Command::Unsubscribe(Topic::Blocks) => self.unsubscribe_channel(Channel::Blocks),
            Command::Unsubscribe(Topic::Transactions) => {
                self.unsubscribe_channel(Channel::Transactions)
            }
            Command::Fetch(entity) => self.fetch(entity).await,
        }
        Ok(())
    }

    async fn fetch(&mut self, entity: Entity) {
        let store = Arc::clone(self.registry.store());
        let message = match entity {
            Entity::LatestBlock => self
                .found(store.head_block().await, entity.as_str())
                .map(ServerMessage::fetched_block),
            Entity::LatestTransaction => self
                .found(store.latest_pending_transaction().await, entity.as_str())
                .map(ServerMessage::fetched_transaction),
        };

        match message {
            Some(message) => self.write(message),
            None => debug!(connection_id = %self.id, entity = entity.as_str(), "Nothing to fetch"),
        }
    }

    /// Push a hub delivery to the client if it is relevant
    ///
    /// Deliveries still queued for a channel the connection has since left
    /// are discarded.
    pub async fn deliver(&mut self, delivery: Delivery) {
        if self.state == ConnectionState::Closed || !self.is_subscribed(delivery.channel) {
            return;
        }

        let Delivery { channel, notice } = delivery;
        let store = Arc::clone(self.registry.store());

        let message = match channel {
            Channel::Blocks => self
                .found(store.block_by_hash(&notice.hash).await, &notice.hash)
                .map(ServerMessage::block),
            Channel::Transactions => self
                .found(store.transaction_by_hash(&notice.hash).await, &notice.hash)
                .map(ServerMessage::transaction),
            Channel::Addresses => {
                self.found(store.transaction_by_hash(&notice.hash).await, &notice.hash)
                    .and_then(|tx| {
                        let matches = filter_transaction(&tx, &self.interest, self.registry.network());
                        if matches.is_empty() {
                            None
                        } else {
                            Some(ServerMessage::address_activity(matches, tx))
                        }
                    })
            }
        };

        match message {
            Some(message) => self.write(message),
            None => debug!(
                connection_id = %self.id,
                channel = %channel,
                hash = %notice.hash,
                "Dropping delivery"
            ),
        }
    }

    /// Release every subscription and leave the registry; idempotent
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }

        for channel in Channel::ALL {
            self.unsubscribe_channel(channel);
        }
        self.interest.clear();
        let entry = self.registry.remove(self.id);
        self.state = ConnectionState::Closed;

        info!(
            connection_id = %self.id,
            lifetime_ms = entry.map(|entry| entry.opened_at.elapsed().as_millis() as u64),
            "Connection closed"
        );
    }

    fn subscribe_channel(&mut self, channel: Channel) {
        if self.subscriptions.contains_key(&channel) {
            return;
        }

        let deliveries = self.deliveries.clone();
        let connection_id = self.id;
        let handler: Handler = Arc::new(move |notice: &Notice| {
            let delivery = Delivery {
                channel,
                notice: notice.clone(),
            };
            match deliveries.try_send(delivery) {
                Ok(()) => {}
                Err(TrySendError::Full(delivery)) => warn!(
                    connection_id = %connection_id,
                    channel = %channel,
                    hash = %delivery.notice.hash,
                    "Mailbox full, dropping notice"
                ),
                // the connection task has ended
                Err(TrySendError::Closed(_)) => {}
            }
        });

        let id = self.registry.hub().subscribe(channel, handler);
        self.subscriptions.insert(channel, id);
        debug!(connection_id = %self.id, channel = %channel, "Subscribed");
    }

    fn unsubscribe_channel(&mut self, channel: Channel) {
        if let Some(id) = self.subscriptions.remove(&channel) {
            self.registry.hub().unsubscribe(channel, id);
            debug!(connection_id = %self.id, channel = %channel, "Unsubscribed");
        }
    }

    fn found<T>(&self, lookup: Result<Option<T>, StoreError>, key: &str) -> Option<T> {
        match lookup {
            Ok(record) => record,
            Err(e) => {
                warn!(connection_id = %self.id, key, error = %e, "Store lookup failed");
                None
            }
        }
    }

    fn write(&self, message: ServerMessage) {
        if self.state == ConnectionState::Closed {
            return;
        }

        match message.to_json() {
            Ok(frame) => match self.outbound.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(connection_id = %self.id, "Outbound queue full, dropping push")
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection_id = %self.id, "Socket writer gone")
                }
            },
            Err(e) => error!(connection_id = %self.id, error = %e, "Failed to serialize push"),
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, Network};
    use crate::records::{Block, Transaction, TxInput, TxOutput};
    use crate::store::{MemoryStore, MockChainStore};
    use serde_json::Value;

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        connection: ClientConnection,
        mailbox: Mailbox,
        frames: mpsc::Receiver<String>,
    }

    impl Harness {
        fn with_store(store: Arc<dyn crate::store::ChainStore>) -> Self {
            let registry = Arc::new(ConnectionRegistry::new(store, Network::Bitcoin));
            let (outbound, frames) = mpsc::channel(OUTBOUND_CAPACITY);
            let (connection, mailbox) = registry.accept_connection(outbound);
            Self {
                registry,
                connection,
                mailbox,
                frames,
            }
        }

        fn new() -> (Self, Arc<MemoryStore>) {
            let store = Arc::new(MemoryStore::new());
            (Self::with_store(store.clone()), store)
        }

        async fn send(&mut self, text: &str) {
            self.connection.handle_message(text).await;
        }

        async fn pump(&mut self) {
            while let Ok(delivery) = self.mailbox.try_recv() {
                self.connection.deliver(delivery).await;
            }
        }

        fn frames(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(frame) = self.frames.try_recv() {
                out.push(serde_json::from_str(&frame).unwrap());
            }
            out
        }

        fn publish(&self, channel: Channel, notice: Notice) -> usize {
            self.registry.hub().publish(channel, &notice)
        }
    }

    fn block(hash: &str, height: u64) -> Block {
        Block {
            hash: hash.to_string(),
            height,
            version: 2,
            previous_block_hash: "00".repeat(32),
            merkle_root: "22".repeat(32),
            time: 1_500_000_000,
            bits: 0x1d00ffff,
            nonce: 7,
            size: 300,
            transaction_hashes: vec![],
        }
    }

    fn paying_tx(hash: &str, to: &[&Address], from: &[&Address]) -> Transaction {
        Transaction {
            hash: hash.to_string(),
            version: 1,
            lock_time: 0,
            size: 225,
            block_hash: None,
            block_height: None,
            inputs: from
                .iter()
                .map(|a| TxInput {
                    previous_transaction_hash: "99".repeat(32),
                    output_index: 0,
                    previous_output: Some(TxOutput::paying(a, 1_000)),
                })
                .collect(),
            outputs: to.iter().map(|a| TxOutput::paying(a, 900)).collect(),
        }
    }

    fn addr(byte: u8) -> Address {
        Address::from_hash160([byte; 20], Network::Bitcoin)
    }

    fn subscribe_address(address: &Address) -> String {
        format!(r#"{{"subscribe":"address","address":"{}"}}"#, address)
    }

    fn unsubscribe_address(address: &Address) -> String {
        format!(r#"{{"unsubscribe":"address","address":"{}"}}"#, address)
    }

    // ==================== Decode failure tests ====================

    #[tokio::test]
    async fn test_malformed_input_is_echoed_once() {
        let (mut h, _) = Harness::new();
        h.send("not json").await;

        assert_eq!(h.frames(), vec![serde_json::json!({ "message_received": "not json" })]);
        assert_eq!(h.connection.state(), ConnectionState::Open);

        // still accepting commands
        h.send(r#"{"subscribe":"blocks"}"#).await;
        assert!(h.connection.is_subscribed(Channel::Blocks));
    }

    // ==================== Channel subscription tests ====================

    #[tokio::test]
    async fn test_double_subscribe_delivers_once() {
        let (mut h, store) = Harness::new();
        store.insert_block(block("b1", 1));

        h.send(r#"{"subscribe":"blocks"}"#).await;
        h.send(r#"{"subscribe":"blocks"}"#).await;
        assert_eq!(h.registry.hub().subscriber_count(Channel::Blocks), 1);

        assert_eq!(h.publish(Channel::Blocks, Notice::new_block("b1")), 1);
        h.pump().await;

        let frames = h.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["subscription"], "blocks");
        assert_eq!(frames[0]["data"]["hash"], "b1");
    }

    #[tokio::test]
    async fn test_unknown_block_is_dropped() {
        let (mut h, _) = Harness::new();
        h.send(r#"{"subscribe":"blocks"}"#).await;

        h.publish(Channel::Blocks, Notice::new_block("missing"));
        h.pump().await;

        assert!(h.frames().is_empty());
    }

    #[tokio::test]
    async fn test_transaction_push() {
        let (mut h, store) = Harness::new();
        store.insert_transaction(paying_tx("t1", &[&addr(1)], &[]));

        h.send(r#"{"subscribe":"transactions"}"#).await;
        h.publish(Channel::Transactions, Notice::new_transaction("t1"));
        h.publish(Channel::Transactions, Notice::new_transaction("unknown"));
        h.pump().await;

        let frames = h.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["subscription"], "transactions");
        assert_eq!(frames[0]["data"]["hash"], "t1");
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_deliveries() {
        let (mut h, store) = Harness::new();
        store.insert_block(block("b1", 1));

        h.send(r#"{"subscribe":"blocks"}"#).await;
        h.send(r#"{"unsubscribe":"blocks"}"#).await;
        assert!(!h.connection.is_subscribed(Channel::Blocks));

        assert_eq!(h.publish(Channel::Blocks, Notice::new_block("b1")), 0);
        h.pump().await;
        assert!(h.frames().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_when_not_subscribed_is_noop() {
        let (mut h, _) = Harness::new();
        h.send(r#"{"unsubscribe":"transactions"}"#).await;
        assert!(h.frames().is_empty());
    }

    // ==================== Address subscription tests ====================

    #[tokio::test]
    async fn test_address_push_with_matches() {
        let (mut h, store) = Harness::new();
        let (a, b, c) = (addr(0xa), addr(0xb), addr(0xc));
        store.insert_transaction(paying_tx("t1", &[&a, &b], &[&b, &c]));

        h.send(&subscribe_address(&b)).await;
        assert!(h.connection.is_subscribed(Channel::Addresses));

        h.publish(Channel::Addresses, Notice::new_transaction("t1"));
        h.pump().await;

        let frames = h.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["subscription"], "address");
        assert_eq!(frames[0]["out_matches"], serde_json::json!([b.to_string()]));
        assert_eq!(frames[0]["in_matches"], serde_json::json!([b.to_string()]));
        assert_eq!(frames[0]["data"]["hash"], "t1");
    }

    #[tokio::test]
    async fn test_address_push_skipped_without_overlap() {
        let (mut h, store) = Harness::new();
        store.insert_transaction(paying_tx("t1", &[&addr(1)], &[&addr(2)]));

        h.send(&subscribe_address(&addr(0x7f))).await;
        h.publish(Channel::Addresses, Notice::new_transaction("t1"));
        h.pump().await;

        assert!(h.frames().is_empty());
    }

    #[tokio::test]
    async fn test_two_addresses_share_one_subscription() {
        let (mut h, _) = Harness::new();
        h.send(&subscribe_address(&addr(1))).await;
        h.send(&subscribe_address(&addr(2))).await;

        assert_eq!(h.connection.interest().len(), 2);
        assert_eq!(h.registry.hub().subscriber_count(Channel::Addresses), 1);

        h.send(&unsubscribe_address(&addr(1))).await;
        assert!(h.connection.is_subscribed(Channel::Addresses));
    }

    #[tokio::test]
    async fn test_removing_last_address_unsubscribes() {
        let (mut h, store) = Harness::new();
        let a = addr(3);
        store.insert_transaction(paying_tx("t1", &[&a], &[]));

        h.send(&subscribe_address(&a)).await;
        h.send(&unsubscribe_address(&a)).await;

        assert!(h.connection.interest().is_empty());
        assert!(!h.connection.is_subscribed(Channel::Addresses));
        assert_eq!(h.publish(Channel::Addresses, Notice::new_transaction("t1")), 0);
        h.pump().await;
        assert!(h.frames().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_address_leaves_interest_unchanged() {
        let (mut h, _) = Harness::new();
        h.send(r#"{"subscribe":"address","address":"1NotAnAddress"}"#).await;

        assert_eq!(h.frames(), vec![serde_json::json!({ "error": "invalid address" })]);
        assert!(h.connection.interest().is_empty());
        assert!(!h.connection.is_subscribed(Channel::Addresses));
        assert_eq!(h.connection.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_script_hash_address_rejected() {
        let (mut h, _) = Harness::new();
        let p2sh = Address::from_script_hash([9; 20], Network::Bitcoin);
        h.send(&subscribe_address(&p2sh)).await;

        assert_eq!(
            h.frames(),
            vec![serde_json::json!({ "error": "unsupported address type" })]
        );
        assert!(h.connection.interest().is_empty());
    }

    #[tokio::test]
    async fn test_missing_address_field() {
        let (mut h, _) = Harness::new();
        h.send(r#"{"unsubscribe":"address"}"#).await;
        assert_eq!(
            h.frames(),
            vec![serde_json::json!({ "error": "no address specified" })]
        );
    }

    // ==================== Protocol error tests ====================

    #[tokio::test]
    async fn test_unknown_subscription_error() {
        let (mut h, _) = Harness::new();
        h.send(r#"{"subscribe":"mempool"}"#).await;
        assert_eq!(
            h.frames(),
            vec![serde_json::json!({ "error": "unknown subscription" })]
        );
    }

    #[tokio::test]
    async fn test_failed_command_skips_rest_of_request() {
        let (mut h, store) = Harness::new();
        store.insert_block(block("b1", 1));

        h.send(r#"{"subscribe":"blocks","unsubscribe":"bogus","fetch":"latest_block"}"#).await;

        // subscribe ran, fetch did not
        assert!(h.connection.is_subscribed(Channel::Blocks));
        assert_eq!(
            h.frames(),
            vec![serde_json::json!({ "error": "unknown subscription" })]
        );
    }

    // ==================== fetch tests ====================

    #[tokio::test]
    async fn test_fetch_latest_block_on_empty_chain() {
        let (mut h, _) = Harness::new();
        h.send(r#"{"fetch":"latest_block"}"#).await;
        assert!(h.frames().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_latest_block() {
        let (mut h, store) = Harness::new();
        store.insert_block(block("b1", 1));
        store.insert_block(block("b2", 2));

        h.send(r#"{"fetch":"latest_block"}"#).await;

        let frames = h.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["fetched"], "latest_block");
        assert_eq!(frames[0]["data"]["hash"], "b2");
    }

    #[tokio::test]
    async fn test_fetch_latest_transaction() {
        let (mut h, store) = Harness::new();
        store.insert_transaction(paying_tx("t1", &[&addr(1)], &[]));

        h.send(r#"{"fetch":"latest_transaction"}"#).await;

        let frames = h.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["fetched"], "latest_transaction");
        assert_eq!(frames[0]["data"]["hash"], "t1");
    }

    #[tokio::test]
    async fn test_fetch_unknown_entity() {
        let (mut h, _) = Harness::new();
        h.send(r#"{"fetch":"everything"}"#).await;
        assert_eq!(
            h.frames(),
            vec![serde_json::json!({ "error": "unknown entity type" })]
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_a_miss() {
        let mut store = MockChainStore::new();
        store.expect_head_block().returning(|| {
            Err(StoreError::Serialization(
                serde_json::from_str::<Block>("{").unwrap_err(),
            ))
        });
        let mut h = Harness::with_store(Arc::new(store));

        h.send(r#"{"fetch":"latest_block"}"#).await;

        assert!(h.frames().is_empty());
        assert_eq!(h.connection.state(), ConnectionState::Open);
    }

    // ==================== Queued delivery tests ====================

    #[tokio::test]
    async fn test_unsubscribe_discards_queued_deliveries() {
        let (mut h, store) = Harness::new();
        store.insert_block(block("b1", 1));
        store.insert_transaction(paying_tx("t1", &[&addr(1)], &[]));

        h.send(r#"{"subscribe":"blocks"}"#).await;
        h.send(r#"{"subscribe":"transactions"}"#).await;
        assert_eq!(h.publish(Channel::Blocks, Notice::new_block("b1")), 1);
        assert_eq!(h.publish(Channel::Transactions, Notice::new_transaction("t1")), 1);

        h.send(r#"{"unsubscribe":"blocks"}"#).await;
        h.send(r#"{"unsubscribe":"transactions"}"#).await;
        assert!(!h.connection.is_subscribed(Channel::Blocks));
        h.pump().await;

        assert!(h.frames().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_keeps_other_channel_deliveries() {
        let (mut h, store) = Harness::new();
        store.insert_block(block("b1", 1));
        store.insert_transaction(paying_tx("t1", &[&addr(1)], &[]));

        h.send(r#"{"subscribe":"blocks"}"#).await;
        h.send(r#"{"subscribe":"transactions"}"#).await;
        h.publish(Channel::Blocks, Notice::new_block("b1"));
        h.publish(Channel::Transactions, Notice::new_transaction("t1"));

        h.send(r#"{"unsubscribe":"blocks"}"#).await;
        h.pump().await;

        let frames = h.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["subscription"], "transactions");
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_notices() {
        let (mut h, store) = Harness::new();
        store.insert_block(block("b1", 1));
        h.send(r#"{"subscribe":"blocks"}"#).await;

        for _ in 0..MAILBOX_CAPACITY + 10 {
            assert_eq!(h.publish(Channel::Blocks, Notice::new_block("b1")), 1);
        }

        let mut queued = 0;
        while h.mailbox.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, MAILBOX_CAPACITY);

        // room again once drained
        h.publish(Channel::Blocks, Notice::new_block("b1"));
        h.pump().await;
        assert_eq!(h.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_full_outbound_queue_drops_pushes() {
        let (mut h, _) = Harness::new();

        for _ in 0..OUTBOUND_CAPACITY + 5 {
            h.send("not json").await;
        }

        assert_eq!(h.frames().len(), OUTBOUND_CAPACITY);
        assert_eq!(h.connection.state(), ConnectionState::Open);

        h.send("again").await;
        assert_eq!(h.frames().len(), 1);
    }

    // ==================== Close tests ====================

    #[tokio::test]
    async fn test_close_releases_every_subscription() {
        let (mut h, _) = Harness::new();
        h.send(r#"{"subscribe":"blocks"}"#).await;
        h.send(r#"{"subscribe":"transactions"}"#).await;
        h.send(&subscribe_address(&addr(1))).await;
        assert_eq!(h.registry.hub().total_subscribers(), 3);
        assert_eq!(h.registry.connection_count(), 1);

        h.connection.close();

        assert_eq!(h.registry.hub().total_subscribers(), 0);
        assert_eq!(h.registry.connection_count(), 0);
        assert_eq!(h.connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut h, _) = Harness::new();
        h.send(r#"{"subscribe":"blocks"}"#).await;

        h.connection.close();
        h.connection.close();
        drop(h.connection);

        assert_eq!(h.registry.hub().total_subscribers(), 0);
        assert_eq!(h.registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_connection_ignores_everything() {
        let (mut h, store) = Harness::new();
        store.insert_block(block("b1", 1));
        h.send(r#"{"subscribe":"blocks"}"#).await;
        h.publish(Channel::Blocks, Notice::new_block("b1"));

        h.connection.close();
        // queued delivery and new commands are both dropped
        h.pump().await;
        h.send("not json").await;
        h.send(r#"{"fetch":"latest_block"}"#).await;

        assert!(h.frames().is_empty());
    }

    #[tokio::test]
    async fn test_other_connections_unaffected() {
        let (mut h, store) = Harness::new();
        store.insert_block(block("b1", 1));

        let (outbound, mut other_frames) = mpsc::channel(OUTBOUND_CAPACITY);
        let (mut other, mut other_mailbox) = h.registry.accept_connection(outbound);
        other.handle_message(r#"{"subscribe":"blocks"}"#).await;
        h.send(r#"{"subscribe":"blocks"}"#).await;

        h.send(r#"{"unsubscribe":"blocks"}"#).await;
        assert_eq!(h.publish(Channel::Blocks, Notice::new_block("b1")), 1);

        while let Ok(delivery) = other_mailbox.try_recv() {
            other.deliver(delivery).await;
        }
        h.pump().await;

        assert!(h.frames().is_empty());
        assert!(other_frames.try_recv().is_ok());
        assert_ne!(other.id(), h.connection.id());
    }
}
