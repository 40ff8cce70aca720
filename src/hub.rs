//! Broadcast Hub
//!
//! Three named in-process channels fanning bus notices out to connection
//! handlers. Subscribing returns an opaque id that is the only way to remove
//! the handler again.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::bus::Notice;

/// A named multicast point inside the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Addresses,
    Blocks,
    Transactions,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Addresses, Channel::Blocks, Channel::Transactions];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Addresses => "addresses",
            Channel::Blocks => "blocks",
            Channel::Transactions => "transactions",
        }
    }

    fn index(&self) -> usize {
        match self {
            Channel::Addresses => 0,
            Channel::Blocks => 1,
            Channel::Transactions => 2,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Callback invoked with every notice published on a channel
pub type Handler = Arc<dyn Fn(&Notice) + Send + Sync>;

type Subscribers = RwLock<HashMap<SubscriptionId, Handler>>;

/// Owner of the three channels; one instance per process
pub struct BroadcastHub {
    channels: [Subscribers; 3],
    next_id: AtomicU64,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            channels: [
                RwLock::new(HashMap::new()),
                RwLock::new(HashMap::new()),
                RwLock::new(HashMap::new()),
            ],
            next_id: AtomicU64::new(1),
        }
    }

    fn subscribers(&self, channel: Channel) -> &Subscribers {
        &self.channels[channel.index()]
    }

    /// Register `handler` on `channel`
    ///
    /// # Returns
    /// The id to pass to [`BroadcastHub::unsubscribe`]
    pub fn subscribe(&self, channel: Channel, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers(channel).write().insert(id, handler);
        trace!(channel = %channel, subscription = %id, "Handler registered");
        id
    }

    /// Remove a handler; unknown or already removed ids are ignored
    ///
    /// # Returns
    /// `true` if a handler was removed
    pub fn unsubscribe(&self, channel: Channel, id: SubscriptionId) -> bool {
        let removed = self.subscribers(channel).write().remove(&id).is_some();
        if removed {
            trace!(channel = %channel, subscription = %id, "Handler removed");
        }
        removed
    }

    /// Deliver `notice` to every handler registered on `channel` at call time
    ///
    /// Handlers run after the registry lock is released, so a handler may
    /// subscribe or unsubscribe without deadlocking.
    ///
    /// # Returns
    /// The number of handlers the notice was delivered to
    pub fn publish(&self, channel: Channel, notice: &Notice) -> usize {
        let snapshot: Vec<Handler> = self.subscribers(channel).read().values().cloned().collect();

        for handler in &snapshot {
            handler(notice);
        }

        snapshot.len()
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.subscribers(channel).read().len()
    }

    /// Handlers across all channels
    pub fn total_subscribers(&self) -> usize {
        Channel::ALL.iter().map(|c| self.subscriber_count(*c)).sum()
    }
}
