//! Connection Registry
//!
//! Owns the shared collaborators every connection needs (hub, store,
//! network), tracks which connections are live, and starts the bus bridge
//! at most once.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

use crate::address::Network;
use crate::bridge::{BridgeConfig, BridgeHandle, BusBridge};
use crate::bus::BusClient;
use crate::connection::{ClientConnection, ConnectionId, Mailbox, Outbound};
use crate::hub::BroadcastHub;
use crate::reactor::Reactor;
use crate::store::ChainStore;

/// Bookkeeping for one live connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub opened_at: Instant,
}

pub struct ConnectionRegistry {
    hub: Arc<BroadcastHub>,
    store: Arc<dyn ChainStore>,
    network: Network,
    live: DashMap<ConnectionId, ConnectionInfo>,
    next_id: AtomicU64,
    bridge: Mutex<Option<BridgeHandle>>,
}

impl ConnectionRegistry {
    pub fn new(store: Arc<dyn ChainStore>, network: Network) -> Self {
        Self {
            hub: Arc::new(BroadcastHub::new()),
            store,
            network,
            live: DashMap::new(),
            next_id: AtomicU64::new(1),
            bridge: Mutex::new(None),
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn ChainStore> {
        &self.store
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Start the bus bridge; later calls are no-ops
    ///
    /// Returns whether this call started it.
    pub fn start_bridge(&self, bus: Arc<dyn BusClient>, config: BridgeConfig) -> io::Result<bool> {
        let mut bridge = self.bridge.lock();
        if bridge.is_some() {
            return Ok(false);
        }

        let runtime = Reactor::global().handle()?;
        *bridge = Some(BusBridge::new(Arc::clone(&self.hub)).spawn(bus, config, &runtime));
        Ok(true)
    }

    pub fn bridge_running(&self) -> bool {
        self.bridge
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Register a new connection writing frames to `outbound`
    pub fn accept_connection(self: &Arc<Self>, outbound: Outbound) -> (ClientConnection, Mailbox) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.live.insert(
            id,
            ConnectionInfo {
                opened_at: Instant::now(),
            },
        );

        info!(connection_id = %id, live = self.live.len(), "Connection opened");
        ClientConnection::new(id, Arc::clone(self), outbound)
    }

    /// Forget a connection
    ///
    /// # Returns
    /// Its bookkeeping if it was still live
    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.live.remove(&id).map(|(_, info)| info)
    }

    pub fn is_live(&self, id: ConnectionId) -> bool {
        self.live.contains_key(&id)
    }

    pub fn connection_count(&self) -> usize {
        self.live.len()
    }
}
