//! Bus Bridge
//!
//! Keeps the bus consumer alive with a heartbeat loop, drains pending notices
//! with a poll loop, and republishes each notice onto the hub channels.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bus::{BusClient, BusError, Notice, NoticeKind};
use crate::hub::{BroadcastHub, Channel};

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1000;

/// Default poll interval
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Timing of the bridge loops
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub heartbeat_interval_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl BridgeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Channels a notice of the given kind is published on
pub fn route(kind: NoticeKind) -> &'static [Channel] {
    match kind {
        NoticeKind::NewBlock => &[Channel::Blocks],
        // address matches come from the same transaction notice
        NoticeKind::NewTransaction => &[Channel::Transactions, Channel::Addresses],
        NoticeKind::Other => &[],
    }
}

/// Republishes bus notices onto the hub
#[derive(Clone)]
pub struct BusBridge {
    hub: Arc<BroadcastHub>,
}

impl BusBridge {
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        Self { hub }
    }

    /// Publish one notice on every channel its kind routes to
    ///
    /// # Returns
    /// The total number of handler deliveries
    pub fn dispatch(&self, notice: &Notice) -> usize {
        let channels = route(notice.kind);
        if channels.is_empty() {
            debug!(kind = ?notice.kind, hash = %notice.hash, "Ignoring unrouted notice");
            return 0;
        }

        channels
            .iter()
            .map(|channel| self.hub.publish(*channel, notice))
            .sum()
    }

    /// Run a single poll: drain the bus and dispatch everything drained
    ///
    /// # Returns
    /// The number of notices drained
    pub async fn drain<B: BusClient + ?Sized>(&self, bus: &B) -> Result<usize, BusError> {
        let notices = bus.poll().await?;
        for notice in &notices {
            self.dispatch(notice);
        }
        Ok(notices.len())
    }

    /// Start the heartbeat and poll loops on `runtime`
    ///
    /// Failed ticks are logged and retried on the next tick.
    pub fn spawn(self, bus: Arc<dyn BusClient>, config: BridgeConfig, runtime: &Handle) -> BridgeHandle {
        info!(
            heartbeat_ms = config.heartbeat_interval_ms,
            poll_ms = config.poll_interval_ms,
            "Starting bus bridge"
        );

        let heartbeat = {
            let bus = Arc::clone(&bus);
            let period = config.heartbeat_interval();
            runtime.spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if let Err(e) = bus.heartbeat().await {
                        warn!(error = %e, "Bus heartbeat failed");
                    }
                }
            })
        };

        let poll = {
            let period = config.poll_interval();
            runtime.spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    match self.drain(bus.as_ref()).await {
                        Ok(0) => {}
                        Ok(count) => debug!(count, "Dispatched bus notices"),
                        Err(e) => warn!(error = %e, "Bus poll failed"),
                    }
                }
            })
        };

        BridgeHandle { heartbeat, poll }
    }
}

/// Running bridge loops; aborted when dropped
pub struct BridgeHandle {
    heartbeat: JoinHandle<()>,
    poll: JoinHandle<()>,
}

impl BridgeHandle {
    pub fn abort(&self) {
        self.heartbeat.abort();
        self.poll.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.heartbeat.is_finished() && self.poll.is_finished()
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.abort();
    }
}
