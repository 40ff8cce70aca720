//! TxnScope Gateway
//!
//! Serves the WebSocket push API, fed by notices from the indexing pipeline.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use txnscope_gateway::{
    router, serve, BusClient, Config, ConnectionRegistry, RedisBus, RedisStore, ServerError,
};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_target(false)
        .init();

    info!(
        network = %config.network,
        listen = %config.listen_addr,
        queue = %config.bus.queue_key(),
        "Starting gateway"
    );

    let bus: Arc<dyn BusClient> = Arc::new(RedisBus::connect(&config.bus).await?);
    let store = Arc::new(RedisStore::connect(&config.bus).await?);

    let registry = Arc::new(ConnectionRegistry::new(store, config.network));
    registry.start_bridge(bus, config.bridge.clone())?;

    let listener = TcpListener::bind(config.listen_addr).await?;
    serve(listener, router(registry, config.max_message_size)).await
}
