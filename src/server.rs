//! WebSocket Server
//!
//! One axum route upgrades to a WebSocket; each socket gets its own task
//! pumping inbound frames, hub deliveries and outbound pushes for one
//! `ClientConnection`.

use std::fmt::Display;
use std::io;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::bus::BusError;
use crate::config::ConfigError;
use crate::connection::OUTBOUND_CAPACITY;
use crate::registry::ConnectionRegistry;
use crate::store::StoreError;

/// Errors that stop the gateway
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone)]
struct GatewayState {
    registry: Arc<ConnectionRegistry>,
    max_message_size: usize,
}

/// Router serving the WebSocket endpoint at `/`
pub fn router(registry: Arc<ConnectionRegistry>, max_message_size: usize) -> Router {
    Router::new().route("/", get(upgrade)).with_state(GatewayState {
        registry,
        max_message_size,
    })
}

async fn upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket: WebSocket| async move {
            let (sink, stream) = socket.split();
            run_socket(state.registry, stream, sink).await;
        })
}

/// Drive one socket until it closes, then release the connection
pub async fn run_socket<S, K, E>(registry: Arc<ConnectionRegistry>, mut inbound: S, mut sink: K)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    let (outbound, mut frames) = mpsc::channel(OUTBOUND_CAPACITY);
    let (mut connection, mut mailbox) = registry.accept_connection(outbound);
    let id = connection.id();

    loop {
        // no priority between client commands and hub deliveries
        tokio::select! {
            message = inbound.next() => match message {
                Some(Ok(Message::Text(text))) => connection.handle_message(&text).await,
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => connection.handle_message(&text).await,
                    Err(_) => debug!(connection_id = %id, "Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection_id = %id, error = %e, "Socket read failed");
                    break;
                }
            },

            Some(delivery) = mailbox.recv() => connection.deliver(delivery).await,
        }

        if let Err(e) = flush(&mut frames, &mut sink).await {
            debug!(connection_id = %id, error = %e, "Socket write failed");
            break;
        }
    }

    connection.close();

    // pushes produced before the close are still written
    if flush(&mut frames, &mut sink).await.is_ok() {
        if let Err(e) = sink.close().await {
            debug!(connection_id = %id, error = %e, "Socket close failed");
        }
    }
}

/// Write every queued frame to the socket
async fn flush<K>(frames: &mut mpsc::Receiver<String>, sink: &mut K) -> Result<(), K::Error>
where
    K: Sink<Message> + Unpin,
{
    while let Ok(frame) = frames.try_recv() {
        sink.send(Message::Text(frame)).await?;
    }
    Ok(())
}

/// Serve until ctrl-c
pub async fn serve(listener: TcpListener, router: Router) -> Result<(), ServerError> {
    info!(addr = ?listener.local_addr().ok(), "Serving WebSocket gateway");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl-c");
        return;
    }
    info!("Shutdown requested");
}
