//! Per-connection handling: handshake, registration, receive loop, cleanup.

use crate::{
    config::IdentityPolicy,
    connection::{ConnectionId, ConnectionRegistry, ConnectionState, Registration},
    error::RelayError,
    messaging::{route_client_message, RouteOutcome, SessionContext},
    stats::RelayStats,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tracing::{debug, error, info, warn};

/// How long the writer task may keep flushing after the connection left the
/// registry.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared state every connection handler needs.
#[derive(Clone)]
pub struct HandlerContext {
    pub registry: Arc<ConnectionRegistry>,
    pub stats: Arc<RelayStats>,
    pub identity_policy: IdentityPolicy,
    /// Flips to `true` once the relay starts shutting down
    pub shutdown: watch::Receiver<bool>,
}

fn transition(state: &mut ConnectionState, next: ConnectionState, connection_id: ConnectionId) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal connection state transition {state} -> {next}"
    );
    debug!(connection_id, from = %state, to = %next, "Connection state change");
    *state = next;
}

/// Sends a close frame on a connection that never made it into the registry.
async fn refuse(mut ws_stream: WebSocketStream<TcpStream>, code: CloseCode, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    };
    if let Err(e) = ws_stream.close(Some(frame)).await {
        debug!("Close frame not delivered: {}", e);
    }
}

/// Handles a single accepted TCP stream for its whole lifetime.
///
/// Performs the WebSocket handshake, registers the connection, spawns its
/// writer task and runs the receive loop until the peer leaves, the
/// transport fails, the registry evicts the connection, or the relay shuts
/// down. The connection is always removed from the registry before this
/// function returns.
///
/// # Arguments
///
/// * `stream` - The accepted TCP stream, handshake not yet performed
/// * `addr` - Remote address of the peer
/// * `ctx` - Registry, counters, identity policy and shutdown flag
///
/// # Errors
///
/// * `RelayError::Connection` - the handshake failed or the relay is full
/// * `RelayError::ShuttingDown` - the handshake finished after shutdown began
///
/// A refused connection is sent a close frame first. Errors in individual
/// messages are logged and never returned.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: HandlerContext,
) -> Result<(), RelayError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| RelayError::Connection(format!("WebSocket handshake failed for {addr}: {e}")))?;

    // The accept loop may have stopped and emptied the registry while the
    // handshake was in flight.
    if *ctx.shutdown.borrow() {
        debug!(%addr, "Handshake finished after shutdown, closing");
        refuse(ws_stream, CloseCode::Away, "relay is shutting down").await;
        return Err(RelayError::ShuttingDown);
    }

    let Registration {
        id: connection_id,
        mut outbound,
        mut evicted,
    } = match ctx.registry.register(addr) {
        Ok(registration) => registration,
        Err(RelayError::ShuttingDown) => {
            debug!(%addr, "Registry closed during handshake, closing");
            refuse(ws_stream, CloseCode::Away, "relay is shutting down").await;
            return Err(RelayError::ShuttingDown);
        }
        Err(e) => {
            ctx.stats.record_refused();
            warn!(%addr, "Refusing connection: {}", e);
            refuse(ws_stream, CloseCode::Again, "relay is full").await;
            return Err(e);
        }
    };

    let mut state = ConnectionState::Connecting;
    transition(&mut state, ConnectionState::Open, connection_id);
    ctx.stats.record_accepted();
    info!(connection_id, %addr, "🔗 Connection established");

    let (mut ws_sink, mut ws_receiver) = ws_stream.split();

    // Drains broadcasts into the socket. Ends when every sender is gone, i.e.
    // once the connection has left the registry.
    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = ws_sink.send(message).await {
                debug!(connection_id, "Write failed: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    let mut session = SessionContext::new(connection_id, ctx.identity_policy);
    let mut shutdown = ctx.shutdown.clone();

    loop {
        tokio::select! {
            _ = &mut evicted => {
                debug!(connection_id, "Connection left the registry, stopping receive loop");
                break;
            }
            // The flag only ever goes to true; a dropped sender means the
            // relay is gone as well.
            _ = shutdown.wait_for(|stopping| *stopping) => {
                debug!(connection_id, "Relay shutting down, stopping receive loop");
                break;
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    process_frame(text.as_str(), &mut session, &ctx);
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => process_frame(text, &mut session, &ctx),
                    Err(e) => {
                        ctx.stats.record_rejected();
                        warn!(connection_id, "Discarding binary frame: {}", RelayError::Parse(e.to_string()));
                    }
                },
                Some(Ok(Message::Close(_))) => {
                    debug!(connection_id, "Peer requested close");
                    break;
                }
                // Ping/pong are answered by the transport.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(connection_id, "WebSocket error: {}", e);
                    break;
                }
                None => break,
            },
        }
    }

    transition(&mut state, ConnectionState::Closing, connection_id);
    if ctx.registry.remove(connection_id) {
        debug!(connection_id, "Removed connection on disconnect");
    }

    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        warn!(connection_id, "Writer did not finish in time, aborting");
        writer.abort();
    }

    transition(&mut state, ConnectionState::Closed, connection_id);
    info!(connection_id, %addr, "👋 Connection closed");
    Ok(())
}

fn process_frame(text: &str, session: &mut SessionContext, ctx: &HandlerContext) {
    match route_client_message(text, session, &ctx.registry) {
        Ok(RouteOutcome::Relayed(report)) => {
            ctx.stats.record_relayed();
            ctx.stats.record_evicted(report.evicted.len());
        }
        Ok(RouteOutcome::Ignored(kind)) => {
            debug!(
                connection_id = session.connection_id,
                kind = %kind,
                "Ignoring message of unhandled type"
            );
        }
        Err(e) if e.is_message_local() => {
            ctx.stats.record_rejected();
            warn!(
                connection_id = session.connection_id,
                "Discarding message: {}", e
            );
        }
        Err(e) => {
            error!(
                connection_id = session.connection_id,
                "Failed to relay message: {}", e
            );
        }
    }
}
