//! Core relay server implementation.
//!
//! This module contains the main `RelayServer` struct: listener setup, the
//! accept loop, and shutdown coordination.

use crate::{
    config::RelayConfig,
    connection::ConnectionRegistry,
    error::RelayError,
    server::handlers::{handle_connection, HandlerContext},
    stats::{RelayStats, StatsSnapshot},
};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Pause after a failed `accept` so a persistent error (e.g. fd exhaustion)
/// does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

const LISTEN_BACKLOG: i32 = 1024;

/// The relay broker.
///
/// `RelayServer` owns the connection registry and runs the accept loop. Every
/// accepted connection gets its own task; the server itself never touches a
/// socket after accepting it.
///
/// Cloning is cheap and every clone controls the same relay, so one clone can
/// run [`RelayServer::start`] while another calls [`RelayServer::shutdown`].
#[derive(Clone)]
pub struct RelayServer {
    /// Server configuration settings
    config: Arc<RelayConfig>,

    /// Registry of live connections
    registry: Arc<ConnectionRegistry>,

    /// Relay-wide counters
    stats: Arc<RelayStats>,

    /// Set to `true` to stop the accept loop
    shutdown_sender: Arc<watch::Sender<bool>>,
}

impl RelayServer {
    /// Creates a new relay with the specified configuration.
    ///
    /// Nothing is bound until [`RelayServer::bind`] or
    /// [`RelayServer::start`] is called.
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::from_config(&config));
        let (shutdown_sender, _) = watch::channel(false);

        Self {
            config: Arc::new(config),
            registry,
            stats: Arc::new(RelayStats::new()),
            shutdown_sender: Arc::new(shutdown_sender),
        }
    }

    /// Binds the listening socket with `SO_REUSEADDR` set.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// `RelayError::Bind` if the socket cannot be created, bound, or put into
    /// listening mode. This is the relay's only fatal error.
    pub fn bind(&self) -> Result<TcpListener, RelayError> {
        let addr = self.config.bind_address;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| RelayError::Bind(format!("Socket creation failed: {e}")))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| RelayError::Bind(format!("Setting SO_REUSEADDR failed: {e}")))?;
        socket
            .bind(&addr.into())
            .map_err(|e| RelayError::Bind(format!("Bind to {addr} failed: {e}")))?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| RelayError::Bind(format!("Listen on {addr} failed: {e}")))?;

        let std_listener: StdTcpListener = socket.into();
        std_listener
            .set_nonblocking(true)
            .map_err(|e| RelayError::Bind(format!("Setting non-blocking mode failed: {e}")))?;

        TcpListener::from_std(std_listener)
            .map_err(|e| RelayError::Bind(format!("Tokio listener creation failed: {e}")))
    }

    /// Binds the configured address and serves until shutdown.
    ///
    /// # Errors
    ///
    /// `RelayError::Bind` if the listener cannot be set up. Per-connection
    /// failures are logged and never end the relay.
    pub async fn start(&self) -> Result<(), RelayError> {
        info!("🚀 Starting relay on {}", self.config.bind_address);
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener until
    /// [`RelayServer::shutdown`] is called, then closes every connection.
    ///
    /// Each accepted stream is handed to its own task. Connections whose
    /// handshake is still in flight when shutdown starts are closed as soon
    /// as the handshake completes and never join the registry.
    ///
    /// # Arguments
    ///
    /// * `listener` - A listener from [`RelayServer::bind`], or any bound
    ///   tokio listener (tests pass one on an ephemeral port)
    ///
    /// # Returns
    ///
    /// `Ok(())` once the loop has stopped and the registry is closed.
    /// Accept and per-connection failures are logged and never end the loop.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use relay_server::{create_server, RelayError};
    ///
    /// # async fn run() -> Result<(), RelayError> {
    /// let server = create_server();
    /// let listener = server.bind()?;
    /// let handle = tokio::spawn({
    ///     let server = server.clone();
    ///     async move { server.serve(listener).await }
    /// });
    ///
    /// server.shutdown();
    /// handle.await.expect("relay task panicked")?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        match listener.local_addr() {
            Ok(addr) => info!("✅ Relay listening on {}", addr),
            Err(e) => debug!("Listener address unavailable: {}", e),
        }
        info!(
            "⚙️ Identity policy: {}, max connections: {}, outbound queue: {}",
            self.config.identity_policy,
            if self.config.max_connections == 0 {
                "unlimited".to_string()
            } else {
                self.config.max_connections.to_string()
            },
            self.config.outbound_queue_capacity
        );

        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let ctx = HandlerContext {
            registry: self.registry.clone(),
            stats: self.stats.clone(),
            identity_policy: self.config.identity_policy,
            shutdown: shutdown_receiver.clone(),
        };

        loop {
            let stop = *shutdown_receiver.borrow_and_update();
            if stop {
                info!("Shutdown signal received");
                break;
            }

            tokio::select! {
                changed = shutdown_receiver.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            match handle_connection(stream, addr, ctx).await {
                                Ok(()) => {}
                                // Port scans, plain HTTP requests, refusals.
                                Err(e) if e.is_connection_local() => {
                                    debug!(%addr, "Connection not established: {}", e);
                                }
                                Err(e) => error!(%addr, "Connection task failed: {}", e),
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        info!("🧹 Closing connections...");
        let closed = self.registry.close_all();
        info!("✅ Closed {} connection(s), relay stopped", closed);
        Ok(())
    }

    /// Signals the accept loop to stop.
    ///
    /// Safe to call before the loop starts and more than once.
    pub fn shutdown(&self) {
        self.shutdown_sender.send_replace(true);
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_sender.borrow()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// The registry of live connections.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Current counters and connection count.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.registry.len())
    }
}
