//! The connection registry: the relay's only shared mutable state.
//!
//! All structural mutation (insert on accept, remove on disconnect or failed
//! delivery) goes through [`ConnectionRegistry`]. Fan-out never iterates the
//! live map while sending; it takes a snapshot of the outbound queue handles
//! first, so a concurrent disconnect can neither corrupt the pass nor cause a
//! send into a half-destroyed connection.

use super::{ClientConnection, ConnectionId};
use crate::config::RelayConfig;
use crate::error::RelayError;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Handles given to the task that owns a freshly registered connection.
#[derive(Debug)]
pub struct Registration {
    /// The broker-assigned identifier
    pub id: ConnectionId,
    /// Messages queued for this connection by broadcasts
    pub outbound: mpsc::Receiver<Message>,
    /// Resolves once the connection has been removed from the registry
    pub evicted: oneshot::Receiver<()>,
}

/// Outcome of a single fan-out pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Number of recipients the message was queued for
    pub delivered: usize,
    /// Recipients whose delivery failed and that this pass evicted
    pub evicted: Vec<ConnectionId>,
}

/// Registry of live connections.
///
/// Identifiers come from a monotonically increasing counter starting at 1 and
/// are never reused. [`ConnectionRegistry::remove`] is idempotent and reports
/// whether the caller performed the removal, so a connection that is dropped
/// by its receive loop and by a failed broadcast at the same time is released
/// exactly once.
///
/// Once [`ConnectionRegistry::close_all`] has run the registry is closed for
/// good and every later registration is refused.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ClientConnection>,
    next_id: AtomicUsize,
    active: AtomicUsize,
    closed: AtomicBool,
    max_connections: usize,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    ///
    /// # Arguments
    ///
    /// * `max_connections` - Admission limit, 0 for unlimited
    /// * `queue_capacity` - Bound of each connection's outbound queue (at least 1)
    pub fn new(max_connections: usize, queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicUsize::new(1),
            active: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            max_connections,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Creates a registry sized from the relay configuration.
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.max_connections, config.outbound_queue_capacity)
    }

    /// Registers a new connection and returns its handles.
    ///
    /// # Arguments
    ///
    /// * `remote_addr` - Peer address, kept for logging
    ///
    /// # Returns
    ///
    /// The [`Registration`] the connection task drives: its identifier, the
    /// receiving end of its outbound queue, and the eviction guard.
    ///
    /// # Errors
    ///
    /// * `RelayError::ShuttingDown` - [`ConnectionRegistry::close_all`] has run
    /// * `RelayError::Connection` - `max_connections` is reached
    ///
    /// # Examples
    ///
    /// ```
    /// use relay_server::ConnectionRegistry;
    ///
    /// let registry = ConnectionRegistry::new(0, 16);
    /// let registration = registry.register("127.0.0.1:4000".parse().unwrap()).unwrap();
    /// assert!(registry.contains(registration.id));
    /// ```
    pub fn register(&self, remote_addr: SocketAddr) -> Result<Registration, RelayError> {
        if self.is_closed() {
            return Err(RelayError::ShuttingDown);
        }

        let max = self.max_connections;
        let admitted = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (max == 0 || n < max).then_some(n + 1)
            })
            .is_ok();
        if !admitted {
            return Err(RelayError::Connection(format!(
                "relay is full ({max} connections)"
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.queue_capacity);
        let (guard_tx, guard_rx) = oneshot::channel();
        self.connections
            .insert(id, ClientConnection::new(remote_addr, outbound_tx, guard_tx));

        // close_all may have drained the map between the check above and the
        // insert. It sets the flag before draining, so one side sees the other.
        if self.is_closed() {
            self.remove(id);
            return Err(RelayError::ShuttingDown);
        }
        debug!(connection_id = id, %remote_addr, "Connection registered");

        Ok(Registration {
            id,
            outbound: outbound_rx,
            evicted: guard_rx,
        })
    }

    /// Removes a connection and releases its resources.
    ///
    /// Dropping the stored [`ClientConnection`] closes the outbound queue and
    /// fires the eviction guard, so the connection's tasks wind down on their
    /// own.
    ///
    /// # Returns
    ///
    /// `true` if this call removed the connection and `false` if it was
    /// already gone. Never fails.
    pub fn remove(&self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some((_, connection)) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                debug!(
                    connection_id = id,
                    remote_addr = %connection.remote_addr,
                    connected_for = ?connection.age(),
                    "Connection removed from registry"
                );
                true
            }
            None => false,
        }
    }

    /// Whether `id` is currently registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Remote address of a registered connection.
    pub fn remote_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&id).map(|c| c.remote_addr)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`ConnectionRegistry::close_all`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Identifiers of all registered connections, in no particular order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    fn snapshot(&self) -> Vec<(ConnectionId, mpsc::Sender<Message>)> {
        self.connections
            .iter()
            .map(|entry| (*entry.key(), entry.value().outbound().clone()))
            .collect()
    }

    /// Queues `message` for every connection except `sender`.
    ///
    /// The pass runs over a snapshot of the outbound queues taken up front,
    /// so connections that join or leave mid-pass neither block it nor
    /// receive a half-sent message. Delivery never waits: a recipient whose
    /// queue is closed or full counts as failed.
    ///
    /// # Arguments
    ///
    /// * `sender` - Connection the message came from; it never gets a copy
    /// * `message` - Frame to queue, cloned once per recipient
    ///
    /// # Returns
    ///
    /// A [`BroadcastReport`] with the number of recipients reached and the
    /// connections this pass evicted. Failed recipients are evicted only after
    /// every other recipient has been tried, and a connection already removed
    /// elsewhere is not reported.
    ///
    /// # Examples
    ///
    /// ```
    /// use relay_server::ConnectionRegistry;
    /// use tokio_tungstenite::tungstenite::Message;
    ///
    /// let registry = ConnectionRegistry::new(0, 16);
    /// let addr = "127.0.0.1:4000".parse().unwrap();
    /// let sender = registry.register(addr).unwrap();
    /// let mut peer = registry.register(addr).unwrap();
    ///
    /// let report = registry.broadcast_except(sender.id, &Message::text("hi"));
    /// assert_eq!(report.delivered, 1);
    /// assert_eq!(peer.outbound.try_recv().unwrap(), Message::text("hi"));
    /// ```
    pub fn broadcast_except(&self, sender: ConnectionId, message: &Message) -> BroadcastReport {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for (id, outbound) in self.snapshot() {
            if id == sender {
                continue;
            }
            match outbound.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(connection_id = id, "{} (queue full), dropping slow consumer", RelayError::Delivery(id));
                    failed.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(connection_id = id, "{} (connection already closed)", RelayError::Delivery(id));
                    failed.push(id);
                }
            }
        }

        let evicted: Vec<ConnectionId> = failed.into_iter().filter(|id| self.remove(*id)).collect();
        for id in &evicted {
            debug!(connection_id = *id, "Cleaned up dead connection");
        }

        BroadcastReport { delivered, evicted }
    }

    /// Queues a close frame for every connection, empties the registry and
    /// closes it to new registrations.
    ///
    /// # Returns
    ///
    /// The number of connections this call removed.
    pub fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let snapshot = self.snapshot();
        for (_, outbound) in &snapshot {
            let _ = outbound.try_send(Message::Close(None));
        }
        snapshot
            .into_iter()
            .filter(|(id, _)| self.remove(*id))
            .count()
    }
}
