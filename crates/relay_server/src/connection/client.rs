//! Client connection representation and lifecycle states.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

/// Lifecycle of a single connection.
///
/// `Connecting -> Open -> Closing -> Closed`. A connection is `Open` exactly
/// while it is in the registry. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP accepted, WebSocket handshake in progress
    Connecting,
    /// Registered and relaying
    Open,
    /// Peer closed, read failed, eviction, or shutdown; cleanup in progress
    Closing,
    /// Removed from the registry and all resources released
    Closed,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Open) | (Connecting, Closing) | (Open, Closing) | (Closing, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A registered client connection.
///
/// The registry owns this value for as long as the connection is `Open`.
/// Dropping it releases the connection's resources: the outbound sender is
/// closed, which ends the writer task, and the eviction guard fires, which
/// ends the receive loop.
#[derive(Debug)]
pub struct ClientConnection {
    /// The remote network address of the client
    pub remote_addr: SocketAddr,

    /// When this connection was registered
    pub connected_at: Instant,

    outbound: mpsc::Sender<Message>,

    // Never sent on; dropping it signals the receive loop.
    _eviction_guard: oneshot::Sender<()>,
}

impl ClientConnection {
    pub(crate) fn new(
        remote_addr: SocketAddr,
        outbound: mpsc::Sender<Message>,
        eviction_guard: oneshot::Sender<()>,
    ) -> Self {
        Self {
            remote_addr,
            connected_at: Instant::now(),
            outbound,
            _eviction_guard: eviction_guard,
        }
    }

    /// How long the connection has been registered.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub(crate) fn outbound(&self) -> &mpsc::Sender<Message> {
        &self.outbound
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    #[test]
    fn test_connection_age_starts_at_registration() {
        let (outbound, _rx) = mpsc::channel(1);
        let (guard, _evicted) = oneshot::channel();
        let connection = ClientConnection::new("127.0.0.1:40000".parse().unwrap(), outbound, guard);
        assert!(connection.age() < Duration::from_secs(5));
        assert!(connection.connected_at <= Instant::now());
    }

    #[test]
    fn test_legal_transitions() {
        assert!(Connecting.can_transition_to(Open));
        assert!(Connecting.can_transition_to(Closing));
        assert!(Open.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
    }

    #[test]
    fn test_closed_is_terminal() {
        for next in [Connecting, Open, Closing, Closed] {
            assert!(!Closed.can_transition_to(next));
        }
        assert!(!Open.can_transition_to(Open));
        assert!(!Closing.can_transition_to(Open));
    }
}
