//! Error types for the peer client.

use tokio_tungstenite::tungstenite;

/// Errors produced by [`crate::PeerClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The relay could not be reached or refused the handshake
    #[error("Failed to connect to relay at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    /// The connection failed after it was established
    #[error("Transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    /// An outgoing update could not be encoded
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// A coordinate was NaN or infinite
    #[error("Coordinates must be finite, got ({x}, {y}, {z})")]
    InvalidCoordinates { x: f64, y: f64, z: f64 },
}
