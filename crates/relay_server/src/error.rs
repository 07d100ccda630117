//! Error types for the relay server.

use crate::connection::ConnectionId;

/// Errors produced by the relay.
///
/// Every variant except [`RelayError::Bind`] is contained to a single message
/// or a single connection; none of them stop the relay process.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The payload was not valid UTF-8, not JSON, or not a JSON object
    #[error("Parse error: {0}")]
    Parse(String),

    /// A required field was missing or had the wrong type
    #[error("Schema error: {0}")]
    Schema(String),

    /// Under the bind-first policy, a connection claimed a second identity
    #[error("Identity mismatch: connection is bound to '{bound}' but message claims '{claimed}'")]
    IdentityMismatch { bound: String, claimed: String },

    /// A recipient's outbound queue was closed or full
    #[error("Delivery to connection {0} failed")]
    Delivery(ConnectionId),

    /// Handshake, read, or admission failure on a single connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// The relay is shutting down and admits no new connections
    #[error("Relay is shutting down")]
    ShuttingDown,

    /// The listening endpoint could not be bound
    #[error("Bind error: {0}")]
    Bind(String),

    /// A configuration value the relay cannot run with
    #[error("Configuration error: {0}")]
    Config(String),

    /// A normalized update could not be re-encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    /// Returns `true` for errors that only discard the offending message.
    pub fn is_message_local(&self) -> bool {
        matches!(
            self,
            RelayError::Parse(_) | RelayError::Schema(_) | RelayError::IdentityMismatch { .. }
        )
    }

    /// Returns `true` for errors that end a single connection before or
    /// during setup, such as a failed handshake or an admission refusal.
    pub fn is_connection_local(&self) -> bool {
        matches!(self, RelayError::Connection(_) | RelayError::ShuttingDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_scopes() {
        let schema = RelayError::Schema("missing field 'x'".to_string());
        assert!(schema.is_message_local());
        assert!(!schema.is_connection_local());

        let handshake = RelayError::Connection("WebSocket handshake failed".to_string());
        assert!(handshake.is_connection_local());
        assert!(!handshake.is_message_local());
        assert!(RelayError::ShuttingDown.is_connection_local());

        let bind = RelayError::Bind("address in use".to_string());
        assert!(!bind.is_connection_local());
        assert!(!bind.is_message_local());
    }
}
