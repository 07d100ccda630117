//! Convenience constructors.

use crate::{config::RelayConfig, server::RelayServer};

/// Creates a relay with the default configuration (`0.0.0.0:8765`, no
/// connection limit, trusting client identities).
pub fn create_server() -> RelayServer {
    RelayServer::new(RelayConfig::default())
}

/// Creates a relay with a custom configuration.
pub fn create_server_with_config(config: RelayConfig) -> RelayServer {
    RelayServer::new(config)
}
