//! Relay configuration types and defaults.

use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;

/// Port the relay listens on when nothing else is configured.
pub const DEFAULT_PORT: u16 = 8765;

/// Default bound on each connection's outbound queue.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// How the relay treats the caller-supplied `id` field of position updates.
///
/// The `id` inside a message is chosen by the client and is unrelated to the
/// broker-assigned connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityPolicy {
    /// Accept whatever `id` each message claims.
    #[default]
    Trust,
    /// Bind the `id` of the first valid update to the connection and discard
    /// later updates on that connection that claim a different `id`.
    BindFirst,
}

impl fmt::Display for IdentityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityPolicy::Trust => f.write_str("trust"),
            IdentityPolicy::BindFirst => f.write_str("bind-first"),
        }
    }
}

impl FromStr for IdentityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trust" => Ok(IdentityPolicy::Trust),
            "bind-first" => Ok(IdentityPolicy::BindFirst),
            other => Err(format!(
                "unknown identity policy '{other}' (expected 'trust' or 'bind-first')"
            )),
        }
    }
}

/// Configuration structure for the relay server.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// The socket address to bind the listener to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections (0 means unlimited)
    pub max_connections: usize,

    /// Capacity of each connection's outbound queue. A recipient whose queue
    /// is full when a broadcast arrives is treated as failed and evicted.
    pub outbound_queue_capacity: usize,

    /// Policy applied to the caller-supplied `id` field
    pub identity_policy: IdentityPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 0,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            identity_policy: IdentityPolicy::Trust,
        }
    }
}

impl RelayConfig {
    /// Checks the settings the relay cannot run with.
    ///
    /// # Errors
    ///
    /// `RelayError::Config` naming the first offending setting.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.outbound_queue_capacity == 0 {
            return Err(RelayError::Config(
                "outbound_queue_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
