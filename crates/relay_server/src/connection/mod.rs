//! Connection management for relay clients.
//!
//! This module handles the lifecycle of client connections: identifier
//! assignment, registry membership, outbound queues, and fan-out.

pub mod client;
pub mod manager;

pub use client::{ClientConnection, ConnectionState};
pub use manager::{BroadcastReport, ConnectionRegistry, Registration};

/// Type alias for connection identifiers.
///
/// Assigned by the relay at accept time from a process-wide counter and never
/// reused. Unrelated to the `id` field clients put inside their messages.
pub type ConnectionId = usize;
