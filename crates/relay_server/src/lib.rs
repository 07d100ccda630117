//! # Relay Server - Real-Time Position Fan-Out
//!
//! A thin WebSocket relay for multiplayer position sharing. Clients send small
//! JSON `pos` messages describing where their player is; the relay validates
//! each message, fills in optional fields, and forwards it to every *other*
//! connected client. The relay never runs game logic: physics, level geometry,
//! timers and scoreboards all stay on the clients.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Relay Server** ([`RelayServer`]) - Binds the listener, runs the accept
//!   loop and coordinates shutdown
//! * **Connection Registry** ([`ConnectionRegistry`]) - The only shared mutable
//!   state: live connections keyed by a broker-assigned [`ConnectionId`]
//! * **Message Router** - Parses and validates inbound frames and hands valid
//!   updates to the registry for fan-out
//!
//! ### Message Flow
//!
//! 1. Client sends a text frame: `{"type":"pos","id":"a1","x":1,"y":2,"z":3}`
//! 2. The connection's receive loop hands it to the router
//! 3. The router validates required fields and fills `name`/`color` defaults
//! 4. The registry serializes the update once and queues it for every
//!    connection except the sender
//! 5. Each connection's writer task drains its queue into the socket
//!
//! ## Error Handling
//!
//! [`RelayError`] categorizes failures. Parse and schema errors are local to
//! one message, delivery and connection errors are local to one connection.
//! Only a bind failure at startup is fatal.
//!
//! ## Thread Safety
//!
//! * The registry is a `DashMap` hidden behind [`ConnectionRegistry`]
//! * Broadcasts iterate over a snapshot, never over live shards
//! * Removal is idempotent and reports whether the caller performed it

pub use config::{IdentityPolicy, RelayConfig};
pub use connection::{
    BroadcastReport, ClientConnection, ConnectionId, ConnectionRegistry, ConnectionState,
};
pub use error::RelayError;
pub use messaging::{PositionUpdate, DEFAULT_COLOR, DEFAULT_NAME};
pub use server::RelayServer;
pub use stats::{RelayStats, StatsSnapshot};
pub use utils::{create_server, create_server_with_config};

pub mod config;
pub mod connection;
pub mod error;
pub mod messaging;
pub mod server;
pub mod stats;
pub mod utils;
