//! Server module containing the relay's network front end.
//!
//! `core` binds the listener and runs the accept loop; `handlers` owns each
//! accepted connection from handshake to cleanup.

pub mod core;
pub mod handlers;

pub use self::core::RelayServer;
pub use handlers::{handle_connection, HandlerContext};
