//! # Relay Client
//!
//! A headless peer for the position relay. A [`PeerClient`] publishes the
//! local player's position and keeps a [`PeerTable`] of every other player,
//! keyed by the `id` each one declares.
//!
//! ```no_run
//! use relay_client::{LocalPlayer, PeerClient};
//!
//! # async fn run() -> Result<(), relay_client::ClientError> {
//! let mut client = PeerClient::connect("ws://127.0.0.1:8765", LocalPlayer::new("Rin", "#e74c3c")).await?;
//! client.send_position(1.0, 2.0, 3.0).await?;
//! while let Some(update) = client.next_update().await? {
//!     println!("{} is at {:?}", update.name, update.coordinates());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod peers;

pub use client::{LocalPlayer, PeerClient};
pub use error::ClientError;
pub use peers::{PeerChange, PeerState, PeerTable};
