//! WebSocket peer that publishes its own position and tracks everyone else's.

use crate::error::ClientError;
use crate::peers::{PeerChange, PeerTable};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use relay_server::{PositionUpdate, DEFAULT_COLOR, DEFAULT_NAME};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Identity the local player announces in every update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPlayer {
    pub id: String,
    pub name: String,
    pub color: String,
}

impl LocalPlayer {
    /// Creates a player with a fresh random id.
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            color: color.into(),
        }
    }

    /// Creates a player with a caller-chosen id.
    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: color.into(),
        }
    }
}

impl Default for LocalPlayer {
    fn default() -> Self {
        Self::new(DEFAULT_NAME, DEFAULT_COLOR)
    }
}

/// A connected peer.
pub struct PeerClient {
    player: LocalPlayer,
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    peers: PeerTable,
}

impl PeerClient {
    /// Connects to the relay at `url` (e.g. `ws://127.0.0.1:8765`).
    ///
    /// # Errors
    ///
    /// `ClientError::Connect` if the relay is unreachable or the handshake
    /// fails.
    pub async fn connect(url: &str, player: LocalPlayer) -> Result<Self, ClientError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|source| ClientError::Connect {
                url: url.to_string(),
                source,
            })?;
        let (sink, stream) = ws_stream.split();
        info!(player_id = %player.id, %url, "🎮 Connected to relay");

        Ok(Self {
            peers: PeerTable::new(player.id.clone()),
            player,
            sink,
            stream,
        })
    }

    /// The identity this client announces.
    pub fn player(&self) -> &LocalPlayer {
        &self.player
    }

    /// Every other player seen so far, keyed by their `id`.
    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Publishes the local player's position.
    ///
    /// The update carries the local player's `id`, `name` and `color`, and
    /// the relay forwards it to every other connected peer.
    ///
    /// # Arguments
    ///
    /// * `x`, `y`, `z` - World coordinates, all finite
    ///
    /// # Errors
    ///
    /// * `ClientError::InvalidCoordinates` - a coordinate is NaN or infinite
    /// * `ClientError::Transport` - the frame could not be written
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use relay_client::{LocalPlayer, PeerClient};
    /// # async fn run() -> Result<(), relay_client::ClientError> {
    /// let mut client = PeerClient::connect("ws://127.0.0.1:8765", LocalPlayer::default()).await?;
    /// client.send_position(0.0, 1.0, -4.5).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn send_position(&mut self, x: f64, y: f64, z: f64) -> Result<(), ClientError> {
        let update = PositionUpdate::new(
            self.player.id.clone(),
            self.player.name.clone(),
            x,
            y,
            z,
            self.player.color.clone(),
        )
        .ok_or(ClientError::InvalidCoordinates { x, y, z })?;
        self.sink.send(Message::text(update.to_json()?)).await?;
        Ok(())
    }

    /// Waits for the next update from another player and applies it to the
    /// peer table.
    ///
    /// Frames that are not position updates, and echoes of the local
    /// player's own id, are skipped. Returns `Ok(None)` once the relay closes
    /// the connection.
    ///
    /// Cancel safe: dropping the future never loses an applied update.
    pub async fn next_update(&mut self) -> Result<Option<PositionUpdate>, ClientError> {
        while let Some(frame) = self.stream.next().await {
            let text = match frame? {
                Message::Text(text) => text,
                Message::Close(frame) => {
                    debug!(player_id = %self.player.id, ?frame, "Relay closed the connection");
                    return Ok(None);
                }
                _ => continue,
            };

            let update: PositionUpdate = match serde_json::from_str(text.as_str()) {
                Ok(update) => update,
                Err(e) => {
                    debug!(player_id = %self.player.id, "Skipping unrecognized frame: {}", e);
                    continue;
                }
            };

            match self.peers.apply(&update) {
                PeerChange::IgnoredSelf => continue,
                PeerChange::Joined => {
                    info!(player_id = %self.player.id, peer = %update.id, name = %update.name, "👋 New peer");
                }
                PeerChange::Updated => {}
            }
            return Ok(Some(update));
        }
        Ok(None)
    }

    /// Sends a close frame and waits for it to be flushed.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.sink.close().await?;
        Ok(())
    }
}
