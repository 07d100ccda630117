//! Client-side view of the other players.

use relay_server::PositionUpdate;
use std::collections::HashMap;
use std::time::Instant;

/// Last known state of one remote player.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerState {
    pub name: String,
    pub color: String,
    pub position: (f64, f64, f64),
    pub last_seen: Instant,
}

/// What [`PeerTable::apply`] did with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerChange {
    /// First update for this `id`
    Joined,
    /// Existing peer updated in place
    Updated,
    /// The update carried the local player's own `id`
    IgnoredSelf,
}

/// Remote players keyed by their self-declared `id`.
///
/// Create-or-update only: the relay never announces departures, so a peer
/// stays in the table until [`PeerTable::remove`] is called.
#[derive(Debug, Clone)]
pub struct PeerTable {
    own_id: String,
    peers: HashMap<String, PeerState>,
}

impl PeerTable {
    /// Creates an empty table that ignores updates carrying `own_id`.
    pub fn new(own_id: impl Into<String>) -> Self {
        Self {
            own_id: own_id.into(),
            peers: HashMap::new(),
        }
    }

    pub fn own_id(&self) -> &str {
        &self.own_id
    }

    /// Applies one update.
    pub fn apply(&mut self, update: &PositionUpdate) -> PeerChange {
        if update.id == self.own_id {
            return PeerChange::IgnoredSelf;
        }

        let state = PeerState {
            name: update.name.clone(),
            color: update.color.clone(),
            position: update.coordinates(),
            last_seen: Instant::now(),
        };
        match self.peers.insert(update.id.clone(), state) {
            Some(_) => PeerChange::Updated,
            None => PeerChange::Joined,
        }
    }

    pub fn get(&self, id: &str) -> Option<&PeerState> {
        self.peers.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<PeerState> {
        self.peers.remove(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PeerState)> {
        self.peers.iter().map(|(id, state)| (id.as_str(), state))
    }
}
