//! Relay-wide counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by connection handlers.
///
/// Counters are independent; a [`StatsSnapshot`] is not an atomic view of all
/// of them together.
#[derive(Debug, Default)]
pub struct RelayStats {
    accepted: AtomicU64,
    refused: AtomicU64,
    relayed: AtomicU64,
    rejected: AtomicU64,
    evicted: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`] plus the live connection count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Connections currently registered
    pub active: usize,
    /// Connections that completed the handshake and were registered
    pub accepted: u64,
    /// Connections turned away by the connection limit
    pub refused: u64,
    /// Position updates fanned out
    pub relayed: u64,
    /// Inbound frames discarded as malformed or mismatched
    pub rejected: u64,
    /// Connections evicted after a failed delivery
    pub evicted: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refused(&self) {
        self.refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relayed(&self) {
        self.relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, count: usize) {
        self.evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Reads every counter. `active` comes from the registry.
    pub fn snapshot(&self, active: usize) -> StatsSnapshot {
        StatsSnapshot {
            active,
            accepted: self.accepted.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = RelayStats::new();
        stats.record_accepted();
        stats.record_accepted();
        stats.record_relayed();
        stats.record_rejected();
        stats.record_evicted(3);
        stats.record_evicted(0);

        assert_eq!(
            stats.snapshot(1),
            StatsSnapshot {
                active: 1,
                accepted: 2,
                refused: 0,
                relayed: 1,
                rejected: 1,
                evicted: 3,
            }
        );
    }
}
