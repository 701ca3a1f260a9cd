//! Greenwave Metrics Module
//! ========================
//!
//! Counters for the two failure-prone parts of the core:
//! - **Relay**: what happened to every routed message (sent, parked, lost)
//! - **Controller**: how often phases were re-evaluated and changed
//!
//! Drops are never errors in this protocol; these counters are the only
//! place they become visible.

use serde::Serialize;
use std::ops::AddAssign;

// =============================================================================
// RELAY COUNTERS
// =============================================================================

/// Per-node relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Routed messages created by this node
    pub originated: u64,
    /// Hops sent to a neighbor closer to the anchor
    pub forwarded: u64,
    /// Hops sent straight to a destination within range
    pub delivered_direct: u64,
    /// One-hop broadcasts (beacons, snapshots)
    pub broadcasts: u64,
    /// Messages parked in the retry queue
    pub queued: u64,
    /// Queued messages that later went out
    pub retried: u64,
    /// Dropped because the hop budget ran out
    pub expired_ttl: u64,
    /// Dropped because they waited longer than the maximum wait
    pub expired_wait: u64,
    /// Received frames that could not be decoded
    pub malformed: u64,
}

impl RelayStats {
    /// Messages lost for any reason.
    pub fn dropped(&self) -> u64 {
        self.expired_ttl + self.expired_wait + self.malformed
    }

    /// Hops actually transmitted toward a unicast destination.
    pub fn unicast_hops(&self) -> u64 {
        self.forwarded + self.delivered_direct
    }
}

impl AddAssign for RelayStats {
    fn add_assign(&mut self, other: Self) {
        self.originated += other.originated;
        self.forwarded += other.forwarded;
        self.delivered_direct += other.delivered_direct;
        self.broadcasts += other.broadcasts;
        self.queued += other.queued;
        self.retried += other.retried;
        self.expired_ttl += other.expired_ttl;
        self.expired_wait += other.expired_wait;
        self.malformed += other.malformed;
    }
}

// =============================================================================
// CONTROLLER COUNTERS
// =============================================================================

/// Signal controller counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ControllerStats {
    pub evaluations: u64,
    /// Lane status changes summed over all evaluations
    pub phase_changes: u64,
    pub directives_emitted: u64,
}

impl AddAssign for ControllerStats {
    fn add_assign(&mut self, other: Self) {
        self.evaluations += other.evaluations;
        self.phase_changes += other.phase_changes;
        self.directives_emitted += other.directives_emitted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_totals() {
        let stats = RelayStats {
            forwarded: 4,
            delivered_direct: 2,
            expired_ttl: 1,
            expired_wait: 2,
            malformed: 3,
            ..RelayStats::default()
        };
        assert_eq!(stats.unicast_hops(), 6);
        assert_eq!(stats.dropped(), 6);
    }

    #[test]
    fn test_stats_accumulate() {
        let mut total = RelayStats::default();
        total += RelayStats {
            originated: 2,
            queued: 1,
            ..RelayStats::default()
        };
        total += RelayStats {
            originated: 3,
            retried: 1,
            ..RelayStats::default()
        };
        assert_eq!(total.originated, 5);
        assert_eq!(total.queued, 1);
        assert_eq!(total.retried, 1);

        let mut controller = ControllerStats::default();
        controller += ControllerStats {
            evaluations: 1,
            phase_changes: 4,
            directives_emitted: 9,
        };
        assert_eq!(controller.directives_emitted, 9);
    }
}
