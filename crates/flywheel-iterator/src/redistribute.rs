//! Cluster-aware claim redistribution.
//!
//! Advisory load-spreading for fleets where several nodes run the same
//! iterator: each node claims only from its own shard of the record id
//! space and jitters its claim cycles so cooperating nodes do not all
//! contend for the same globally-earliest record. Correctness never
//! depends on this; the atomic claim still picks at most one winner.

use std::time::Duration;

use rand::Rng;

use flywheel_store::Shard;

/// Default cap on per-cycle claim jitter.
const DEFAULT_JITTER_CAP: Duration = Duration::from_millis(250);

/// Shard assignment plus claim-cycle jitter for one node.
#[derive(Debug, Clone)]
pub struct Redistributor {
    shard: Shard,
    jitter_cap: Duration,
}

impl Redistributor {
    /// Create a redistributor for node `node_index` of `fleet_size`.
    pub fn new(node_index: u32, fleet_size: u32) -> Self {
        let total = fleet_size.max(1);
        Self {
            shard: Shard::new(node_index % total, total),
            jitter_cap: DEFAULT_JITTER_CAP,
        }
    }

    /// Override the jitter cap; zero disables jitter.
    pub fn with_jitter_cap(mut self, cap: Duration) -> Self {
        self.jitter_cap = cap;
        self
    }

    /// This node's claim shard.
    pub fn shard(&self) -> &Shard {
        &self.shard
    }

    /// Random delay applied before the next claim attempt.
    pub fn claim_jitter(&self) -> Duration {
        let cap_ms = self.jitter_cap.as_millis() as u64;
        if cap_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=cap_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_index_wraps_into_fleet() {
        let redistributor = Redistributor::new(5, 3);
        assert_eq!(redistributor.shard().index, 2);
        assert_eq!(redistributor.shard().total, 3);
    }

    #[test]
    fn test_zero_fleet_degrades_to_single_shard() {
        let redistributor = Redistributor::new(0, 0);
        assert_eq!(redistributor.shard().total, 1);
        assert!(redistributor.shard().covers("anything"));
    }

    #[test]
    fn test_jitter_respects_cap() {
        let redistributor =
            Redistributor::new(0, 4).with_jitter_cap(Duration::from_millis(20));
        for _ in 0..100 {
            assert!(redistributor.claim_jitter() <= Duration::from_millis(20));
        }
    }

    #[test]
    fn test_zero_cap_disables_jitter() {
        let redistributor = Redistributor::new(0, 4).with_jitter_cap(Duration::ZERO);
        assert_eq!(redistributor.claim_jitter(), Duration::ZERO);
    }
}
