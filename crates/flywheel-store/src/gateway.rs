//! The claim/store gateway boundary.

use std::hash::{DefaultHasher, Hash, Hasher};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{IterableRecord, StoreError};

/// Deterministic subset of claim candidates for one cooperating node.
///
/// Membership derives from a stable hash of the record id modulo
/// `total`, so N nodes running the same iterator partition the
/// claiming workload roughly evenly instead of contending for the same
/// globally-earliest record. Advisory only: the atomic claim still
/// guarantees at most one winner per slot with or without sharding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    /// This node's shard index, in `0..total`.
    pub index: u32,
    /// Number of cooperating nodes.
    pub total: u32,
}

impl Shard {
    /// Create a shard assignment. `index` must be below `total`.
    pub fn new(index: u32, total: u32) -> Self {
        debug_assert!(total > 0 && index < total);
        Self { index, total }
    }

    /// Whether a record id falls in this shard.
    pub fn covers(&self, id: &str) -> bool {
        if self.total <= 1 {
            return true;
        }
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % u64::from(self.total)) as u32 == self.index
    }
}

/// A record whose due slot was just popped, together with that slot.
#[derive(Debug, Clone)]
pub struct ClaimedRecord<R> {
    /// Post-pop state of the winning record.
    pub record: R,
    /// The trigger instant that fired.
    pub slot: DateTime<Utc>,
}

/// Outcome of one atomic claim attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome<R> {
    /// A due slot was popped; this node owns the tick.
    Claimed(ClaimedRecord<R>),
    /// The earliest candidate is not due yet.
    NotDue {
        /// When the earliest candidate becomes due.
        next: DateTime<Utc>,
    },
    /// No candidate carries this schedule, or a racing node won.
    Empty,
}

/// Storage operations the iterator runtime depends on.
///
/// `claim_due` is the single cross-node synchronization point: one
/// atomic conditional update that locates the most-due candidate and
/// pops its earliest slot. A lost race surfaces as `Empty`, never as
/// an error. Everything else the runtime does is local computation.
#[async_trait]
pub trait StoreGateway<R: IterableRecord>: Send + Sync {
    /// Atomically pop the earliest due slot of the most-due candidate,
    /// optionally restricted to one shard's records.
    async fn claim_due(
        &self,
        field_name: &str,
        now: DateTime<Utc>,
        shard: Option<&Shard>,
    ) -> Result<ClaimOutcome<R>, StoreError>;

    /// Claim every record due at `now`, up to `limit` records.
    ///
    /// Each returned entry had its earliest slot popped with the same
    /// atomicity as `claim_due`; a record appears at most once per
    /// sweep even when several of its slots have elapsed.
    async fn sweep_due(
        &self,
        field_name: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ClaimedRecord<R>>, StoreError>;

    /// Replace the slot list of one schedule.
    async fn persist_schedule(
        &self,
        id: &str,
        field_name: &str,
        slots: Vec<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
}
