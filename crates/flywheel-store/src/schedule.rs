//! Persisted schedule types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of future slots a schedule carries.
pub const DEFAULT_LOOKAHEAD: usize = 10;

/// How generated slots are anchored and how elapsed slots are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingType {
    /// Slots follow the wall-clock grid implied by the recurrence spec.
    Regular,
    /// Grid-anchored; elapsed slots are dropped at recalculation.
    RegularSkipMissed,
    /// Slots are anchored to when the previous invocation completed,
    /// so drift accumulates relative to real execution.
    Irregular,
    /// Completion-anchored; elapsed slots are dropped at recalculation.
    IrregularSkipMissed,
}

impl SchedulingType {
    /// Whether elapsed slots are discarded instead of replayed.
    pub fn skips_missed(&self) -> bool {
        matches!(self, Self::RegularSkipMissed | Self::IrregularSkipMissed)
    }

    /// Whether the next slot is anchored to handler completion rather
    /// than the wall-clock grid.
    pub fn is_irregular(&self) -> bool {
        matches!(self, Self::Irregular | Self::IrregularSkipMissed)
    }
}

/// One named schedule embedded in an iterable record.
///
/// The slot list is the only mutable state shared across fleet nodes.
/// It is read-modified-written exclusively through the atomic
/// claim/persist pair; application code never updates it after the
/// record is first persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// Future trigger instants. Strictly ascending, no duplicates,
    /// at most the configured lookahead.
    pub slots: Vec<DateTime<Utc>>,
    /// Opaque recurrence expression consumed by the evaluator.
    pub recurrence_spec: String,
    /// Anchoring and missed-slot policy.
    pub scheduling_type: SchedulingType,
}

impl Schedule {
    /// Create a schedule with an explicit initial slot list.
    pub fn new(
        recurrence_spec: impl Into<String>,
        scheduling_type: SchedulingType,
        slots: Vec<DateTime<Utc>>,
    ) -> Self {
        Self {
            slots,
            recurrence_spec: recurrence_spec.into(),
            scheduling_type,
        }
    }

    /// Earliest slot, if any.
    pub fn next_slot(&self) -> Option<DateTime<Utc>> {
        self.slots.first().copied()
    }

    /// An emptied schedule permanently stops iteration for its record.
    pub fn is_stopped(&self) -> bool {
        self.slots.is_empty()
    }

    /// Check the slot-list invariant: strictly ascending, no duplicates.
    pub fn slots_are_ordered(slots: &[DateTime<Utc>]) -> bool {
        slots.windows(2).all(|w| w[0] < w[1])
    }
}
