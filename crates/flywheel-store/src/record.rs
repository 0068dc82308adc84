//! The iterable record contract.

use crate::Schedule;

/// A persisted entity participating in scheduling.
///
/// A record may carry several independently named schedules, e.g. a
/// heartbeat schedule and a capability-check schedule, each advanced by
/// its own iterator. Schedules are mutated only by store
/// implementations as part of the atomic claim; `schedule_mut` exists
/// for them, not for application code.
pub trait IterableRecord: Clone + Send + Sync + 'static {
    /// Unique key of the record.
    fn id(&self) -> &str;

    /// Entity type name shared by all records of this kind.
    fn entity_type(&self) -> &str;

    /// Look up a schedule by field name.
    fn schedule(&self, field_name: &str) -> Option<&Schedule>;

    /// Mutable schedule access for store implementations.
    fn schedule_mut(&mut self, field_name: &str) -> Option<&mut Schedule>;
}
