//! Schedule recalculation.
//!
//! Produces the refreshed, bounded-length slot list for one schedule.
//! The function is pure: "now" is always the caller-supplied
//! checkpoint, never the wall clock, which keeps every scenario
//! independently testable.

use chrono::{DateTime, Utc};

use flywheel_store::SchedulingType;

use crate::config::CatchUpPolicy;
use crate::recurrence::{RecurrenceError, RecurrenceEvaluator};

/// Recompute the slot list of one schedule against `checkpoint`.
///
/// Skip-missed types keep only slots strictly after the checkpoint;
/// non-skip types retain elapsed slots per `catch_up`. The evaluator
/// then pads the list to exactly `lookahead` entries, each strictly
/// later than its predecessor. An evaluator that cannot advance is a
/// fatal configuration error.
pub fn recalculate(
    existing: &[DateTime<Utc>],
    checkpoint: DateTime<Utc>,
    scheduling_type: SchedulingType,
    catch_up: CatchUpPolicy,
    spec: &str,
    lookahead: usize,
    evaluator: &dyn RecurrenceEvaluator,
) -> Result<Vec<DateTime<Utc>>, RecurrenceError> {
    let mut slots: Vec<DateTime<Utc>> = if scheduling_type.skips_missed() {
        existing.iter().copied().filter(|s| *s > checkpoint).collect()
    } else {
        match catch_up {
            CatchUpPolicy::ReplayAll => existing.to_vec(),
            CatchUpPolicy::CollapseToOne => {
                let last_elapsed = existing.iter().copied().filter(|s| *s <= checkpoint).next_back();
                last_elapsed
                    .into_iter()
                    .chain(existing.iter().copied().filter(|s| *s > checkpoint))
                    .collect()
            }
        }
    };
    slots.truncate(lookahead);

    // Generation anchor: the last slot the grid continues from. With a
    // collapsed backlog, generation resumes from the checkpoint so the
    // missed grid is not reconstructed.
    let last_future = slots.iter().copied().filter(|s| *s > checkpoint).next_back();
    let mut anchor = match (scheduling_type.skips_missed(), catch_up) {
        (false, CatchUpPolicy::CollapseToOne) => last_future.unwrap_or(checkpoint),
        _ => slots.last().copied().unwrap_or(checkpoint),
    };

    while slots.len() < lookahead {
        let next = evaluator.next_fire_time(spec, anchor)?;
        if next <= anchor {
            return Err(RecurrenceError::Exhausted(spec.to_string()));
        }
        slots.push(next);
        anchor = next;
    }

    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::StandardEvaluator;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    const SPEC: &str = "@every 1s";
    const N: usize = 10;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn ms(offset: i64) -> DateTime<Utc> {
        base() + Duration::milliseconds(offset)
    }

    fn recalc_skip(existing: &[DateTime<Utc>], checkpoint: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        recalculate(
            existing,
            checkpoint,
            SchedulingType::RegularSkipMissed,
            CatchUpPolicy::default(),
            SPEC,
            N,
            &StandardEvaluator,
        )
        .unwrap()
    }

    // === Unit Tests ===

    #[test]
    fn test_future_slots_kept_and_padded() {
        let now = base();
        let result = recalc_skip(&[ms(1000), ms(2000)], now);

        assert_eq!(result.len(), N);
        assert_eq!(result[0], ms(1000));
        assert_eq!(result[1], ms(2000));
    }

    #[test]
    fn test_all_past_slots_discarded() {
        let now = base();
        let result = recalc_skip(&[ms(-2000), ms(-1000)], now);

        assert_eq!(result.len(), N);
        assert_ne!(result[0], ms(-2000));
        assert_ne!(result[0], ms(-1000));
        assert!(result[0] > now);
    }

    #[test]
    fn test_only_strictly_future_slots_survive() {
        let now = base();
        let result = recalc_skip(&[ms(-2000), ms(-1000), now, ms(1000), ms(2000)], now);

        assert_eq!(result.len(), N);
        // `now` itself is excluded: the filter is strict
        assert_eq!(result[0], ms(1000));
    }

    #[test]
    fn test_checkpoint_shift_moves_boundary_consistently() {
        let now = base();
        let slots = [ms(-2000), ms(-1000), now, ms(1000), ms(2000)];
        let result = recalc_skip(&slots, now + Duration::milliseconds(1));

        assert_eq!(result.len(), N);
        assert_eq!(result[0], ms(1000));
    }

    #[test]
    fn test_empty_existing_generates_from_checkpoint() {
        let now = base();
        let result = recalc_skip(&[], now);

        assert_eq!(result.len(), N);
        assert!(result[0] > now);
        assert_eq!(result[0], now + Duration::seconds(1));
    }

    #[test]
    fn test_replay_all_keeps_backlog() {
        let now = base();
        let existing = [ms(-3000), ms(-2000), ms(-1000)];
        let result = recalculate(
            &existing,
            now,
            SchedulingType::Regular,
            CatchUpPolicy::ReplayAll,
            SPEC,
            N,
            &StandardEvaluator,
        )
        .unwrap();

        assert_eq!(result.len(), N);
        assert_eq!(&result[..3], &existing);
    }

    #[test]
    fn test_collapse_keeps_single_elapsed_slot() {
        let now = base();
        let result = recalculate(
            &[ms(-3000), ms(-2000), ms(-1000), ms(1000)],
            now,
            SchedulingType::Regular,
            CatchUpPolicy::CollapseToOne,
            SPEC,
            N,
            &StandardEvaluator,
        )
        .unwrap();

        assert_eq!(result.len(), N);
        assert_eq!(result[0], ms(-1000));
        assert_eq!(result[1], ms(1000));
        // Generation resumes from the last future slot, not the backlog
        assert_eq!(result[2], ms(1000) + Duration::seconds(1));
    }

    #[test]
    fn test_collapse_without_future_resumes_from_checkpoint() {
        let now = base();
        let result = recalculate(
            &[ms(-5000), ms(-1000)],
            now,
            SchedulingType::Irregular,
            CatchUpPolicy::CollapseToOne,
            SPEC,
            N,
            &StandardEvaluator,
        )
        .unwrap();

        assert_eq!(result.len(), N);
        assert_eq!(result[0], ms(-1000));
        assert_eq!(result[1], now + Duration::seconds(1));
    }

    #[test]
    fn test_malformed_spec_is_an_error() {
        let result = recalculate(
            &[],
            base(),
            SchedulingType::RegularSkipMissed,
            CatchUpPolicy::default(),
            "@every banana",
            N,
            &StandardEvaluator,
        );
        assert!(result.is_err());
    }

    // === Property-Based Tests ===

    fn slot_offsets() -> impl Strategy<Value = Vec<i64>> {
        prop::collection::btree_set(-600_000i64..600_000, 0..N).prop_map(|s| s.into_iter().collect())
    }

    proptest! {
        // Result is always exactly lookahead long
        #[test]
        fn recalc_always_fills_lookahead(offsets in slot_offsets()) {
            let existing: Vec<_> = offsets.iter().map(|o| ms(*o)).collect();
            let result = recalc_skip(&existing, base());
            prop_assert_eq!(result.len(), N);
        }

        // Result is strictly ascending with no duplicates
        #[test]
        fn recalc_result_strictly_ascending(offsets in slot_offsets()) {
            let existing: Vec<_> = offsets.iter().map(|o| ms(*o)).collect();
            let result = recalc_skip(&existing, base());
            prop_assert!(result.windows(2).all(|w| w[0] < w[1]));
        }

        // Skip-missed output never contains an instant at or before the checkpoint
        #[test]
        fn recalc_skip_missed_is_strictly_future(offsets in slot_offsets()) {
            let existing: Vec<_> = offsets.iter().map(|o| ms(*o)).collect();
            let checkpoint = base();
            let result = recalc_skip(&existing, checkpoint);
            prop_assert!(result.iter().all(|s| *s > checkpoint));
        }

        // The kept prefix is exactly the strictly-future subset, in order
        #[test]
        fn recalc_preserves_future_prefix(offsets in slot_offsets()) {
            let existing: Vec<_> = offsets.iter().map(|o| ms(*o)).collect();
            let checkpoint = base();
            let kept: Vec<_> = existing.iter().copied().filter(|s| *s > checkpoint).collect();
            let result = recalc_skip(&existing, checkpoint);
            prop_assert_eq!(&result[..kept.len()], &kept[..]);
        }
    }

    // === Metamorphic Tests ===

    // Shifting the checkpoint anywhere inside the gap between two slots
    // leaves the surviving prefix unchanged.
    #[test]
    fn metamorphic_checkpoint_within_gap_is_equivalent() {
        let slots = [ms(-1000), ms(1000), ms(2000)];
        let baseline = recalc_skip(&slots, base());

        for shift in [1, 250, 999] {
            let shifted = recalc_skip(&slots, base() + Duration::milliseconds(shift));
            assert_eq!(shifted, baseline, "shift {shift}ms changed the result");
        }
    }

    // Recalculating an already-full future schedule is the identity.
    #[test]
    fn metamorphic_recalculation_is_idempotent() {
        let now = base();
        let first = recalc_skip(&[], now);
        let second = recalc_skip(&first, now);
        assert_eq!(first, second);
    }
}
