//! Initial schedule construction.

use chrono::{DateTime, Utc};

use flywheel_store::{Schedule, SchedulingType};

use crate::config::CatchUpPolicy;
use crate::error::IteratorError;
use crate::recalc::recalculate;
use crate::recurrence::RecurrenceEvaluator;

/// Build the initial schedule for a record author.
///
/// The recurrence spec is validated up front: a malformed spec fails
/// here, before the record is ever persisted, so no iterator starts on
/// a schedule it cannot advance.
pub fn seed_schedule(
    spec: &str,
    scheduling_type: SchedulingType,
    now: DateTime<Utc>,
    lookahead: usize,
    evaluator: &dyn RecurrenceEvaluator,
) -> Result<Schedule, IteratorError> {
    evaluator.validate(spec)?;
    let slots = recalculate(
        &[],
        now,
        scheduling_type,
        CatchUpPolicy::default(),
        spec,
        lookahead,
        evaluator,
    )?;
    Ok(Schedule::new(spec, scheduling_type, slots))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::StandardEvaluator;
    use chrono::TimeZone;
    use flywheel_store::DEFAULT_LOOKAHEAD;

    #[test]
    fn test_seed_fills_lookahead() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let schedule = seed_schedule(
            "@every 5m",
            SchedulingType::RegularSkipMissed,
            now,
            DEFAULT_LOOKAHEAD,
            &StandardEvaluator,
        )
        .unwrap();

        assert_eq!(schedule.slots.len(), DEFAULT_LOOKAHEAD);
        assert!(schedule.slots.iter().all(|s| *s > now));
        assert!(Schedule::slots_are_ordered(&schedule.slots));
    }

    #[test]
    fn test_seed_rejects_malformed_spec() {
        let now = Utc::now();
        let result = seed_schedule(
            "@every never",
            SchedulingType::Regular,
            now,
            DEFAULT_LOOKAHEAD,
            &StandardEvaluator,
        );
        assert!(matches!(result, Err(IteratorError::Recurrence(_))));
    }
}
