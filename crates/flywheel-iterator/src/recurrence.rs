//! Recurrence evaluation.
//!
//! The engine treats recurrence expressions as opaque strings and asks
//! an evaluator for the next fire time. `StandardEvaluator` covers the
//! two spec families used across the platform:
//! - `@every <dur>`: fixed interval from the anchor ("@every 30s",
//!   "@every 15m", "@every 1h")
//! - 5-field cron subset: minute and hour fields with `*`, `*/n`,
//!   lists and plain values; the remaining fields must be `*`

use chrono::{DateTime, Duration, Timelike, Utc};
use thiserror::Error;

/// Errors from recurrence evaluation.
#[derive(Debug, Error)]
pub enum RecurrenceError {
    /// The spec string cannot be parsed.
    #[error("malformed recurrence spec {spec:?}: {reason}")]
    Malformed {
        /// The offending spec.
        spec: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The evaluator cannot produce a next instant.
    #[error("recurrence spec {0:?} produces no further fire times")]
    Exhausted(String),
}

/// Pure next-fire-time evaluation over an opaque recurrence spec.
pub trait RecurrenceEvaluator: Send + Sync {
    /// Next instant strictly after `after`.
    fn next_fire_time(
        &self,
        spec: &str,
        after: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, RecurrenceError>;

    /// Fail fast on a malformed spec without needing a real anchor.
    fn validate(&self, spec: &str) -> Result<(), RecurrenceError> {
        self.next_fire_time(spec, DateTime::UNIX_EPOCH).map(|_| ())
    }
}

/// Evaluator for `@every <dur>` intervals and the cron subset.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardEvaluator;

impl RecurrenceEvaluator for StandardEvaluator {
    fn next_fire_time(
        &self,
        spec: &str,
        after: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, RecurrenceError> {
        if let Some(dur) = spec.strip_prefix("@every ") {
            let interval = parse_duration(spec, dur.trim())?;
            return Ok(after + interval);
        }
        next_cron_fire(spec, after)
    }
}

/// Parse a duration string like "500ms", "90s", "15m", "2h" or "1d".
fn parse_duration(spec: &str, dur: &str) -> Result<Duration, RecurrenceError> {
    let malformed = |reason: &str| RecurrenceError::Malformed {
        spec: spec.to_string(),
        reason: reason.to_string(),
    };

    let (value, unit) = match dur.find(|c: char| !c.is_ascii_digit() && c != '-') {
        Some(split) => dur.split_at(split),
        None => return Err(malformed("expected <number><ms|s|m|h|d>")),
    };
    let value: i64 = value
        .parse()
        .map_err(|_| malformed("duration value is not a number"))?;
    if value <= 0 {
        return Err(malformed("duration must be positive"));
    }
    match unit {
        "ms" => Ok(Duration::milliseconds(value)),
        "s" => Ok(Duration::seconds(value)),
        "m" => Ok(Duration::minutes(value)),
        "h" => Ok(Duration::hours(value)),
        "d" => Ok(Duration::days(value)),
        _ => Err(malformed("unknown duration unit, expected ms, s, m, h or d")),
    }
}

/// Compute the next fire time for a 5-field cron expression.
///
/// Walks forward minute by minute from `after`, bounded at 48 hours;
/// with only minute/hour constraints a match always exists inside that
/// window.
fn next_cron_fire(spec: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, RecurrenceError> {
    let malformed = |reason: String| RecurrenceError::Malformed {
        spec: spec.to_string(),
        reason,
    };

    let fields: Vec<&str> = spec.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(malformed(format!(
            "expected 5 fields (minute hour dom month dow), got {}",
            fields.len()
        )));
    }

    let minutes = parse_cron_field(spec, fields[0], 0, 59)?;
    let hours = parse_cron_field(spec, fields[1], 0, 23)?;
    for (name, field) in [("dom", fields[2]), ("month", fields[3]), ("dow", fields[4])] {
        if field != "*" {
            return Err(malformed(format!("only * is supported in the {name} field")));
        }
    }

    let mut candidate = (after + Duration::minutes(1))
        .with_second(0)
        .and_then(|c| c.with_nanosecond(0))
        .unwrap_or(after + Duration::minutes(1));

    for _ in 0..(48 * 60) {
        if minutes.contains(&candidate.minute()) && hours.contains(&candidate.hour()) {
            return Ok(candidate);
        }
        candidate += Duration::minutes(1);
    }

    Err(RecurrenceError::Exhausted(spec.to_string()))
}

/// Parse one cron field into the set of matching values.
fn parse_cron_field(
    spec: &str,
    field: &str,
    min: u32,
    max: u32,
) -> Result<Vec<u32>, RecurrenceError> {
    let malformed = |reason: String| RecurrenceError::Malformed {
        spec: spec.to_string(),
        reason,
    };

    if field == "*" {
        return Ok((min..=max).collect());
    }
    if let Some(step) = field.strip_prefix("*/") {
        let step: u32 = step
            .parse()
            .map_err(|_| malformed(format!("bad step in field {field:?}")))?;
        if step == 0 {
            return Err(malformed("step must be positive".to_string()));
        }
        return Ok((min..=max).step_by(step as usize).collect());
    }

    let mut values = Vec::new();
    for part in field.split(',') {
        let value: u32 = part
            .parse()
            .map_err(|_| malformed(format!("bad value {part:?} in field {field:?}")))?;
        if value < min || value > max {
            return Err(malformed(format!(
                "value {value} out of range {min}..={max}"
            )));
        }
        values.push(value);
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}
