//! Iterator configuration.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use flywheel_store::{DEFAULT_LOOKAHEAD, SchedulingType};

use crate::error::IteratorError;

/// Type alias for the application-supplied record handler.
///
/// Handlers must tolerate being invoked more than once for the same
/// logical tick: a claim followed by a crash before the refreshed
/// schedule is persisted lets another node reclaim the slot.
pub type RecordHandler<R> =
    Arc<dyn Fn(R) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

/// Wrap an async closure as a [`RecordHandler`].
pub fn record_handler<R, F, Fut>(f: F) -> RecordHandler<R>
where
    F: Fn(R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    Arc::new(move |record| Box::pin(f(record)))
}

/// How non-skip-missed schedules catch up on elapsed slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CatchUpPolicy {
    /// Keep every elapsed slot; the claim loop drains the full backlog
    /// back-to-back.
    ReplayAll,
    /// Keep only the most recent elapsed slot; one catch-up run absorbs
    /// the gap.
    #[default]
    CollapseToOne,
}

/// Immutable configuration for one iterator, built once per entity
/// type and schedule field.
#[derive(Clone)]
pub struct IteratorConfig<R> {
    /// Entity type this iterator serves.
    pub entity_type: String,
    /// Schedule field this iterator advances.
    pub field_name: String,
    /// Nominal spacing between dispatches; also the idle poll interval
    /// when no candidate exists.
    pub target_interval: Duration,
    /// Dispatch delay above which a warning is logged. Observation
    /// only, never enforcement.
    pub acceptable_no_alert_delay: Duration,
    /// Upper bound on any sleep-until-due wait, and the delay level
    /// reported as an error.
    pub maximum_delay_for_check: Duration,
    /// Number of future slots a refreshed schedule carries.
    pub lookahead: usize,
    /// Slot anchoring and missed-slot policy for this field.
    pub scheduling_type: SchedulingType,
    /// Catch-up behavior for non-skip-missed scheduling types.
    pub catch_up: CatchUpPolicy,
    /// Restrict claims to this node's shard and jitter claim cycles.
    pub redistribute: bool,
    /// Maximum concurrently in-flight handler invocations.
    pub concurrency_limit: usize,
    /// Application-supplied work callback.
    pub handler: RecordHandler<R>,
}

impl<R> IteratorConfig<R> {
    /// Create a configuration with platform defaults.
    pub fn new(
        entity_type: impl Into<String>,
        field_name: impl Into<String>,
        scheduling_type: SchedulingType,
        handler: RecordHandler<R>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            field_name: field_name.into(),
            target_interval: Duration::from_secs(60),
            acceptable_no_alert_delay: Duration::from_secs(120),
            maximum_delay_for_check: Duration::from_secs(600),
            lookahead: DEFAULT_LOOKAHEAD,
            scheduling_type,
            catch_up: CatchUpPolicy::default(),
            redistribute: false,
            concurrency_limit: 4,
            handler,
        }
    }

    /// Set the nominal dispatch spacing.
    pub fn with_target_interval(mut self, interval: Duration) -> Self {
        self.target_interval = interval;
        self
    }

    /// Set the warning threshold for dispatch delay.
    pub fn with_acceptable_no_alert_delay(mut self, delay: Duration) -> Self {
        self.acceptable_no_alert_delay = delay;
        self
    }

    /// Set the cap on sleep-until-due waits.
    pub fn with_maximum_delay_for_check(mut self, delay: Duration) -> Self {
        self.maximum_delay_for_check = delay;
        self
    }

    /// Set the schedule lookahead.
    pub fn with_lookahead(mut self, lookahead: usize) -> Self {
        self.lookahead = lookahead;
        self
    }

    /// Set the catch-up policy for non-skip-missed types.
    pub fn with_catch_up(mut self, catch_up: CatchUpPolicy) -> Self {
        self.catch_up = catch_up;
        self
    }

    /// Enable or disable cluster redistribution.
    pub fn with_redistribution(mut self, redistribute: bool) -> Self {
        self.redistribute = redistribute;
        self
    }

    /// Set the in-flight handler limit.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Reject invalid configurations before any resource is allocated.
    pub fn validate(&self) -> Result<(), IteratorError> {
        if self.entity_type.is_empty() {
            return Err(IteratorError::InvalidConfig(
                "entity_type must not be empty".to_string(),
            ));
        }
        if self.field_name.is_empty() {
            return Err(IteratorError::InvalidConfig(
                "field_name must not be empty".to_string(),
            ));
        }
        if self.lookahead == 0 {
            return Err(IteratorError::InvalidConfig(
                "lookahead must be at least 1".to_string(),
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(IteratorError::InvalidConfig(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.target_interval.is_zero() {
            return Err(IteratorError::InvalidConfig(
                "target_interval must be positive".to_string(),
            ));
        }
        if self.maximum_delay_for_check.is_zero() {
            return Err(IteratorError::InvalidConfig(
                "maximum_delay_for_check must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Dedicated-pool options for a pump iterator.
#[derive(Debug, Clone)]
pub struct PumpOptions {
    /// Pool name, used in logs.
    pub name: String,
    /// Sweep firing interval.
    pub interval: Duration,
    /// Permits in the dedicated dispatch pool.
    pub pool_size: usize,
}

impl PumpOptions {
    /// Create pump options.
    pub fn new(name: impl Into<String>, interval: Duration, pool_size: usize) -> Self {
        Self {
            name: name.into(),
            interval,
            pool_size,
        }
    }

    /// Reject invalid pump options.
    pub fn validate(&self) -> Result<(), IteratorError> {
        if self.name.is_empty() {
            return Err(IteratorError::InvalidConfig(
                "pump name must not be empty".to_string(),
            ));
        }
        if self.interval.is_zero() {
            return Err(IteratorError::InvalidConfig(
                "pump interval must be positive".to_string(),
            ));
        }
        if self.pool_size == 0 {
            return Err(IteratorError::InvalidConfig(
                "pump pool_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
