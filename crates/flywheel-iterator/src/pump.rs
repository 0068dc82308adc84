//! Iterator runtime: fixed-interval sweep.
//!
//! No continuous loop: a fixed-rate timer fires every `interval` and
//! performs one bounded sweep of all due records, dispatching each on
//! the pump's own dedicated permit pool. Used for entity types with
//! low cardinality or frequency, where isolating their cost from the
//! shared claim loop is preferable.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use flywheel_store::{IterableRecord, StoreGateway};

use crate::cluster::ClusterGate;
use crate::config::{IteratorConfig, PumpOptions};
use crate::health::DelayTracker;
use crate::recurrence::RecurrenceEvaluator;
use crate::runtime::{InflightSet, RunState, StateCell, dispatch_and_refresh};

/// Sweep batch bound per tick, as a multiple of the pool size.
const SWEEP_BATCH_FACTOR: usize = 4;

/// PUMP-mode runtime for one `(entity_type, field_name)` iterator.
pub struct PumpRuntime<R: IterableRecord, G: StoreGateway<R>> {
    config: IteratorConfig<R>,
    options: PumpOptions,
    gateway: Arc<G>,
    evaluator: Arc<dyn RecurrenceEvaluator>,
    gate: Arc<dyn ClusterGate>,
    pool: Arc<Semaphore>,
    delay: Arc<DelayTracker>,
    state: Arc<StateCell>,
    inflight: Arc<InflightSet>,
}

impl<R: IterableRecord, G: StoreGateway<R> + 'static> PumpRuntime<R, G> {
    /// Create a pump runtime; nothing fires until [`PumpRuntime::run`].
    pub fn new(
        config: IteratorConfig<R>,
        options: PumpOptions,
        gateway: Arc<G>,
        evaluator: Arc<dyn RecurrenceEvaluator>,
        gate: Arc<dyn ClusterGate>,
    ) -> Self {
        let delay = Arc::new(DelayTracker::new(
            config.entity_type.clone(),
            config.field_name.clone(),
            config.acceptable_no_alert_delay,
            config.maximum_delay_for_check,
        ));
        let pool = Arc::new(Semaphore::new(options.pool_size));
        Self {
            config,
            options,
            gateway,
            evaluator,
            gate,
            pool,
            delay,
            state: Arc::new(StateCell::new()),
            inflight: Arc::new(InflightSet::new()),
        }
    }

    pub(crate) fn pool(&self) -> Arc<Semaphore> {
        Arc::clone(&self.pool)
    }

    pub(crate) fn delay_tracker(&self) -> Arc<DelayTracker> {
        Arc::clone(&self.delay)
    }

    pub(crate) fn state_cell(&self) -> Arc<StateCell> {
        Arc::clone(&self.state)
    }

    /// Fire sweeps at the configured rate until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            pump = %self.options.name,
            entity_type = %self.config.entity_type,
            field = %self.config.field_name,
            interval_ms = self.options.interval.as_millis() as u64,
            pool_size = self.options.pool_size,
            "pump iterator starting"
        );

        let mut ticker = tokio::time::interval(self.options.interval);
        // A stalled sweep must not be followed by a burst of catch-up ticks
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            self.state.set(RunState::Idle);
            if !self.gate.allows_claiming() {
                debug!(pump = %self.options.name, "cluster gate closed, skipping sweep");
                continue;
            }

            self.sweep().await;
        }

        self.state.set(RunState::Stopped);
        info!(pump = %self.options.name, "pump iterator stopped");
    }

    /// One bounded sweep: claim every due record and dispatch each on
    /// the dedicated pool.
    async fn sweep(self: &Arc<Self>) {
        self.state.set(RunState::Claiming);
        let now = Utc::now();
        let limit = self.options.pool_size * SWEEP_BATCH_FACTOR;

        let claimed = match self
            .gateway
            .sweep_due(&self.config.field_name, now, limit)
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(pump = %self.options.name, error = %e, "sweep failed");
                return;
            }
        };

        if claimed.is_empty() {
            return;
        }
        debug!(
            pump = %self.options.name,
            count = claimed.len(),
            "sweep claimed records"
        );

        self.state.set(RunState::Dispatched);
        for item in claimed {
            let permit = match Arc::clone(&self.pool).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            self.delay.observe(now - item.slot);

            let runtime = Arc::clone(self);
            tokio::spawn(async move {
                let id = item.record.id().to_string();
                runtime.inflight.acquire(&id).await;
                dispatch_and_refresh(
                    &runtime.config,
                    runtime.gateway.as_ref(),
                    runtime.evaluator.as_ref(),
                    item,
                    now,
                )
                .await;
                runtime.inflight.release(&id);
                drop(permit);
            });
        }
    }
}
