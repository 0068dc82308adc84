//! Iterator runtime: the continuous claim loop.
//!
//! Cycle: check the cluster gate, atomically claim the most-due record,
//! dispatch its handler under the concurrency semaphore, then refresh
//! and persist the record's schedule. Every sleep races the shutdown
//! signal so stop requests take effect at the next loop head.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use flywheel_store::{ClaimOutcome, ClaimedRecord, IterableRecord, StoreGateway};

use crate::cluster::ClusterGate;
use crate::config::IteratorConfig;
use crate::health::DelayTracker;
use crate::recalc::recalculate;
use crate::recurrence::RecurrenceEvaluator;
use crate::redistribute::Redistributor;

/// Backoff while the cluster gate blocks claiming.
const GATE_BACKOFF: Duration = Duration::from_secs(1);

/// Base delay after a store failure; doubles per consecutive failure.
const STORE_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Cap on the store-failure backoff.
const STORE_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Floor for any timed wait, so a near-zero sleep cannot spin the loop.
const MIN_SLEEP: Duration = Duration::from_millis(10);

/// Poll interval while waiting for a record's previous dispatch.
const INFLIGHT_POLL: Duration = Duration::from_millis(10);

/// Lifecycle state of a running iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    /// Waiting between cycles or blocked by the cluster gate.
    Idle = 0,
    /// Asking the gateway for the most-due record.
    Claiming = 1,
    /// Handler work is in flight.
    Dispatched = 2,
    /// The loop has exited.
    Stopped = 3,
}

impl From<u8> for RunState {
    fn from(v: u8) -> Self {
        match v {
            1 => RunState::Claiming,
            2 => RunState::Dispatched,
            3 => RunState::Stopped,
            _ => RunState::Idle,
        }
    }
}

/// Shared state cell so handles can observe the loop state.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(RunState::Idle as u8))
    }

    pub(crate) fn set(&self, state: RunState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn get(&self) -> RunState {
        self.0.load(Ordering::SeqCst).into()
    }
}

/// Record ids with a dispatch currently in flight in this process.
///
/// A claim can surface a second elapsed slot for a record whose
/// previous dispatch has not finished (catch-up backlogs); claimers
/// park here until the earlier invocation completes, so one record
/// never runs its handler concurrently with itself.
#[derive(Debug, Default)]
pub(crate) struct InflightSet {
    ids: Mutex<HashSet<String>>,
}

impl InflightSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn try_insert(&self, id: &str) -> bool {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        ids.insert(id.to_string())
    }

    /// Wait until `id` has no dispatch in flight, then mark it.
    pub(crate) async fn acquire(&self, id: &str) {
        while !self.try_insert(id) {
            sleep(INFLIGHT_POLL).await;
        }
    }

    /// Clear `id` after its dispatch completed.
    pub(crate) fn release(&self, id: &str) {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        ids.remove(id);
    }
}

/// LOOP-mode runtime for one `(entity_type, field_name)` iterator.
pub struct IteratorRuntime<R: IterableRecord, G: StoreGateway<R>> {
    config: IteratorConfig<R>,
    gateway: Arc<G>,
    evaluator: Arc<dyn RecurrenceEvaluator>,
    gate: Arc<dyn ClusterGate>,
    semaphore: Arc<Semaphore>,
    redistributor: Option<Redistributor>,
    delay: Arc<DelayTracker>,
    state: Arc<StateCell>,
    inflight: Arc<InflightSet>,
}

impl<R: IterableRecord, G: StoreGateway<R> + 'static> IteratorRuntime<R, G> {
    /// Create a runtime; nothing runs until [`IteratorRuntime::run`].
    pub fn new(
        config: IteratorConfig<R>,
        gateway: Arc<G>,
        evaluator: Arc<dyn RecurrenceEvaluator>,
        gate: Arc<dyn ClusterGate>,
        redistributor: Option<Redistributor>,
    ) -> Self {
        let delay = Arc::new(DelayTracker::new(
            config.entity_type.clone(),
            config.field_name.clone(),
            config.acceptable_no_alert_delay,
            config.maximum_delay_for_check,
        ));
        let semaphore = Arc::new(Semaphore::new(config.concurrency_limit));
        Self {
            config,
            gateway,
            evaluator,
            gate,
            semaphore,
            redistributor,
            delay,
            state: Arc::new(StateCell::new()),
            inflight: Arc::new(InflightSet::new()),
        }
    }

    pub(crate) fn semaphore(&self) -> Arc<Semaphore> {
        Arc::clone(&self.semaphore)
    }

    pub(crate) fn delay_tracker(&self) -> Arc<DelayTracker> {
        Arc::clone(&self.delay)
    }

    pub(crate) fn state_cell(&self) -> Arc<StateCell> {
        Arc::clone(&self.state)
    }

    /// Run the claim loop until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            entity_type = %self.config.entity_type,
            field = %self.config.field_name,
            "iterator loop starting"
        );

        let mut store_failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.state.set(RunState::Idle);
            if !self.gate.allows_claiming() {
                debug!(
                    entity_type = %self.config.entity_type,
                    field = %self.config.field_name,
                    "cluster gate closed, staying idle"
                );
                if sleep_or_shutdown(GATE_BACKOFF, &mut shutdown).await {
                    break;
                }
                continue;
            }

            if let Some(redistributor) = &self.redistributor {
                let jitter = redistributor.claim_jitter();
                if !jitter.is_zero() && sleep_or_shutdown(jitter, &mut shutdown).await {
                    break;
                }
            }

            self.state.set(RunState::Claiming);
            let now = Utc::now();
            let shard = self.redistributor.as_ref().map(Redistributor::shard);
            let claimed = match self
                .gateway
                .claim_due(&self.config.field_name, now, shard)
                .await
            {
                Err(e) => {
                    store_failures += 1;
                    let backoff = store_backoff(store_failures);
                    warn!(
                        entity_type = %self.config.entity_type,
                        field = %self.config.field_name,
                        error = %e,
                        failures = store_failures,
                        backoff_ms = backoff.as_millis() as u64,
                        "claim failed, backing off"
                    );
                    if sleep_or_shutdown(backoff, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
                Ok(ClaimOutcome::Empty) => {
                    store_failures = 0;
                    if sleep_or_shutdown(self.idle_interval(), &mut shutdown).await {
                        break;
                    }
                    continue;
                }
                Ok(ClaimOutcome::NotDue { next }) => {
                    store_failures = 0;
                    let wait = (next - now)
                        .to_std()
                        .unwrap_or(Duration::ZERO)
                        .min(self.config.maximum_delay_for_check)
                        .max(MIN_SLEEP);
                    if sleep_or_shutdown(wait, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
                Ok(ClaimOutcome::Claimed(claimed)) => {
                    store_failures = 0;
                    claimed
                }
            };

            self.state.set(RunState::Dispatched);
            // Acquire before spawning: a saturated limit stalls the loop
            // here, so no further claims happen until a permit frees.
            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            self.delay.observe(now - claimed.slot);

            let runtime = Arc::clone(&self);
            tokio::spawn(async move {
                let id = claimed.record.id().to_string();
                runtime.inflight.acquire(&id).await;
                dispatch_and_refresh(
                    &runtime.config,
                    runtime.gateway.as_ref(),
                    runtime.evaluator.as_ref(),
                    claimed,
                    now,
                )
                .await;
                runtime.inflight.release(&id);
                drop(permit);
            });
        }

        self.state.set(RunState::Stopped);
        info!(
            entity_type = %self.config.entity_type,
            field = %self.config.field_name,
            "iterator loop stopped"
        );
    }

    /// Poll interval when the store has no candidate at all.
    fn idle_interval(&self) -> Duration {
        self.config
            .target_interval
            .min(self.config.maximum_delay_for_check)
            .max(MIN_SLEEP)
    }
}

/// Run the handler for a claimed record, then recalculate and persist
/// its schedule. Handler failures are swallowed: the tick is consumed
/// and the next slot is the retry.
pub(crate) async fn dispatch_and_refresh<R, G>(
    config: &IteratorConfig<R>,
    gateway: &G,
    evaluator: &dyn RecurrenceEvaluator,
    claimed: ClaimedRecord<R>,
    claim_time: DateTime<Utc>,
) where
    R: IterableRecord,
    G: StoreGateway<R>,
{
    let ClaimedRecord { record, slot } = claimed;
    debug!(
        record = %record.id(),
        field = %config.field_name,
        slot = %slot,
        "dispatching handler"
    );

    if let Err(e) = (config.handler)(record.clone()).await {
        error!(
            record = %record.id(),
            field = %config.field_name,
            error = %e,
            "handler failed"
        );
    }

    // Regular types measure against the grid at claim time; irregular
    // types drift with actual completion.
    let checkpoint = if config.scheduling_type.is_irregular() {
        Utc::now()
    } else {
        claim_time
    };

    let Some(schedule) = record.schedule(&config.field_name) else {
        warn!(
            record = %record.id(),
            field = %config.field_name,
            "claimed record lost its schedule field"
        );
        return;
    };

    let slots = match recalculate(
        &schedule.slots,
        checkpoint,
        config.scheduling_type,
        config.catch_up,
        &schedule.recurrence_spec,
        config.lookahead,
        evaluator,
    ) {
        Ok(slots) => slots,
        Err(e) => {
            error!(
                record = %record.id(),
                field = %config.field_name,
                spec = %schedule.recurrence_spec,
                error = %e,
                "schedule recalculation failed"
            );
            return;
        }
    };

    if let Err(e) = gateway
        .persist_schedule(record.id(), &config.field_name, slots)
        .await
    {
        error!(
            record = %record.id(),
            field = %config.field_name,
            error = %e,
            "failed to persist refreshed schedule"
        );
    }
}

/// Sleep for `duration`, returning true when shutdown was signalled
/// (or the shutdown channel closed) during the wait.
pub(crate) async fn sleep_or_shutdown(
    duration: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        _ = sleep(duration) => false,
    }
}

/// Capped exponential backoff after consecutive store failures.
fn store_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(6);
    (STORE_BACKOFF_BASE * 2u32.pow(exponent)).min(STORE_BACKOFF_MAX)
}
