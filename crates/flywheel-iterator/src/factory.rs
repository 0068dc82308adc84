//! Activation-gated iterator construction.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use flywheel_store::{IterableRecord, StoreGateway};

use crate::cluster::{ClusterGate, WorkerActivation};
use crate::config::{IteratorConfig, PumpOptions};
use crate::error::IteratorError;
use crate::health::{DelaySnapshot, DelayTracker};
use crate::pump::PumpRuntime;
use crate::recurrence::RecurrenceEvaluator;
use crate::redistribute::Redistributor;
use crate::runtime::{IteratorRuntime, RunState, StateCell};

type Registry = Arc<Mutex<HashSet<(String, String)>>>;

fn registry_lock(registry: &Registry) -> MutexGuard<'_, HashSet<(String, String)>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds and starts iterators, holding the dependencies every
/// iterator shares: the store gateway, the recurrence evaluator, the
/// cluster gate, the activation switch, and this node's position in
/// the fleet.
pub struct IteratorFactory<G> {
    gateway: Arc<G>,
    evaluator: Arc<dyn RecurrenceEvaluator>,
    gate: Arc<dyn ClusterGate>,
    activation: Arc<dyn WorkerActivation>,
    node_index: u32,
    fleet_size: u32,
    running: Registry,
}

impl<G> IteratorFactory<G> {
    /// Create a factory for a single-node fleet.
    pub fn new(
        gateway: Arc<G>,
        evaluator: Arc<dyn RecurrenceEvaluator>,
        gate: Arc<dyn ClusterGate>,
        activation: Arc<dyn WorkerActivation>,
    ) -> Self {
        Self {
            gateway,
            evaluator,
            gate,
            activation,
            node_index: 0,
            fleet_size: 1,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Set this node's position in the fleet, used when a config
    /// enables redistribution.
    pub fn with_topology(mut self, node_index: u32, fleet_size: u32) -> Self {
        self.node_index = node_index;
        self.fleet_size = fleet_size;
        self
    }

    /// Reserve the `(entity_type, field_name)` slot, or refuse when an
    /// iterator already runs for it.
    fn reserve(&self, entity_type: &str, field_name: &str) -> Result<(), IteratorError> {
        let key = (entity_type.to_string(), field_name.to_string());
        let mut running = registry_lock(&self.running);
        if !running.insert(key) {
            return Err(IteratorError::AlreadyRunning {
                entity_type: entity_type.to_string(),
                field: field_name.to_string(),
            });
        }
        Ok(())
    }

    /// Start a LOOP-mode iterator for `config`.
    ///
    /// Returns `Ok(None)` without allocating anything when the worker
    /// activation reports the entity type inactive; calling again later
    /// is safe and idempotent. At most one iterator runs per
    /// `(entity_type, field_name)` in this process.
    pub fn create_iterator<R>(
        &self,
        config: IteratorConfig<R>,
    ) -> Result<Option<IteratorHandle>, IteratorError>
    where
        R: IterableRecord,
        G: StoreGateway<R> + 'static,
    {
        config.validate()?;

        if !self.activation.is_active(&config.entity_type) {
            debug!(
                entity_type = %config.entity_type,
                field = %config.field_name,
                "worker inactive, iterator not started"
            );
            return Ok(None);
        }

        self.reserve(&config.entity_type, &config.field_name)?;

        let entity_type = config.entity_type.clone();
        let field_name = config.field_name.clone();
        let permits = config.concurrency_limit as u32;
        let redistributor = config
            .redistribute
            .then(|| Redistributor::new(self.node_index, self.fleet_size));

        let runtime = Arc::new(IteratorRuntime::new(
            config,
            Arc::clone(&self.gateway),
            Arc::clone(&self.evaluator),
            Arc::clone(&self.gate),
            redistributor,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let semaphore = runtime.semaphore();
        let delay = runtime.delay_tracker();
        let state = runtime.state_cell();
        let join = tokio::spawn(Arc::clone(&runtime).run(shutdown_rx));

        Ok(Some(IteratorHandle {
            entity_type,
            field_name,
            shutdown: shutdown_tx,
            join: Some(join),
            semaphore,
            permits,
            delay,
            state,
            registry: Arc::clone(&self.running),
        }))
    }

    /// Start a PUMP-mode iterator for `config` on its own dedicated
    /// pool described by `options`. Gating and the single-instance
    /// guarantee are identical to [`IteratorFactory::create_iterator`].
    pub fn create_pump_iterator<R>(
        &self,
        options: PumpOptions,
        config: IteratorConfig<R>,
    ) -> Result<Option<IteratorHandle>, IteratorError>
    where
        R: IterableRecord,
        G: StoreGateway<R> + 'static,
    {
        config.validate()?;
        options.validate()?;

        if !self.activation.is_active(&config.entity_type) {
            debug!(
                entity_type = %config.entity_type,
                field = %config.field_name,
                pump = %options.name,
                "worker inactive, pump iterator not started"
            );
            return Ok(None);
        }

        self.reserve(&config.entity_type, &config.field_name)?;

        let entity_type = config.entity_type.clone();
        let field_name = config.field_name.clone();
        let permits = options.pool_size as u32;

        let runtime = Arc::new(PumpRuntime::new(
            config,
            options,
            Arc::clone(&self.gateway),
            Arc::clone(&self.evaluator),
            Arc::clone(&self.gate),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let semaphore = runtime.pool();
        let delay = runtime.delay_tracker();
        let state = runtime.state_cell();
        let join = tokio::spawn(Arc::clone(&runtime).run(shutdown_rx));

        Ok(Some(IteratorHandle {
            entity_type,
            field_name,
            shutdown: shutdown_tx,
            join: Some(join),
            semaphore,
            permits,
            delay,
            state,
            registry: Arc::clone(&self.running),
        }))
    }
}

/// Handle to one running iterator.
///
/// Dropping the handle signals shutdown and frees the iterator's
/// registry slot; [`IteratorHandle::stop`] additionally waits for the
/// loop to exit and for in-flight dispatches to finish.
pub struct IteratorHandle {
    entity_type: String,
    field_name: String,
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    semaphore: Arc<Semaphore>,
    permits: u32,
    delay: Arc<DelayTracker>,
    state: Arc<StateCell>,
    registry: Registry,
}

impl IteratorHandle {
    /// Entity type this iterator serves.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Schedule field this iterator advances.
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Current loop state.
    pub fn state(&self) -> RunState {
        self.state.get()
    }

    /// Dispatch-delay statistics.
    pub fn delay_snapshot(&self) -> DelaySnapshot {
        self.delay.snapshot()
    }

    /// Stop the iterator: no new claims start, in-flight dispatches
    /// run to completion before this returns.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);

        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(
                    entity_type = %self.entity_type,
                    field = %self.field_name,
                    error = %e,
                    "iterator task failed during shutdown"
                );
            }
        }

        // Holding every permit means no dispatch is still in flight
        if let Ok(drained) = self.semaphore.acquire_many(self.permits).await {
            drop(drained);
        }
    }
}

impl Drop for IteratorHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        let mut running = registry_lock(&self.registry);
        running.remove(&(self.entity_type.clone(), self.field_name.clone()));
    }
}
