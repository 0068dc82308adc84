//! Recurring-work iterator engine for Flywheel.
//!
//! Turns persisted records that carry schedules into self-driving
//! periodic jobs, identically on every node of a fleet:
//! - Finds the next due record through an atomic claim against the
//!   store gateway
//! - Dispatches application-supplied handlers under a concurrency
//!   limit
//! - Recomputes and persists each record's future schedule
//!
//! Two execution strategies: a continuous claim loop on the shared
//! pool ([`IteratorRuntime`]) and a fixed-interval sweep on a
//! dedicated pool ([`PumpRuntime`]). Iterators are built through
//! [`IteratorFactory`], which consults the per-entity-type activation
//! gate before allocating anything.
//!
//! Delivery is at-least-once: handlers must tolerate duplicate
//! invocations for the same logical tick.

mod cluster;
mod config;
mod error;
mod factory;
mod health;
mod pump;
mod recalc;
mod recurrence;
mod redistribute;
mod runtime;
mod seed;

pub use cluster::{ClusterGate, FlagGate, StaticActivation, WorkerActivation};
pub use config::{CatchUpPolicy, IteratorConfig, PumpOptions, RecordHandler, record_handler};
pub use error::IteratorError;
pub use factory::{IteratorFactory, IteratorHandle};
pub use health::{DelaySnapshot, DelayTracker};
pub use pump::PumpRuntime;
pub use recalc::recalculate;
pub use recurrence::{RecurrenceError, RecurrenceEvaluator, StandardEvaluator};
pub use redistribute::Redistributor;
pub use runtime::{IteratorRuntime, RunState};
pub use seed::seed_schedule;
