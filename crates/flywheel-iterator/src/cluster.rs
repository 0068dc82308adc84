//! Cluster gate and worker activation collaborators.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Read-only view of cluster state consulted before every claim cycle.
///
/// The gate may flip at any time without restarting iterators; a
/// blocked gate pauses claiming, it never tears anything down.
pub trait ClusterGate: Send + Sync {
    /// Whether the fleet is in maintenance mode.
    fn is_maintenance_mode(&self) -> bool;

    /// Whether this node is currently a primary.
    fn is_primary(&self) -> bool;

    /// Whether claiming may proceed this cycle.
    fn allows_claiming(&self) -> bool {
        !self.is_maintenance_mode() && self.is_primary()
    }
}

/// Per-entity-type on/off switch consulted before any iterator
/// resources are allocated.
pub trait WorkerActivation: Send + Sync {
    /// Whether iterators for this entity type should run on this node.
    fn is_active(&self, entity_type: &str) -> bool;
}

/// Atomic-flag gate for embeddings and tests; both flags can flip at
/// runtime.
#[derive(Debug)]
pub struct FlagGate {
    maintenance: AtomicBool,
    primary: AtomicBool,
}

impl FlagGate {
    /// Create a gate that allows claiming: primary, not in maintenance.
    pub fn new() -> Self {
        Self {
            maintenance: AtomicBool::new(false),
            primary: AtomicBool::new(true),
        }
    }

    /// Enter or leave maintenance mode.
    pub fn set_maintenance_mode(&self, maintenance: bool) {
        self.maintenance.store(maintenance, Ordering::SeqCst);
    }

    /// Grant or revoke primary status.
    pub fn set_primary(&self, primary: bool) {
        self.primary.store(primary, Ordering::SeqCst);
    }
}

impl Default for FlagGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterGate for FlagGate {
    fn is_maintenance_mode(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }

    fn is_primary(&self) -> bool {
        self.primary.load(Ordering::SeqCst)
    }
}

/// Fixed activation set: either every entity type, or an allow-list.
#[derive(Debug, Clone)]
pub struct StaticActivation {
    enabled: Option<HashSet<String>>,
}

impl StaticActivation {
    /// Activate every entity type.
    pub fn all() -> Self {
        Self { enabled: None }
    }

    /// Activate only the listed entity types.
    pub fn only<I, S>(entity_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: Some(entity_types.into_iter().map(Into::into).collect()),
        }
    }
}

impl WorkerActivation for StaticActivation {
    fn is_active(&self, entity_type: &str) -> bool {
        match &self.enabled {
            None => true,
            Some(enabled) => enabled.contains(entity_type),
        }
    }
}
