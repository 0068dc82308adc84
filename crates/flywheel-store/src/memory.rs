//! In-memory store gateway.
//!
//! Reference implementation used by tests and single-node embeddings.
//! One mutex around the whole record map is what makes the
//! find-earliest-and-pop claim atomic in-process: a claim holds the
//! lock from candidate selection through the slot pop, so concurrent
//! claimers observe either the pre-pop or post-pop state, never an
//! intermediate one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{ClaimOutcome, ClaimedRecord, IterableRecord, Schedule, Shard, StoreError, StoreGateway};

/// Mutex-guarded map of records keyed by id.
pub struct MemoryStore<R> {
    records: Mutex<HashMap<String, R>>,
    unavailable: AtomicBool,
}

impl<R: IterableRecord> MemoryStore<R> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Insert or replace a record.
    pub async fn insert(&self, record: R) {
        let mut records = self.records.lock().await;
        records.insert(record.id().to_string(), record);
    }

    /// Fetch a record by id.
    pub async fn get(&self, id: &str) -> Option<R> {
        let records = self.records.lock().await;
        records.get(id).cloned()
    }

    /// Remove a record by id.
    pub async fn remove(&self, id: &str) -> Option<R> {
        let mut records = self.records.lock().await;
        records.remove(id)
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Simulate backend unavailability; subsequent gateway calls fail
    /// with `StoreError::Unavailable` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

impl<R: IterableRecord> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: IterableRecord> StoreGateway<R> for MemoryStore<R> {
    async fn claim_due(
        &self,
        field_name: &str,
        now: DateTime<Utc>,
        shard: Option<&Shard>,
    ) -> Result<ClaimOutcome<R>, StoreError> {
        self.check_available()?;
        let mut records = self.records.lock().await;

        let mut best: Option<(String, DateTime<Utc>)> = None;
        for (id, record) in records.iter() {
            if let Some(shard) = shard
                && !shard.covers(id)
            {
                continue;
            }
            let Some(schedule) = record.schedule(field_name) else {
                continue;
            };
            let Some(first) = schedule.next_slot() else {
                continue;
            };
            if best.as_ref().is_none_or(|(_, b)| first < *b) {
                best = Some((id.clone(), first));
            }
        }

        let Some((id, first)) = best else {
            return Ok(ClaimOutcome::Empty);
        };
        if first > now {
            return Ok(ClaimOutcome::NotDue { next: first });
        }

        let record = records
            .get_mut(&id)
            .ok_or_else(|| StoreError::RecordNotFound(id.clone()))?;
        let schedule = record
            .schedule_mut(field_name)
            .ok_or_else(|| StoreError::UnknownField {
                id: id.clone(),
                field: field_name.to_string(),
            })?;
        let slot = schedule.slots.remove(0);
        debug!(record = %id, field = %field_name, slot = %slot, "claimed due slot");

        Ok(ClaimOutcome::Claimed(ClaimedRecord {
            record: record.clone(),
            slot,
        }))
    }

    async fn sweep_due(
        &self,
        field_name: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ClaimedRecord<R>>, StoreError> {
        self.check_available()?;
        let mut records = self.records.lock().await;

        let due_ids: Vec<String> = records
            .iter()
            .filter(|(_, record)| {
                record
                    .schedule(field_name)
                    .and_then(Schedule::next_slot)
                    .is_some_and(|first| first <= now)
            })
            .map(|(id, _)| id.clone())
            .take(limit)
            .collect();

        let mut claimed = Vec::with_capacity(due_ids.len());
        for id in due_ids {
            let record = records
                .get_mut(&id)
                .ok_or_else(|| StoreError::RecordNotFound(id.clone()))?;
            let schedule = record
                .schedule_mut(field_name)
                .ok_or_else(|| StoreError::UnknownField {
                    id: id.clone(),
                    field: field_name.to_string(),
                })?;
            let slot = schedule.slots.remove(0);
            claimed.push(ClaimedRecord {
                record: record.clone(),
                slot,
            });
        }

        Ok(claimed)
    }

    async fn persist_schedule(
        &self,
        id: &str,
        field_name: &str,
        slots: Vec<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        if !Schedule::slots_are_ordered(&slots) {
            return Err(StoreError::InvalidSlots(id.to_string()));
        }

        let mut records = self.records.lock().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;
        let schedule = record
            .schedule_mut(field_name)
            .ok_or_else(|| StoreError::UnknownField {
                id: id.to_string(),
                field: field_name.to_string(),
            })?;
        schedule.slots = slots;
        Ok(())
    }
}
