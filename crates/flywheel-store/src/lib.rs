//! Persisted schedule contract and claim gateway for Flywheel.
//!
//! This crate defines the boundary between the iterator engine and the
//! store that holds iterable records:
//! - **Schedule**: a named, ascending list of future trigger instants
//!   embedded in a record
//! - **IterableRecord**: the entity contract for anything that can be
//!   iterated
//! - **StoreGateway**: the atomic find-most-due-and-pop claim operation
//! - **MemoryStore**: an in-process reference implementation used by
//!   tests and single-node embeddings

mod error;
mod gateway;
mod memory;
mod record;
mod schedule;

pub use error::StoreError;
pub use gateway::{ClaimOutcome, ClaimedRecord, Shard, StoreGateway};
pub use memory::MemoryStore;
pub use record::IterableRecord;
pub use schedule::{DEFAULT_LOOKAHEAD, Schedule, SchedulingType};
