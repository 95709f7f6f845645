//! Record store boundary for recmap.
//!
//! The mapper never talks to a network client directly. Everything it needs
//! from the key-value store goes through the [`RecordStore`] trait: single
//! reads, batched reads, writes, deletes, existence checks and set scans.
//!
//! # Storage Backends
//!
//! - [`InMemoryRecordStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. A missing record is `Ok(None)`, never an error.
//! 2. Batched reads return one slot per requested key, in request order.
//! 3. The store never interprets bin contents.
//! 4. Timeouts and retries belong to the store's policies, not the mapper.
//! 5. All transport errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod policy;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{StoreError, StoreResult};
pub use memory::{CallCounts, InMemoryRecordStore};
pub use policy::{
    BatchPolicy, GenerationPolicy, ReadPolicy, RecordExistsAction, ScanPolicy, WritePolicy,
};
pub use traits::RecordStore;
