use std::collections::BTreeMap;

use recmap_types::{Key, Record, Value};

use crate::error::StoreResult;
use crate::policy::{BatchPolicy, ReadPolicy, ScanPolicy, WritePolicy};

/// Client interface to the key-value store.
///
/// All implementations must satisfy these invariants:
/// - A record that does not exist is reported as `Ok(None)`.
/// - `batch_get` returns exactly one slot per requested key, in order.
/// - Timeouts, retries and connection management are governed by the
///   policies passed in, never by the caller.
/// - The store never interprets bin contents.
pub trait RecordStore: Send + Sync {
    /// Read one record.
    ///
    /// Returns `Ok(None)` if the record does not exist.
    fn get(&self, policy: &ReadPolicy, key: &Key) -> StoreResult<Option<Record>>;

    /// Read many records in one round-trip.
    ///
    /// Default implementation calls `get()` for each key. Backends should
    /// override with a real batched read.
    fn batch_get(&self, policy: &BatchPolicy, keys: &[Key]) -> StoreResult<Vec<Option<Record>>> {
        let read = ReadPolicy {
            total_timeout_ms: policy.total_timeout_ms,
        };
        keys.iter().map(|key| self.get(&read, key)).collect()
    }

    /// Write bins to a record, creating it if needed.
    fn put(
        &self,
        policy: &WritePolicy,
        key: &Key,
        bins: &BTreeMap<String, Value>,
    ) -> StoreResult<()>;

    /// Delete a record. Returns `true` if the record existed.
    fn delete(&self, policy: &WritePolicy, key: &Key) -> StoreResult<bool>;

    /// Check whether a record exists.
    fn exists(&self, policy: &ReadPolicy, key: &Key) -> StoreResult<bool> {
        Ok(self.get(policy, key)?.is_some())
    }

    /// Read every record of a set.
    fn scan(
        &self,
        policy: &ScanPolicy,
        namespace: &str,
        set_name: &str,
    ) -> StoreResult<Vec<(Key, Record)>>;
}
