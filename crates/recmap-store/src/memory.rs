use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;
use recmap_types::{Digest, Key, Record, Value};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::policy::{
    BatchPolicy, GenerationPolicy, ReadPolicy, RecordExistsAction, ScanPolicy, WritePolicy,
};
use crate::traits::RecordStore;

/// In-memory, HashMap-based record store.
///
/// Intended for tests and embedding. Records are held behind a `RwLock` and
/// cloned on read/write. The store counts the calls it serves so tests can
/// assert on round-trip behaviour, and can be switched into an unavailable
/// state to exercise transport failures.
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<(String, Digest), StoredRecord>>,
    unavailable: AtomicBool,
    get_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    put_calls: AtomicUsize,
}

#[derive(Clone)]
struct StoredRecord {
    key: Key,
    record: Record,
}

/// Snapshot of the calls an [`InMemoryRecordStore`] has served.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub gets: usize,
    pub batch_gets: usize,
    pub puts: usize,
}

impl InMemoryRecordStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            get_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
        }
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Remove all records from the store.
    pub fn clear(&self) {
        self.records.write().clear();
    }

    /// Calls served since creation or the last [`reset_counts`](Self::reset_counts).
    pub fn call_counts(&self) -> CallCounts {
        CallCounts {
            gets: self.get_calls.load(Ordering::SeqCst),
            batch_gets: self.batch_calls.load(Ordering::SeqCst),
            puts: self.put_calls.load(Ordering::SeqCst),
        }
    }

    /// Zero every call counter.
    pub fn reset_counts(&self) {
        self.get_calls.store(0, Ordering::SeqCst);
        self.batch_calls.store(0, Ordering::SeqCst);
        self.put_calls.store(0, Ordering::SeqCst);
    }

    /// Make every subsequent operation fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// The stored key of a record, including the user key if it was sent.
    pub fn stored_key(&self, key: &Key) -> Option<Key> {
        self.records
            .read()
            .get(&slot(key))
            .map(|stored| stored.key.clone())
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".into()));
        }
        Ok(())
    }

    fn read_one(&self, key: &Key) -> Option<Record> {
        self.records
            .read()
            .get(&slot(key))
            .map(|stored| stored.record.clone())
    }
}

fn slot(key: &Key) -> (String, Digest) {
    (key.namespace.clone(), key.digest)
}

fn validate_key(key: &Key) -> StoreResult<()> {
    if key.namespace.is_empty() {
        return Err(StoreError::InvalidKey {
            key: key.clone(),
            reason: "empty namespace".into(),
        });
    }
    Ok(())
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn get(&self, _policy: &ReadPolicy, key: &Key) -> StoreResult<Option<Record>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        validate_key(key)?;
        Ok(self.read_one(key))
    }

    fn batch_get(&self, _policy: &BatchPolicy, keys: &[Key]) -> StoreResult<Vec<Option<Record>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        for key in keys {
            validate_key(key)?;
        }
        debug!(keys = keys.len(), "batch get");
        Ok(keys.iter().map(|key| self.read_one(key)).collect())
    }

    fn put(
        &self,
        policy: &WritePolicy,
        key: &Key,
        bins: &BTreeMap<String, Value>,
    ) -> StoreResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        validate_key(key)?;

        let mut map = self.records.write();
        let existing = map.get(&slot(key));
        let current_generation = existing.map(|s| s.record.generation).unwrap_or(0);

        if existing.is_some() && policy.record_exists_action == RecordExistsAction::CreateOnly {
            return Err(StoreError::RecordExists(key.clone()));
        }
        if policy.generation_policy == GenerationPolicy::ExpectGenEqual
            && policy.generation != current_generation
        {
            return Err(StoreError::GenerationMismatch {
                key: key.clone(),
                expected: policy.generation,
                actual: current_generation,
            });
        }

        let mut merged = match (existing, policy.record_exists_action) {
            (Some(stored), RecordExistsAction::Update) => stored.record.bins.clone(),
            _ => BTreeMap::new(),
        };
        for (name, value) in bins {
            // Writing nil removes the bin.
            if value.is_nil() {
                merged.remove(name);
            } else {
                merged.insert(name.clone(), value.clone());
            }
        }

        let mut stored_key = key.clone();
        if !policy.send_key {
            stored_key.user_key = None;
        }
        let record = Record {
            bins: merged,
            generation: current_generation + 1,
            expiration: policy.ttl.unwrap_or(0),
        };
        debug!(key = %key, bins = bins.len(), generation = record.generation, "put record");
        map.insert(
            slot(key),
            StoredRecord {
                key: stored_key,
                record,
            },
        );
        Ok(())
    }

    fn delete(&self, _policy: &WritePolicy, key: &Key) -> StoreResult<bool> {
        self.check_available()?;
        validate_key(key)?;
        let removed = self.records.write().remove(&slot(key)).is_some();
        debug!(key = %key, removed, "delete record");
        Ok(removed)
    }

    fn exists(&self, _policy: &ReadPolicy, key: &Key) -> StoreResult<bool> {
        self.check_available()?;
        validate_key(key)?;
        Ok(self.records.read().contains_key(&slot(key)))
    }

    fn scan(
        &self,
        policy: &ScanPolicy,
        namespace: &str,
        set_name: &str,
    ) -> StoreResult<Vec<(Key, Record)>> {
        self.check_available()?;
        let map = self.records.read();
        let mut found: Vec<(Key, Record)> = map
            .values()
            .filter(|s| s.key.namespace == namespace && s.key.set_name == set_name)
            .map(|s| (s.key.clone(), s.record.clone()))
            .collect();
        found.sort_by(|a, b| a.0.digest.cmp(&b.0.digest));
        if policy.max_records > 0 {
            found.truncate(policy.max_records);
        }
        Ok(found)
    }
}

impl std::fmt::Debug for InMemoryRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRecordStore")
            .field("record_count", &self.len())
            .field("calls", &self.call_counts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(user_key: &str) -> Key {
        Key::new("test", "people", user_key).unwrap()
    }

    fn bins(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Core CRUD
    // -----------------------------------------------------------------------

    #[test]
    fn put_and_get() {
        let store = InMemoryRecordStore::new();
        store
            .put(&WritePolicy::default(), &key("a"), &bins(&[("n", Value::Int(1))]))
            .unwrap();
        let record = store.get(&ReadPolicy::default(), &key("a")).unwrap().unwrap();
        assert_eq!(record.bin("n"), Some(&Value::Int(1)));
        assert_eq!(record.generation, 1);
    }

    #[test]
    fn get_missing_is_none() {
        let store = InMemoryRecordStore::new();
        assert!(store.get(&ReadPolicy::default(), &key("x")).unwrap().is_none());
    }

    #[test]
    fn update_merges_and_replace_overwrites() {
        let store = InMemoryRecordStore::new();
        let w = WritePolicy::default();
        store.put(&w, &key("a"), &bins(&[("x", Value::Int(1))])).unwrap();
        store.put(&w, &key("a"), &bins(&[("y", Value::Int(2))])).unwrap();
        let merged = store.get(&ReadPolicy::default(), &key("a")).unwrap().unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.generation, 2);

        let replace = WritePolicy {
            record_exists_action: RecordExistsAction::Replace,
            ..Default::default()
        };
        store.put(&replace, &key("a"), &bins(&[("z", Value::Int(3))])).unwrap();
        let replaced = store.get(&ReadPolicy::default(), &key("a")).unwrap().unwrap();
        assert_eq!(replaced.len(), 1);
        assert!(replaced.bin("z").is_some());
    }

    #[test]
    fn nil_bins_are_removed() {
        let store = InMemoryRecordStore::new();
        let w = WritePolicy::default();
        store.put(&w, &key("a"), &bins(&[("x", Value::Int(1))])).unwrap();
        store.put(&w, &key("a"), &bins(&[("x", Value::Nil)])).unwrap();
        let record = store.get(&ReadPolicy::default(), &key("a")).unwrap().unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn create_only_rejects_existing() {
        let store = InMemoryRecordStore::new();
        let w = WritePolicy {
            record_exists_action: RecordExistsAction::CreateOnly,
            ..Default::default()
        };
        store.put(&w, &key("a"), &bins(&[])).unwrap();
        let err = store.put(&w, &key("a"), &bins(&[])).unwrap_err();
        assert!(matches!(err, StoreError::RecordExists(_)));
    }

    #[test]
    fn generation_check() {
        let store = InMemoryRecordStore::new();
        store
            .put(&WritePolicy::default(), &key("a"), &bins(&[("x", Value::Int(1))]))
            .unwrap();
        let stale = WritePolicy {
            generation_policy: GenerationPolicy::ExpectGenEqual,
            generation: 5,
            ..Default::default()
        };
        let err = store.put(&stale, &key("a"), &bins(&[])).unwrap_err();
        assert!(matches!(
            err,
            StoreError::GenerationMismatch {
                expected: 5,
                actual: 1,
                ..
            }
        ));
        let fresh = WritePolicy {
            generation: 1,
            ..stale
        };
        store.put(&fresh, &key("a"), &bins(&[])).unwrap();
    }

    #[test]
    fn send_key_controls_stored_user_key() {
        let store = InMemoryRecordStore::new();
        store.put(&WritePolicy::default(), &key("a"), &bins(&[])).unwrap();
        assert!(store.stored_key(&key("a")).unwrap().user_key.is_none());

        let send = WritePolicy {
            send_key: true,
            ..Default::default()
        };
        store.put(&send, &key("b"), &bins(&[])).unwrap();
        assert_eq!(
            store.stored_key(&key("b")).unwrap().user_key,
            Some(Value::from("b"))
        );
    }

    #[test]
    fn delete_and_exists() {
        let store = InMemoryRecordStore::new();
        let w = WritePolicy::default();
        store.put(&w, &key("a"), &bins(&[])).unwrap();
        assert!(store.exists(&ReadPolicy::default(), &key("a")).unwrap());
        assert!(store.delete(&w, &key("a")).unwrap());
        assert!(!store.delete(&w, &key("a")).unwrap());
        assert!(!store.exists(&ReadPolicy::default(), &key("a")).unwrap());
    }

    // -----------------------------------------------------------------------
    // Batch and scan
    // -----------------------------------------------------------------------

    #[test]
    fn batch_get_preserves_positions() {
        let store = InMemoryRecordStore::new();
        store
            .put(&WritePolicy::default(), &key("b"), &bins(&[("n", Value::Int(2))]))
            .unwrap();
        let result = store
            .batch_get(&BatchPolicy::default(), &[key("a"), key("b"), key("c")])
            .unwrap();
        assert_eq!(result.len(), 3);
        assert!(result[0].is_none());
        assert_eq!(result[1].as_ref().unwrap().bin("n"), Some(&Value::Int(2)));
        assert!(result[2].is_none());
        assert_eq!(store.call_counts().batch_gets, 1);
        assert_eq!(store.call_counts().gets, 0);
    }

    #[test]
    fn scan_filters_by_set() {
        let store = InMemoryRecordStore::new();
        let w = WritePolicy::default();
        store.put(&w, &key("a"), &bins(&[])).unwrap();
        store.put(&w, &key("b"), &bins(&[])).unwrap();
        store
            .put(&w, &Key::new("test", "other", "c").unwrap(), &bins(&[]))
            .unwrap();
        let all = store.scan(&ScanPolicy::default(), "test", "people").unwrap();
        assert_eq!(all.len(), 2);
        let limited = store
            .scan(&ScanPolicy { max_records: 1 }, "test", "people")
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Failure modes
    // -----------------------------------------------------------------------

    #[test]
    fn unavailable_store_fails_every_call() {
        let store = InMemoryRecordStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get(&ReadPolicy::default(), &key("a")),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.batch_get(&BatchPolicy::default(), &[key("a")]).is_err());
        store.set_unavailable(false);
        assert!(store.get(&ReadPolicy::default(), &key("a")).is_ok());
    }

    #[test]
    fn empty_namespace_is_invalid() {
        let store = InMemoryRecordStore::new();
        let bad = Key::new("", "people", "a").unwrap();
        assert!(matches!(
            store.get(&ReadPolicy::default(), &bad),
            Err(StoreError::InvalidKey { .. })
        ));
    }

    #[test]
    fn counts_reset() {
        let store = InMemoryRecordStore::new();
        let _ = store.get(&ReadPolicy::default(), &key("a"));
        assert_eq!(store.call_counts().gets, 1);
        store.reset_counts();
        assert_eq!(store.call_counts(), CallCounts::default());
    }
}
