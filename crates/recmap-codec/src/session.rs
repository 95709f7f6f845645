//! Per-operation decode state.
//!
//! A [`Session`] lives for one top-level read. It owns the queue of deferred
//! references and the cache of records already materialized, keyed by
//! `(namespace, digest)`. Nothing in it is shared between operations.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use recmap_model::ClassEntry;
use recmap_types::{Digest, FieldValue, Key, ObjectRef};

use crate::structural::shell;

/// A reference bin whose target record has not been fetched yet.
///
/// `shell` is the handle already placed in the referring object; resolving
/// the reference hydrates it in place.
#[derive(Clone, Debug)]
pub struct DeferredReference {
    pub entry: Arc<ClassEntry>,
    pub key: Key,
    pub shell: ObjectRef,
    /// Resolve through batched reads rather than a dedicated single read.
    pub batch_load: bool,
}

#[derive(Debug, Default)]
pub struct Session {
    resolved: HashMap<(String, Digest), ObjectRef>,
    pending: Vec<DeferredReference>,
    /// Every object decoded in this session, for the missing-target sweep.
    materialized: Vec<ObjectRef>,
    /// Shell addresses whose record has been decoded into them.
    hydrated: HashSet<usize>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for the record at `key`, queueing a fetch the first time the
    /// key is seen in this session.
    pub fn reference(&mut self, entry: Arc<ClassEntry>, key: Key, batch_load: bool) -> ObjectRef {
        let id = (key.namespace.clone(), key.digest);
        if let Some(existing) = self.resolved.get(&id) {
            return existing.clone();
        }
        let handle = shell(&entry.name);
        self.resolved.insert(id, handle.clone());
        self.pending.push(DeferredReference {
            entry,
            key,
            shell: handle.clone(),
            batch_load,
        });
        handle
    }

    /// Handle for a record the caller is about to decode directly.
    pub fn root(&mut self, class: &str, key: &Key) -> ObjectRef {
        self.resolved
            .entry((key.namespace.clone(), key.digest))
            .or_insert_with(|| shell(class))
            .clone()
    }

    /// Cached handle for `key`, if this session has seen it.
    pub fn lookup(&self, key: &Key) -> Option<&ObjectRef> {
        self.resolved.get(&(key.namespace.clone(), key.digest))
    }

    pub(crate) fn mark_hydrated(&mut self, object: &ObjectRef) {
        self.hydrated.insert(object.addr());
    }

    pub fn is_hydrated(&self, object: &ObjectRef) -> bool {
        self.hydrated.contains(&object.addr())
    }

    pub(crate) fn track(&mut self, object: ObjectRef) {
        self.materialized.push(object);
    }

    /// Take the current wave of deferred references, skipping any whose
    /// record was already decoded by another path.
    pub fn take_pending(&mut self) -> Vec<DeferredReference> {
        let pending = std::mem::take(&mut self.pending);
        pending
            .into_iter()
            .filter(|r| !self.hydrated.contains(&r.shell.addr()))
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Replace every reference to a handle in `missing` with null, across all
    /// objects materialized in this session.
    pub fn null_missing(&mut self, missing: &HashSet<usize>) {
        if missing.is_empty() {
            return;
        }
        for object in &self.materialized {
            let mut guard = object.write();
            for value in guard.fields.values_mut() {
                null_missing_in(value, missing);
            }
        }
        self.resolved.retain(|_, handle| !missing.contains(&handle.addr()));
    }
}

fn null_missing_in(value: &mut FieldValue, missing: &HashSet<usize>) {
    if matches!(value, FieldValue::Object(handle) if missing.contains(&handle.addr())) {
        *value = FieldValue::Null;
        return;
    }
    match value {
        FieldValue::List(items) => {
            for item in items {
                null_missing_in(item, missing);
            }
        }
        FieldValue::Map(entries) => {
            for (k, v) in entries {
                null_missing_in(k, missing);
                null_missing_in(v, missing);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use recmap_model::Factory;
    use recmap_types::Object;

    use super::*;

    fn entry(name: &str) -> Arc<ClassEntry> {
        Arc::new(ClassEntry {
            name: name.into(),
            namespace: Some("test".into()),
            set_name: None,
            ttl: None,
            version: 1,
            send_key: false,
            durable_delete: false,
            short_name: name.into(),
            key: None,
            key_as_bin: true,
            bins: Vec::new(),
            generation: None,
            ancestors: Vec::new(),
            factory: Factory::Default,
        })
    }

    fn key(id: &str) -> Key {
        Key::new("test", "things", id).unwrap()
    }

    #[test]
    fn references_are_deduplicated() {
        let mut session = Session::new();
        let a = session.reference(entry("Thing"), key("a"), true);
        let again = session.reference(entry("Thing"), key("a"), true);
        let b = session.reference(entry("Thing"), key("b"), false);
        assert!(a.ptr_eq(&again));
        assert!(!a.ptr_eq(&b));
        let wave = session.take_pending();
        assert_eq!(wave.len(), 2);
        assert!(!session.has_pending());
        assert!(!wave[1].batch_load);
    }

    #[test]
    fn roots_share_handles_with_references() {
        let mut session = Session::new();
        let referenced = session.reference(entry("Thing"), key("a"), true);
        let root = session.root("Thing", &key("a"));
        assert!(root.ptr_eq(&referenced));
        session.mark_hydrated(&root);
        assert!(session.take_pending().is_empty());
        assert!(session.lookup(&key("a")).is_some());
    }

    #[test]
    fn missing_targets_become_null() {
        let mut session = Session::new();
        let gone = session.reference(entry("Thing"), key("gone"), true);
        let kept = session.reference(entry("Thing"), key("kept"), true);
        let holder = Object::new("Holder")
            .with("one", gone.clone())
            .with(
                "many",
                FieldValue::List(vec![
                    FieldValue::Object(gone.clone()),
                    FieldValue::Object(kept.clone()),
                ]),
            )
            .into_ref();
        session.track(holder.clone());

        let missing: HashSet<usize> = [gone.addr()].into_iter().collect();
        session.null_missing(&missing);

        assert_eq!(holder.get("one"), Some(FieldValue::Null));
        let many = holder.get("many").unwrap();
        let items = many.as_list().unwrap();
        assert!(items[0].is_null());
        assert!(items[1].as_object().unwrap().ptr_eq(&kept));
        assert!(session.lookup(&key("gone")).is_none());
    }
}
