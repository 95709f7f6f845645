//! Breadth-first resolution of deferred references.
//!
//! Decoding a record never fetches. Reference bins leave a
//! [`DeferredReference`] in the [`Session`] and a shell in the object. The
//! resolver drains those in waves: every reference discovered while decoding
//! wave `n` is fetched in wave `n + 1`. Within a wave, batch-loadable
//! references go out as a single batched read once there are enough of them.

use std::collections::HashSet;

use recmap_store::{BatchPolicy, ReadPolicy, RecordStore};
use recmap_types::{Key, Record};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::GraphCodec;
use crate::error::{CodecError, CodecResult};
use crate::session::{DeferredReference, Session};

/// Tuning for reference resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Fewest batch-loadable references in a wave worth a batched read.
    pub batch_threshold: usize,
    pub read_policy: ReadPolicy,
    pub batch_policy: BatchPolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            batch_threshold: 3,
            read_policy: ReadPolicy::default(),
            batch_policy: BatchPolicy::default(),
        }
    }
}

/// What a [`ReferenceResolver::drain`] call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolveStats {
    pub waves: usize,
    /// Records fetched and hydrated.
    pub fetched: usize,
    /// Referenced records that do not exist.
    pub missing: usize,
}

pub struct ReferenceResolver<'a> {
    codec: &'a GraphCodec,
    store: &'a dyn RecordStore,
    config: &'a ResolverConfig,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(codec: &'a GraphCodec, store: &'a dyn RecordStore, config: &'a ResolverConfig) -> Self {
        Self {
            codec,
            store,
            config,
        }
    }

    /// Fetch and hydrate every deferred reference in `session`, including
    /// those discovered along the way.
    ///
    /// References to records that do not exist are replaced with null in
    /// every object of the session. Store errors abort the whole read.
    pub fn drain(&self, session: &mut Session) -> CodecResult<ResolveStats> {
        let mut stats = ResolveStats::default();
        let mut missing = HashSet::new();

        loop {
            let wave = session.take_pending();
            if wave.is_empty() {
                break;
            }
            stats.waves += 1;
            let (batched, single): (Vec<_>, Vec<_>) =
                wave.into_iter().partition(|r| r.batch_load);
            debug!(
                wave = stats.waves,
                batched = batched.len(),
                single = single.len(),
                "resolving references"
            );

            let mut fetched = Vec::with_capacity(batched.len() + single.len());
            if !batched.is_empty() && batched.len() >= self.config.batch_threshold {
                let keys: Vec<_> = batched.iter().map(|r| r.key.clone()).collect();
                let records = batch_get(self.store, &self.config.batch_policy, &keys)?;
                fetched.extend(batched.into_iter().zip(records));
            } else {
                for reference in batched {
                    let record = self.store.get(&self.config.read_policy, &reference.key)?;
                    fetched.push((reference, record));
                }
            }
            for reference in single {
                let record = self.store.get(&self.config.read_policy, &reference.key)?;
                fetched.push((reference, record));
            }

            for (reference, record) in fetched {
                match record {
                    Some(record) => {
                        self.hydrate(&reference, &record, session)?;
                        stats.fetched += 1;
                    }
                    None => {
                        debug!(key = %reference.key, class = %reference.entry.name, "referenced record missing");
                        missing.insert(reference.shell.addr());
                        stats.missing += 1;
                    }
                }
            }
        }

        session.null_missing(&missing);
        Ok(stats)
    }

    fn hydrate(
        &self,
        reference: &DeferredReference,
        record: &Record,
        session: &mut Session,
    ) -> CodecResult<()> {
        self.codec.decode_into(
            &reference.shell,
            &reference.entry,
            &reference.key,
            record,
            session,
        )
    }
}

/// Batched read whose results line up one to one with `keys`.
pub fn batch_get(
    store: &dyn RecordStore,
    policy: &BatchPolicy,
    keys: &[Key],
) -> CodecResult<Vec<Option<Record>>> {
    let records = store.batch_get(policy, keys)?;
    if records.len() != keys.len() {
        return Err(CodecError::BatchSizeMismatch {
            requested: keys.len(),
            returned: records.len(),
        });
    }
    Ok(records)
}
