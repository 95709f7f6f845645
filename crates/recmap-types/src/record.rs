use std::collections::BTreeMap;

use crate::value::Value;

/// A record as returned by the store: named bins plus metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    /// Bin name to value, ordered by bin name.
    pub bins: BTreeMap<String, Value>,
    /// Optimistic-concurrency counter, incremented on every write.
    pub generation: u32,
    /// Expiration as seconds since the store epoch (0 = never expires).
    pub expiration: u32,
}

impl Record {
    /// Create a record from bins with zero generation and no expiration.
    pub fn new(bins: BTreeMap<String, Value>) -> Self {
        Self {
            bins,
            generation: 0,
            expiration: 0,
        }
    }

    /// Look up a bin by name.
    pub fn bin(&self, name: &str) -> Option<&Value> {
        self.bins.get(name)
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}
