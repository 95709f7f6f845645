//! Ordinal and version-range assignment for positional encoding.
//!
//! The list form of an embedded object carries no bin names, so every bin
//! needs a stable position. Explicit ordinals are honoured; every other bin
//! takes the next free ordinal in stored-name order. The result depends only
//! on the input set, never on declaration order.

use std::collections::BTreeSet;

use crate::error::{ModelError, ModelResult};

/// A bin awaiting its ordinal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingVersionedBin {
    pub name: String,
    pub ordinal: Option<u32>,
    pub version_min: u32,
    pub version_max: u32,
}

impl PendingVersionedBin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ordinal: None,
            version_min: 1,
            version_max: u32::MAX,
        }
    }
}

/// Final position and applicability of a bin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssignedSlot {
    pub name: String,
    pub ordinal: u32,
    pub version_min: u32,
    pub version_max: u32,
}

impl AssignedSlot {
    /// Whether the bin is present in schema version `version`.
    pub fn valid_at(&self, version: u32) -> bool {
        self.version_min <= version && version <= self.version_max
    }
}

/// Assign ordinals to the bins of `class`, returned in ordinal order.
pub fn assign_ordinals(
    class: &str,
    pending: Vec<PendingVersionedBin>,
) -> ModelResult<Vec<AssignedSlot>> {
    let mut taken = BTreeSet::new();
    for bin in &pending {
        if bin.version_min == 0 || bin.version_min > bin.version_max {
            return Err(ModelError::InvalidVersionRange {
                class: class.to_string(),
                bin: bin.name.clone(),
                min: bin.version_min,
                max: bin.version_max,
            });
        }
        match bin.ordinal {
            Some(0) => {
                return Err(ModelError::InvalidOrdinal {
                    class: class.to_string(),
                    bin: bin.name.clone(),
                })
            }
            Some(ordinal) if !taken.insert(ordinal) => {
                return Err(ModelError::DuplicateOrdinal {
                    class: class.to_string(),
                    ordinal,
                })
            }
            _ => {}
        }
    }

    let (explicit, mut implicit): (Vec<_>, Vec<_>) =
        pending.into_iter().partition(|b| b.ordinal.is_some());
    implicit.sort_by(|a, b| a.name.cmp(&b.name));

    let mut slots: Vec<AssignedSlot> = explicit
        .into_iter()
        .map(|b| AssignedSlot {
            ordinal: b.ordinal.unwrap_or_default(),
            name: b.name,
            version_min: b.version_min,
            version_max: b.version_max,
        })
        .collect();

    let mut next = 1u32;
    for bin in implicit {
        while taken.contains(&next) {
            next += 1;
        }
        taken.insert(next);
        slots.push(AssignedSlot {
            name: bin.name,
            ordinal: next,
            version_min: bin.version_min,
            version_max: bin.version_max,
        });
    }

    slots.sort_by_key(|s| s.ordinal);
    Ok(slots)
}
