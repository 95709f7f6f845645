use serde::{Deserialize, Serialize};

/// Policy for single-record reads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadPolicy {
    /// Total time budget in milliseconds (0 = no limit).
    pub total_timeout_ms: u64,
}

/// Policy for batched multi-key reads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchPolicy {
    /// Hint for how many keys the store may fetch concurrently (0 = store default).
    pub max_concurrent: usize,
    /// Total time budget in milliseconds (0 = no limit).
    pub total_timeout_ms: u64,
}

/// How a write treats the record's generation counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPolicy {
    /// Write regardless of the stored generation.
    #[default]
    None,
    /// Write only if the stored generation equals [`WritePolicy::generation`].
    ExpectGenEqual,
}

/// What a write does when the record already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordExistsAction {
    /// Merge the written bins into the existing record.
    #[default]
    Update,
    /// Replace all bins of the existing record.
    Replace,
    /// Fail if the record exists.
    CreateOnly,
}

/// Policy for writes and deletes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WritePolicy {
    /// Record time-to-live in seconds. `None` uses the namespace default.
    pub ttl: Option<u32>,
    /// Store the user key alongside the record.
    pub send_key: bool,
    /// Leave a tombstone on delete.
    pub durable_delete: bool,
    pub generation_policy: GenerationPolicy,
    /// Expected generation when `generation_policy` is `ExpectGenEqual`.
    pub generation: u32,
    pub record_exists_action: RecordExistsAction,
    /// Total time budget in milliseconds (0 = no limit).
    pub total_timeout_ms: u64,
}

/// Policy for set scans.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPolicy {
    /// Stop after this many records (0 = unlimited).
    pub max_records: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let w = WritePolicy::default();
        assert_eq!(w.ttl, None);
        assert!(!w.send_key);
        assert_eq!(w.generation_policy, GenerationPolicy::None);
        assert_eq!(w.record_exists_action, RecordExistsAction::Update);
        assert_eq!(BatchPolicy::default().max_concurrent, 0);
        assert_eq!(ScanPolicy::default().max_records, 0);
    }

    #[test]
    fn write_policy_from_toml() {
        let w: WritePolicy = toml::from_str(
            r#"
            ttl = 3600
            send_key = true
            record_exists_action = "replace"
            "#,
        )
        .unwrap();
        assert_eq!(w.ttl, Some(3600));
        assert!(w.send_key);
        assert_eq!(w.record_exists_action, RecordExistsAction::Replace);
        assert!(!w.durable_delete);
    }
}
