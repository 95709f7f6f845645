//! Mapper configuration, loaded from TOML.
//!
//! ```toml
//! [write_policy]
//! send_key = true
//!
//! [resolver]
//! batch_threshold = 4
//!
//! [[mapping.classes]]
//! class = "Customer"
//! set = "customers"
//! ```

use std::path::Path;

use recmap_codec::ResolverConfig;
use recmap_model::MappingConfig;
use recmap_store::{ReadPolicy, ScanPolicy, WritePolicy};
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Defaults for every write. Class settings (ttl, send_key,
    /// durable_delete) take precedence.
    pub write_policy: WritePolicy,
    pub read_policy: ReadPolicy,
    pub scan_policy: ScanPolicy,
    pub resolver: ResolverConfig,
    /// Per-class mapping overrides.
    pub mapping: MappingConfig,
}

impl MapperConfig {
    pub fn from_toml_str(text: &str) -> SdkResult<Self> {
        toml::from_str(text).map_err(|e| SdkError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> SdkResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
