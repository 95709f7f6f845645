//! File-based mapping configuration.
//!
//! Configuration supplies the same intent as descriptors and wins whenever
//! both speak about the same member. A typical file:
//!
//! ```toml
//! [[classes]]
//! class = "Customer"
//! namespace = "test"
//! set = "customers"
//! key = { field = "id" }
//!
//! [[classes.bins]]
//! field = "full_name"
//! name = "nm"
//!
//! [[classes.bins]]
//! field = "address"
//! embed = { type = "LIST" }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::descriptor::TypeDescriptor;
use crate::error::{ModelError, ModelResult};
use crate::policy::{EmbedSpec, ReferenceSpec};

/// Root of a mapping configuration file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub classes: Vec<ClassConfig>,
}

/// Overrides for one class.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassConfig {
    pub class: String,
    pub namespace: Option<String>,
    pub set: Option<String>,
    pub ttl: Option<u32>,
    pub version: Option<u32>,
    pub send_key: Option<bool>,
    pub durable_delete: Option<bool>,
    pub short_name: Option<String>,
    pub key: Option<KeyConfig>,
    pub bins: Vec<BinConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    pub field: String,
}

/// Overrides for one member.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinConfig {
    pub field: String,
    pub name: Option<String>,
    pub exclude: Option<bool>,
    pub ordinal: Option<u32>,
    pub generation: Option<bool>,
    pub version: Option<VersionConfig>,
    pub embed: Option<EmbedSpec>,
    pub reference: Option<ReferenceSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

impl MappingConfig {
    /// Parse a TOML mapping configuration.
    pub fn from_toml_str(text: &str) -> ModelResult<Self> {
        toml::from_str(text).map_err(|e| ModelError::Config(e.to_string()))
    }

    /// Read and parse a TOML mapping configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> ModelResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn class(&self, name: &str) -> Option<&ClassConfig> {
        self.classes.iter().find(|c| c.class == name)
    }

    /// Fold another configuration into this one; later entries win.
    pub fn merge(&mut self, other: MappingConfig) {
        for class in other.classes {
            match self.classes.iter_mut().find(|c| c.class == class.class) {
                Some(existing) => *existing = class,
                None => self.classes.push(class),
            }
        }
    }
}

impl ClassConfig {
    /// Apply these overrides to a descriptor.
    ///
    /// Setting an embed policy in configuration replaces a declared reference
    /// policy and vice versa; setting both in configuration is left for the
    /// compiler to reject.
    pub fn apply(&self, descriptor: &mut TypeDescriptor) -> ModelResult<()> {
        if let Some(namespace) = &self.namespace {
            descriptor.namespace = Some(namespace.clone());
        }
        if let Some(set) = &self.set {
            descriptor.set_name = Some(set.clone());
        }
        if self.ttl.is_some() {
            descriptor.ttl = self.ttl;
        }
        if self.version.is_some() {
            descriptor.version = self.version;
        }
        if self.send_key.is_some() {
            descriptor.send_key = self.send_key;
        }
        if self.durable_delete.is_some() {
            descriptor.durable_delete = self.durable_delete;
        }
        if let Some(short_name) = &self.short_name {
            descriptor.short_name = Some(short_name.clone());
        }

        if let Some(key) = &self.key {
            if !descriptor.members.iter().any(|m| m.name == key.field) {
                return Err(ModelError::UnknownMember {
                    class: descriptor.name.clone(),
                    member: key.field.clone(),
                });
            }
            for member in &mut descriptor.members {
                member.key = member.name == key.field;
            }
        }

        for bin in &self.bins {
            let class = descriptor.name.clone();
            let member =
                descriptor
                    .member_mut(&bin.field)
                    .ok_or_else(|| ModelError::UnknownMember {
                        class,
                        member: bin.field.clone(),
                    })?;
            if let Some(name) = &bin.name {
                member.stored_name = Some(name.clone());
            }
            if let Some(exclude) = bin.exclude {
                member.excluded = exclude;
            }
            if bin.ordinal.is_some() {
                member.ordinal = bin.ordinal;
            }
            if let Some(generation) = bin.generation {
                member.generation = generation;
            }
            if let Some(version) = &bin.version {
                if let Some(min) = version.min {
                    member.version_min = min;
                }
                if let Some(max) = version.max {
                    member.version_max = max;
                }
            }
            match (&bin.embed, &bin.reference) {
                (Some(embed), None) => {
                    member.embed = Some(embed.clone());
                    member.reference = None;
                }
                (None, Some(reference)) => {
                    member.reference = Some(reference.clone());
                    member.embed = None;
                }
                (Some(embed), Some(reference)) => {
                    member.embed = Some(embed.clone());
                    member.reference = Some(reference.clone());
                }
                (None, None) => {}
            }
        }
        Ok(())
    }
}
