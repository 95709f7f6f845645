//! Compiled, immutable per-class mapping metadata.

use recmap_types::{FieldValue, Object};

use crate::descriptor::{AccessContext, Accessor, Factory};
use crate::error::{ModelError, ModelResult};
use crate::policy::{EmbedSpec, ReferenceSpec};
use crate::types::TypeRef;

/// How one member maps to one bin.
#[derive(Clone, Debug)]
pub struct BinMapping {
    /// Stored bin name.
    pub name: String,
    /// Member name on the object.
    pub member: String,
    pub ty: TypeRef,
    pub ordinal: u32,
    pub version_min: u32,
    pub version_max: u32,
    pub embed: Option<EmbedSpec>,
    pub reference: Option<ReferenceSpec>,
    pub accessor: Accessor,
    /// Bound to a constructor parameter rather than assigned afterwards.
    pub constructor_param: bool,
    /// This bin also carries the record key.
    pub is_key: bool,
    /// Class in the lineage that declared the member.
    pub declared_in: String,
}

impl BinMapping {
    pub fn valid_at(&self, version: u32) -> bool {
        self.version_min <= version && version <= self.version_max
    }

    pub fn read(&self, object: &Object, cx: &AccessContext<'_>) -> FieldValue {
        self.accessor.read(&self.member, object, cx)
    }

    pub fn write(&self, object: &mut Object, value: FieldValue, cx: &AccessContext<'_>) -> bool {
        self.accessor.write(&self.member, object, value, cx)
    }
}

/// The member holding the record's user key.
#[derive(Clone, Debug)]
pub struct KeyMapping {
    pub member: String,
    pub ty: TypeRef,
    pub accessor: Accessor,
    /// Bin name when the key is also stored as a bin.
    pub bin: Option<String>,
    pub constructor_param: bool,
}

impl KeyMapping {
    pub fn read(&self, object: &Object) -> FieldValue {
        self.accessor
            .read(&self.member, object, &AccessContext::default())
    }

    pub fn write(&self, object: &mut Object, value: FieldValue) -> bool {
        self.accessor
            .write(&self.member, object, value, &AccessContext::default())
    }
}

/// The member bound to the record's generation counter.
#[derive(Clone, Debug)]
pub struct GenerationMapping {
    pub member: String,
    pub accessor: Accessor,
}

/// Everything the codec needs to know about a class.
#[derive(Clone, Debug)]
pub struct ClassEntry {
    pub name: String,
    pub namespace: Option<String>,
    pub set_name: Option<String>,
    pub ttl: Option<u32>,
    /// Schema version objects of this class are written at.
    pub version: u32,
    pub send_key: bool,
    pub durable_delete: bool,
    /// Stored type discriminator.
    pub short_name: String,
    pub key: Option<KeyMapping>,
    pub key_as_bin: bool,
    /// Ordered by ordinal.
    pub bins: Vec<BinMapping>,
    pub generation: Option<GenerationMapping>,
    /// Ancestor class names, nearest first.
    pub ancestors: Vec<String>,
    pub factory: Factory,
}

impl ClassEntry {
    /// Bins present at `version`, in ordinal order.
    pub fn bins_for_version(&self, version: u32) -> impl Iterator<Item = &BinMapping> {
        self.bins.iter().filter(move |b| b.valid_at(version))
    }

    pub fn bin_by_name(&self, name: &str) -> Option<&BinMapping> {
        self.bins.iter().find(|b| b.name == name)
    }

    pub fn bin_by_member(&self, member: &str) -> Option<&BinMapping> {
        self.bins.iter().find(|b| b.member == member)
    }

    /// Whether this class is `class` or descends from it.
    pub fn is_subclass_of(&self, class: &str) -> bool {
        self.name == class || self.ancestors.iter().any(|a| a == class)
    }

    pub fn require_key(&self) -> ModelResult<&KeyMapping> {
        self.key.as_ref().ok_or_else(|| ModelError::MissingKey {
            class: self.name.clone(),
        })
    }

    pub fn require_namespace(&self) -> ModelResult<&str> {
        self.namespace
            .as_deref()
            .ok_or_else(|| ModelError::MissingNamespace {
                class: self.name.clone(),
            })
    }

    /// Set name, defaulting to the class name.
    pub fn set(&self) -> &str {
        self.set_name.as_deref().unwrap_or(&self.name)
    }

    /// Read the key member of `object`.
    pub fn key_of(&self, object: &Object) -> ModelResult<FieldValue> {
        Ok(self.require_key()?.read(object))
    }
}
