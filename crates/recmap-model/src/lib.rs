//! # recmap-model
//!
//! Class model compilation for recmap.
//!
//! Mapping intent arrives as [`TypeDescriptor`]s (built in code) optionally
//! overridden by a TOML [`MappingConfig`]. The [`ClassModel`] compiles that
//! intent into immutable [`ClassEntry`] values: flattened inheritance,
//! validated policies and positional ordinals for list encoding. Nothing
//! downstream of the compiler looks at descriptors.
//!
//! ## Design Rules
//!
//! 1. **Configuration wins.** A value present in configuration overrides the
//!    descriptor for the same class or member.
//! 2. **Fail on first use.** Invalid mappings surface as [`ModelError`] the
//!    first time the class is compiled, and on every use after that.
//! 3. **Deterministic ordinals.** Compiling the same class twice yields the
//!    same ordinal assignment regardless of declaration order.

pub mod compiler;
pub mod config;
pub mod descriptor;
pub mod entry;
pub mod error;
pub mod policy;
pub mod types;
pub mod version;

pub use compiler::ClassModel;
pub use config::{BinConfig, ClassConfig, KeyConfig, MappingConfig, VersionConfig};
pub use descriptor::{
    AccessContext, Accessor, BuildFn, ConstructorArgs, Factory, Getter, MemberDescriptor, Setter,
    TypeDescriptor,
};
pub use entry::{BinMapping, ClassEntry, GenerationMapping, KeyMapping};
pub use error::{ModelError, ModelResult};
pub use policy::{EmbedKind, EmbedSpec, ReferenceKind, ReferenceSpec};
pub use types::{EnumDescriptor, EnumValueField, FloatKind, IntKind, TemporalKind, TypeRef};
pub use version::{assign_ordinals, AssignedSlot, PendingVersionedBin};
