//! The class model compiler.
//!
//! [`ClassModel`] owns registered descriptors, enums, mapping configuration
//! and the discriminator registry, and compiles them into cached
//! [`ClassEntry`] values on first use.
//!
//! ## Caching
//!
//! Compiled entries live in a [`DashMap`] for the lifetime of the model.
//! Compilation runs without holding any map shard; when two callers race on
//! the same class both compile and the first insertion wins. Failed
//! compilations are never cached, so every use of a broken class reports
//! the same configuration error.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::MappingConfig;
use crate::descriptor::{MemberDescriptor, TypeDescriptor};
use crate::entry::{BinMapping, ClassEntry, GenerationMapping, KeyMapping};
use crate::error::{ModelError, ModelResult};
use crate::policy::{EmbedKind, ReferenceKind};
use crate::types::{EnumDescriptor, TypeRef};
use crate::version::{assign_ordinals, PendingVersionedBin};

/// Registry and compiler of class mappings.
#[derive(Default)]
pub struct ClassModel {
    descriptors: RwLock<HashMap<String, TypeDescriptor>>,
    enums: RwLock<HashMap<String, Arc<EnumDescriptor>>>,
    config: RwLock<MappingConfig>,
    /// Discriminator to class name.
    short_names: RwLock<HashMap<String, String>>,
    entries: DashMap<String, Arc<ClassEntry>>,
}

impl std::fmt::Debug for ClassModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassModel")
            .field("registered", &self.descriptors.read().len())
            .field("enums", &self.enums.read().len())
            .field("cached", &self.entries.len())
            .finish()
    }
}

/// A member together with the class that declared it.
struct Declared {
    member: MemberDescriptor,
    owner: String,
}

impl ClassModel {
    /// Create an empty model with no classes registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class descriptor. Replaces an earlier registration of the
    /// same class and drops every compiled entry.
    pub fn register(&self, descriptor: TypeDescriptor) -> ModelResult<()> {
        let short_name = descriptor.discriminator().to_string();
        self.claim_short_name(&short_name, &descriptor.name)?;
        debug!(class = %descriptor.name, short_name = %short_name, "registered class");
        self.descriptors
            .write()
            .insert(descriptor.name.clone(), descriptor);
        self.entries.clear();
        Ok(())
    }

    /// Register an enum. Replaces an earlier registration of the same name.
    pub fn register_enum(&self, descriptor: EnumDescriptor) -> ModelResult<()> {
        descriptor.validate()?;
        self.enums
            .write()
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        self.entries.clear();
        Ok(())
    }

    /// Bind an additional discriminator to a registered class.
    pub fn register_subclass(&self, short_name: &str, class: &str) -> ModelResult<()> {
        if !self.descriptors.read().contains_key(class) {
            return Err(ModelError::UnknownClass(class.to_string()));
        }
        self.claim_short_name(short_name, class)
    }

    /// Merge mapping configuration. Every configured class must already be
    /// registered.
    pub fn apply_config(&self, config: MappingConfig) -> ModelResult<()> {
        {
            let descriptors = self.descriptors.read();
            for class in &config.classes {
                let descriptor = descriptors
                    .get(&class.class)
                    .ok_or_else(|| ModelError::UnknownClass(class.class.clone()))?;
                // Dry run so unknown members surface now rather than on first use.
                class.apply(&mut descriptor.clone())?;
            }
        }
        for class in &config.classes {
            if let Some(short_name) = &class.short_name {
                self.claim_short_name(short_name, &class.class)?;
            }
        }
        self.config.write().merge(config);
        self.entries.clear();
        Ok(())
    }

    /// Compiled entry for `class`, compiling it on first use.
    pub fn entry(&self, class: &str) -> ModelResult<Arc<ClassEntry>> {
        if let Some(entry) = self.entries.get(class) {
            return Ok(Arc::clone(entry.value()));
        }
        let compiled = Arc::new(self.compile(class)?);
        let entry = self
            .entries
            .entry(class.to_string())
            .or_insert(compiled);
        Ok(Arc::clone(entry.value()))
    }

    /// Registered enum named `name`.
    pub fn enum_descriptor(&self, name: &str) -> ModelResult<Arc<EnumDescriptor>> {
        self.enums
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownEnum(name.to_string()))
    }

    pub fn is_registered(&self, class: &str) -> bool {
        self.descriptors.read().contains_key(class)
    }

    /// Entry of the class stored under `short_name`, which must be `declared`
    /// or one of its subclasses.
    pub fn subclass_for(&self, declared: &str, short_name: &str) -> ModelResult<Arc<ClassEntry>> {
        let class = self
            .class_for_short_name(short_name)
            .ok_or_else(|| ModelError::UnknownDiscriminator {
                declared: declared.to_string(),
                short_name: short_name.to_string(),
            })?;
        let entry = self.entry(&class)?;
        if !entry.is_subclass_of(declared) {
            return Err(ModelError::NotASubclass {
                declared: declared.to_string(),
                class,
            });
        }
        Ok(entry)
    }

    /// Class registered under a stored discriminator.
    pub fn class_for_short_name(&self, short_name: &str) -> Option<String> {
        self.short_names.read().get(short_name).cloned()
    }

    /// Number of compiled entries currently cached.
    pub fn cached_entries(&self) -> usize {
        self.entries.len()
    }

    fn claim_short_name(&self, short_name: &str, class: &str) -> ModelResult<()> {
        let mut short_names = self.short_names.write();
        match short_names.get(short_name) {
            Some(existing) if existing != class => Err(ModelError::DuplicateShortName {
                short_name: short_name.to_string(),
                existing: existing.clone(),
                class: class.to_string(),
            }),
            _ => {
                short_names.insert(short_name.to_string(), class.to_string());
                Ok(())
            }
        }
    }

    /// Descriptors from `class` up to its root, with configuration applied.
    fn lineage(&self, class: &str) -> ModelResult<Vec<TypeDescriptor>> {
        let descriptors = self.descriptors.read();
        let config = self.config.read();
        let mut lineage = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(class.to_string());
        while let Some(name) = next {
            if !visited.insert(name.clone()) {
                return Err(ModelError::CyclicInheritance(name));
            }
            let mut descriptor = descriptors
                .get(&name)
                .cloned()
                .ok_or_else(|| ModelError::UnknownClass(name.clone()))?;
            if let Some(overrides) = config.class(&name) {
                overrides.apply(&mut descriptor)?;
            }
            next = descriptor.parent.clone();
            lineage.push(descriptor);
        }
        Ok(lineage)
    }

    fn has_key(&self, class: &str) -> ModelResult<bool> {
        Ok(self
            .lineage(class)?
            .iter()
            .any(|d| d.members.iter().any(|m| m.key && !m.excluded)))
    }

    fn stores_key_as_bin(&self, class: &str) -> ModelResult<bool> {
        Ok(self
            .lineage(class)?
            .first()
            .is_some_and(|leaf| leaf.key_as_bin))
    }

    fn check_enums(&self, ty: &TypeRef) -> ModelResult<()> {
        match ty {
            TypeRef::Enum(name) => self.enum_descriptor(name).map(|_| ()),
            TypeRef::Array(element) | TypeRef::List(element) => self.check_enums(element),
            TypeRef::Map(key, value) => {
                self.check_enums(key)?;
                self.check_enums(value)
            }
            _ => Ok(()),
        }
    }

    fn compile(&self, class: &str) -> ModelResult<ClassEntry> {
        let lineage = self.lineage(class)?;
        let leaf = &lineage[0];

        let namespace = lineage.iter().find_map(|d| d.namespace.clone());
        let set_name = lineage.iter().find_map(|d| d.set_name.clone());
        let ttl = lineage.iter().find_map(|d| d.ttl);
        let version = lineage.iter().find_map(|d| d.version).unwrap_or(1);
        let send_key = lineage.iter().find_map(|d| d.send_key).unwrap_or(false);
        let durable_delete = lineage
            .iter()
            .find_map(|d| d.durable_delete)
            .unwrap_or(false);

        // Leaf first, so the nearest declaration of a member wins.
        let mut seen = HashSet::new();
        let mut members = Vec::new();
        for descriptor in &lineage {
            for member in &descriptor.members {
                if seen.insert(member.name.clone()) && !member.excluded {
                    members.push(Declared {
                        member: member.clone(),
                        owner: descriptor.name.clone(),
                    });
                }
            }
        }

        for Declared { member, .. } in &members {
            self.validate_member(class, member)?;
        }

        let params = leaf.factory.params();
        for param in params {
            if !members.iter().any(|d| &d.member.name == param) {
                return Err(ModelError::UnknownConstructorParam {
                    class: class.to_string(),
                    param: param.clone(),
                });
            }
        }

        let mut keys = members.iter().filter(|d| d.member.key);
        let key_member = keys.next().map(|d| &d.member);
        if keys.next().is_some() {
            return Err(ModelError::MultipleKeys {
                class: class.to_string(),
            });
        }
        let key = match key_member {
            Some(member) => {
                if !member.accessor.is_readable() {
                    return Err(ModelError::KeyNotReadable {
                        class: class.to_string(),
                        member: member.name.clone(),
                    });
                }
                let constructor_param = params.contains(&member.name);
                if !member.accessor.is_writable() && !constructor_param {
                    return Err(ModelError::KeyNotWritable {
                        class: class.to_string(),
                        member: member.name.clone(),
                    });
                }
                Some(KeyMapping {
                    member: member.name.clone(),
                    ty: member.ty.clone(),
                    accessor: member.accessor.clone(),
                    bin: leaf.key_as_bin.then(|| member.bin_name().to_string()),
                    constructor_param,
                })
            }
            None => None,
        };

        let mut generations = members.iter().filter(|d| d.member.generation);
        let generation = generations.next().map(|d| GenerationMapping {
            member: d.member.name.clone(),
            accessor: d.member.accessor.clone(),
        });
        if generations.next().is_some() {
            return Err(ModelError::MultipleGenerations {
                class: class.to_string(),
            });
        }

        let stored: Vec<&Declared> = members
            .iter()
            .filter(|d| !d.member.generation && (!d.member.key || leaf.key_as_bin))
            .collect();

        let mut names = HashSet::new();
        for declared in &stored {
            if !names.insert(declared.member.bin_name()) {
                return Err(ModelError::DuplicateBinName {
                    class: class.to_string(),
                    bin: declared.member.bin_name().to_string(),
                });
            }
        }

        let pending = stored
            .iter()
            .map(|d| PendingVersionedBin {
                name: d.member.bin_name().to_string(),
                ordinal: d.member.ordinal,
                version_min: d.member.version_min,
                version_max: d.member.version_max,
            })
            .collect();
        let slots = assign_ordinals(class, pending)?;

        let mut bins = Vec::with_capacity(slots.len());
        for slot in slots {
            let Some(declared) = stored.iter().find(|d| d.member.bin_name() == slot.name) else {
                continue;
            };
            let member = &declared.member;
            bins.push(BinMapping {
                name: slot.name,
                member: member.name.clone(),
                ty: member.ty.clone(),
                ordinal: slot.ordinal,
                version_min: slot.version_min,
                version_max: slot.version_max,
                embed: member.embed.clone(),
                reference: member.reference.clone(),
                accessor: member.accessor.clone(),
                constructor_param: params.contains(&member.name),
                is_key: member.key,
                declared_in: declared.owner.clone(),
            });
        }

        let entry = ClassEntry {
            name: class.to_string(),
            namespace,
            set_name,
            ttl,
            version,
            send_key,
            durable_delete,
            short_name: leaf.discriminator().to_string(),
            key,
            key_as_bin: leaf.key_as_bin,
            bins,
            generation,
            ancestors: lineage[1..].iter().map(|d| d.name.clone()).collect(),
            factory: leaf.factory.clone(),
        };
        debug!(
            class = %entry.name,
            version = entry.version,
            bins = entry.bins.len(),
            "compiled class entry"
        );
        Ok(entry)
    }

    fn validate_member(&self, class: &str, member: &MemberDescriptor) -> ModelResult<()> {
        let name = || member.name.clone();
        self.check_enums(&member.ty)?;

        if member.embed.is_some() && member.reference.is_some() {
            return Err(ModelError::ConflictingPolicies {
                class: class.to_string(),
                member: name(),
            });
        }

        if member.generation && !matches!(member.ty, TypeRef::Int(_)) {
            return Err(ModelError::InvalidGeneration {
                class: class.to_string(),
                member: name(),
            });
        }

        if let Some(reference) = &member.reference {
            if reference.lazy && reference.kind == ReferenceKind::Digest {
                return Err(ModelError::LazyDigestReference {
                    class: class.to_string(),
                    member: name(),
                });
            }
            let Some(target) = member.ty.object_class() else {
                return Err(ModelError::InvalidReference {
                    class: class.to_string(),
                    member: name(),
                    reason: format!("{} is not an object type", member.ty),
                });
            };
            // A digest cannot be turned back into a user key.
            if reference.kind == ReferenceKind::Digest && !self.stores_key_as_bin(target)? {
                return Err(ModelError::InvalidReference {
                    class: class.to_string(),
                    member: name(),
                    reason: format!("digest references need {target} to store its key as a bin"),
                });
            }
        }

        if let Some(embed) = &member.embed {
            let invalid = |reason: String| ModelError::InvalidEmbed {
                class: class.to_string(),
                member: name(),
                reason,
            };
            if member.ty.object_class().is_none() {
                return Err(invalid(format!("{} is not an object type", member.ty)));
            }
            if let TypeRef::List(element) | TypeRef::Array(element) = &member.ty {
                if embed.kind == Some(EmbedKind::Map) {
                    // A map-embedded collection is indexed by each element's key.
                    let TypeRef::Object(target) = element.as_ref() else {
                        return Err(invalid("map embedding needs object elements".into()));
                    };
                    if !self.has_key(target)? {
                        return Err(invalid(format!("{target} has no key to index by")));
                    }
                }
            }
        }
        Ok(())
    }
}
