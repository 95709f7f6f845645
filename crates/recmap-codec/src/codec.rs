//! The graph codec: objects to bins and back.
//!
//! ## Stored forms
//!
//! A top-level record holds one bin per member valid at the class's schema
//! version. An embedded object is stored in one of two forms:
//!
//! - **map**: `{bin name: value}`, plus `"@type": short_name` when the
//!   runtime class differs from the declared class.
//! - **list**: one slot per bin valid at the writer's version, in ordinal
//!   order, followed by `"v{N}"` when the version is above 1 and then
//!   `"@{short_name}"` when the runtime class differs from the declared one.
//!
//! Decoding a list reads the slots against the writer's version and keeps
//! only the bins the reader's version also has. Every other member gets its
//! zero value. A bin missing from a record or map that the reader's version
//! does have decodes as null, since nil values are never stored.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use recmap_model::{
    AccessContext, BinMapping, ClassEntry, ClassModel, ConstructorArgs, EmbedKind, Factory,
    ModelError,
};
use recmap_types::{FieldValue, Key, Object, ObjectRef, Record, Value};

use crate::error::{CodecError, CodecResult};
use crate::mapper::{
    decode_value, encode_value, native_from_store, native_to_store, DecodeCx, EncodeCx,
    ValueMapper, TYPE_MARKER,
};
use crate::registry::{BinContext, MapperRegistry};
use crate::session::Session;

/// Encodes and decodes object graphs against compiled class entries.
#[derive(Debug)]
pub struct GraphCodec {
    model: Arc<ClassModel>,
    registry: MapperRegistry,
}

impl GraphCodec {
    pub fn new(model: Arc<ClassModel>) -> Self {
        Self {
            registry: MapperRegistry::new(Arc::clone(&model)),
            model,
        }
    }

    pub fn model(&self) -> &ClassModel {
        &self.model
    }

    pub fn registry(&self) -> &MapperRegistry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Keys
    // -----------------------------------------------------------------------

    /// Record key of a mapped object.
    pub fn key_of(&self, object: &ObjectRef) -> CodecResult<Key> {
        let entry = self.model.entry(&object.class())?;
        self.key_for_entry(&entry, &object.snapshot())
    }

    pub fn key_for_entry(&self, entry: &ClassEntry, object: &Object) -> CodecResult<Key> {
        self.key_for_value(entry, &entry.require_key()?.read(object))
    }

    /// Record key of `entry` for an already-encoded user key.
    pub fn key_from_value(&self, entry: &ClassEntry, user_key: Value) -> CodecResult<Key> {
        let namespace = entry.require_namespace()?;
        Ok(Key::new(namespace, entry.set(), user_key)?)
    }

    /// Record key of `entry` for an in-memory key member value.
    pub fn key_for_value(&self, entry: &ClassEntry, value: &FieldValue) -> CodecResult<Key> {
        let mut cx = EncodeCx::new(self, None);
        let user_key = self.encode_key_value(entry, value, &mut cx)?;
        self.key_from_value(entry, user_key)
    }

    /// Encode the key member of `object` to its stored form.
    pub fn encode_key_member(
        &self,
        entry: &ClassEntry,
        object: &Object,
        cx: &mut EncodeCx<'_>,
    ) -> CodecResult<Value> {
        let value = entry.require_key()?.read(object);
        self.encode_key_value(entry, &value, cx)
    }

    fn encode_key_value(
        &self,
        entry: &ClassEntry,
        value: &FieldValue,
        cx: &mut EncodeCx<'_>,
    ) -> CodecResult<Value> {
        let key = entry.require_key()?;
        if value.is_null() {
            return Err(CodecError::MissingKeyValue {
                class: entry.name.clone(),
            });
        }
        let mapper = self
            .registry
            .mapper_for(&key.ty, &BinContext::none(), false)?;
        mapper.to_store(value, cx)
    }

    /// Decode a stored user key into the value of the key member.
    pub fn decode_key_member(
        &self,
        entry: &ClassEntry,
        stored: &Value,
        cx: &mut DecodeCx<'_>,
    ) -> CodecResult<FieldValue> {
        let key = entry.require_key()?;
        let mapper = self
            .registry
            .mapper_for(&key.ty, &BinContext::none(), false)?;
        decode_value(mapper.as_ref(), stored, cx)
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Key and bins for writing `object` as a record.
    pub fn encode_record(&self, object: &ObjectRef) -> CodecResult<(Key, BTreeMap<String, Value>)> {
        self.encode_selected(object, None)
    }

    /// Key and the named bins only. Members may be given by member or bin name.
    pub fn encode_bins(
        &self,
        object: &ObjectRef,
        members: &[&str],
    ) -> CodecResult<(Key, BTreeMap<String, Value>)> {
        self.encode_selected(object, Some(members))
    }

    fn encode_selected(
        &self,
        object: &ObjectRef,
        members: Option<&[&str]>,
    ) -> CodecResult<(Key, BTreeMap<String, Value>)> {
        let entry = self.model.entry(&object.class())?;
        let snapshot = object.snapshot();
        let key = self.key_for_entry(&entry, &snapshot)?;

        let selected: Vec<&BinMapping> = match members {
            None => entry.bins_for_version(entry.version).collect(),
            Some(members) => {
                let mut selected = Vec::with_capacity(members.len());
                for name in members {
                    let bin = entry
                        .bin_by_member(name)
                        .or_else(|| entry.bin_by_name(name))
                        .ok_or_else(|| ModelError::UnknownMember {
                            class: entry.name.clone(),
                            member: name.to_string(),
                        })?;
                    selected.push(bin);
                }
                selected
            }
        };

        let mut cx = EncodeCx::new(self, key.user_key.clone());
        cx.enter(object, &entry.name)?;
        let mut bins = BTreeMap::new();
        for bin in selected {
            bins.insert(bin.name.clone(), self.encode_bin(bin, &snapshot, &mut cx)?);
        }
        cx.leave();
        Ok((key, bins))
    }

    /// Decode `record` as a root of `session`.
    ///
    /// The root is registered under its key before decoding, so references
    /// back to it resolve to the same handle.
    pub fn decode_record(
        &self,
        entry: &ClassEntry,
        key: &Key,
        record: &Record,
        session: &mut Session,
    ) -> CodecResult<ObjectRef> {
        let handle = session.root(&entry.name, key);
        self.decode_into(&handle, entry, key, record, session)?;
        Ok(handle)
    }

    /// Decode `record` and hydrate `handle` with the result.
    pub fn decode_into(
        &self,
        handle: &ObjectRef,
        entry: &ClassEntry,
        key: &Key,
        record: &Record,
        session: &mut Session,
    ) -> CodecResult<()> {
        let mut cx = DecodeCx::new(self, session, key.user_key.clone());
        let mut values = Vec::with_capacity(entry.bins.len());
        for bin in &entry.bins {
            values.push(match record.bins.get(&bin.name) {
                Some(stored) if bin.valid_at(entry.version) => {
                    self.decode_bin(bin, stored, &mut cx)?
                }
                _ => absent_value(entry, bin),
            });
        }

        let key_value = match (&entry.key, &key.user_key) {
            (Some(mapping), Some(user_key))
                if mapping
                    .bin
                    .as_ref()
                    .map_or(true, |bin| !record.bins.contains_key(bin)) =>
            {
                Some(self.decode_key_member(entry, user_key, &mut cx)?)
            }
            _ => None,
        };

        let object = self.construct(entry, values, key_value, Some(record.generation), &cx)?;
        handle.replace(object);
        cx.session.mark_hydrated(handle);
        cx.session.track(handle.clone());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bins
    // -----------------------------------------------------------------------

    fn mapper(&self, bin: &BinMapping) -> CodecResult<Arc<dyn ValueMapper>> {
        self.registry
            .mapper_for(&bin.ty, &BinContext::for_bin(bin), false)
    }

    fn encode_bin(
        &self,
        bin: &BinMapping,
        object: &Object,
        cx: &mut EncodeCx<'_>,
    ) -> CodecResult<Value> {
        let value = {
            let access = AccessContext {
                owner_key: cx.owner_key.as_ref(),
            };
            bin.read(object, &access)
        };
        if !self.registry.is_overridden(&bin.ty) {
            if let Some(stored) = native_to_store(&bin.ty, &value) {
                return Ok(stored);
            }
        }
        encode_value(self.mapper(bin)?.as_ref(), &value, cx)
    }

    fn decode_bin(
        &self,
        bin: &BinMapping,
        stored: &Value,
        cx: &mut DecodeCx<'_>,
    ) -> CodecResult<FieldValue> {
        if !self.registry.is_overridden(&bin.ty) {
            if let Some(value) = native_from_store(&bin.ty, stored) {
                return Ok(value);
            }
        }
        decode_value(self.mapper(bin)?.as_ref(), stored, cx)
    }

    // -----------------------------------------------------------------------
    // Embedded objects
    // -----------------------------------------------------------------------

    /// Encode `object` inline in its parent.
    ///
    /// With `declared` set, the discriminator is written only when the
    /// runtime class differs; without it, always. `skip_key` leaves the key
    /// bin out (map form) or empty (list form).
    pub fn encode_embedded(
        &self,
        object: &ObjectRef,
        declared: Option<&str>,
        form: EmbedKind,
        skip_key: bool,
        cx: &mut EncodeCx<'_>,
    ) -> CodecResult<Value> {
        let runtime = object.class();
        let entry = self.model.entry(&runtime)?;
        let tagged = match declared {
            Some(declared) if !entry.is_subclass_of(declared) => {
                return Err(ModelError::NotASubclass {
                    declared: declared.to_string(),
                    class: runtime,
                }
                .into())
            }
            Some(declared) => declared != runtime,
            None => true,
        };

        cx.enter(object, &runtime)?;
        let snapshot = object.snapshot();
        let encoded = self.encode_fields(&entry, &snapshot, form, skip_key, tagged, cx);
        cx.leave();
        encoded
    }

    fn encode_fields(
        &self,
        entry: &ClassEntry,
        object: &Object,
        form: EmbedKind,
        skip_key: bool,
        tagged: bool,
        cx: &mut EncodeCx<'_>,
    ) -> CodecResult<Value> {
        match form {
            EmbedKind::Map => {
                let mut map = BTreeMap::new();
                for bin in entry.bins_for_version(entry.version) {
                    if skip_key && bin.is_key {
                        continue;
                    }
                    let value = self.encode_bin(bin, object, cx)?;
                    if !value.is_nil() {
                        map.insert(Value::Str(bin.name.clone()), value);
                    }
                }
                if tagged {
                    map.insert(Value::from(TYPE_MARKER), Value::Str(entry.short_name.clone()));
                }
                Ok(Value::Map(map))
            }
            EmbedKind::List => {
                let mut slots = Vec::with_capacity(entry.bins.len() + 2);
                for bin in entry.bins_for_version(entry.version) {
                    slots.push(if skip_key && bin.is_key {
                        Value::Nil
                    } else {
                        self.encode_bin(bin, object, cx)?
                    });
                }
                if entry.version > 1 {
                    slots.push(Value::Str(format!("v{}", entry.version)));
                }
                if tagged {
                    slots.push(Value::Str(format!("@{}", entry.short_name)));
                }
                Ok(Value::List(slots))
            }
        }
    }

    /// Decode an embedded object from either stored form.
    ///
    /// `key` overrides the key member, for elements whose key lives in the
    /// enclosing collection.
    pub fn decode_embedded(
        &self,
        value: &Value,
        declared: Option<&str>,
        key: Option<FieldValue>,
        cx: &mut DecodeCx<'_>,
    ) -> CodecResult<ObjectRef> {
        let (entry, values) = match value {
            Value::Map(map) => self.decode_map_form(map, declared, cx)?,
            Value::List(items) => self.decode_list_form(items, declared, cx)?,
            other => {
                return Err(CodecError::invalid(
                    declared.unwrap_or("embedded object"),
                    other,
                ))
            }
        };
        let object = self.construct(&entry, values, key, None, cx)?;
        let handle = ObjectRef::new(object);
        cx.session.track(handle.clone());
        Ok(handle)
    }

    /// Entry for a stored discriminator, restricted to `declared` and its
    /// subclasses when known.
    fn discriminated(
        &self,
        declared: Option<&str>,
        short_name: Option<&str>,
    ) -> CodecResult<Arc<ClassEntry>> {
        match (declared, short_name) {
            (Some(declared), Some(short_name)) => {
                Ok(self.model.subclass_for(declared, short_name)?)
            }
            (Some(declared), None) => Ok(self.model.entry(declared)?),
            (None, Some(short_name)) => {
                let class = self.model.class_for_short_name(short_name).ok_or_else(|| {
                    ModelError::UnknownDiscriminator {
                        declared: "any".into(),
                        short_name: short_name.to_string(),
                    }
                })?;
                Ok(self.model.entry(&class)?)
            }
            (None, None) => Err(CodecError::MalformedDiscriminator(
                "dynamically typed object without a type marker".into(),
            )),
        }
    }

    fn decode_map_form(
        &self,
        map: &BTreeMap<Value, Value>,
        declared: Option<&str>,
        cx: &mut DecodeCx<'_>,
    ) -> CodecResult<(Arc<ClassEntry>, Vec<FieldValue>)> {
        let short_name = match map.get(&Value::from(TYPE_MARKER)) {
            None => None,
            Some(Value::Str(short_name)) => Some(short_name.as_str()),
            Some(other) => return Err(CodecError::MalformedDiscriminator(other.to_string())),
        };
        let entry = self.discriminated(declared, short_name)?;

        let mut values = Vec::with_capacity(entry.bins.len());
        for bin in &entry.bins {
            values.push(match map.get(&Value::Str(bin.name.clone())) {
                Some(stored) if bin.valid_at(entry.version) => self.decode_bin(bin, stored, cx)?,
                _ => absent_value(&entry, bin),
            });
        }
        Ok((entry, values))
    }

    fn decode_list_form(
        &self,
        items: &[Value],
        declared: Option<&str>,
        cx: &mut DecodeCx<'_>,
    ) -> CodecResult<(Arc<ClassEntry>, Vec<FieldValue>)> {
        let (slots, version, short_name) = split_markers(items);
        let marked = self.discriminated(declared, short_name);
        if let Ok(entry) = &marked {
            if entry.bins_for_version(version).count() == slots.len() {
                let values = self.read_slots(entry, slots, version, cx)?;
                return Ok((Arc::clone(entry), values));
            }
        }
        // A trailing string slot can look like a marker; retry as unmarked.
        if short_name.is_some() || version > 1 {
            if let Ok(entry) = self.discriminated(declared, None) {
                if entry.bins_for_version(1).count() == items.len() {
                    let values = self.read_slots(&entry, items, 1, cx)?;
                    return Ok((entry, values));
                }
            }
        }
        let entry = marked?;
        Err(CodecError::InvalidStoredValue {
            expected: format!(
                "{} slots for {} v{version}",
                entry.bins_for_version(version).count(),
                entry.name
            ),
            found: format!("{} slots", slots.len()),
        })
    }

    /// Decode list slots written at `version` into values aligned with
    /// `entry.bins`.
    fn read_slots(
        &self,
        entry: &ClassEntry,
        slots: &[Value],
        version: u32,
        cx: &mut DecodeCx<'_>,
    ) -> CodecResult<Vec<FieldValue>> {
        let mut decoded: HashMap<&str, FieldValue> = HashMap::new();
        for (bin, stored) in entry.bins_for_version(version).zip(slots) {
            if bin.valid_at(entry.version) {
                decoded.insert(bin.name.as_str(), self.decode_bin(bin, stored, cx)?);
            }
        }
        Ok(entry
            .bins
            .iter()
            .map(|bin| {
                decoded
                    .remove(bin.name.as_str())
                    .unwrap_or_else(|| bin.ty.zero_value())
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Build an instance of `entry` from decoded member values.
    ///
    /// `values` is either aligned with `entry.bins` or empty, for a key-only
    /// placeholder. Members bound to constructor parameters go to the
    /// factory; the rest are assigned through their setters. `key` wins over
    /// any decoded key bin.
    pub(crate) fn construct(
        &self,
        entry: &ClassEntry,
        values: Vec<FieldValue>,
        key: Option<FieldValue>,
        generation: Option<u32>,
        cx: &DecodeCx<'_>,
    ) -> CodecResult<Object> {
        let access = AccessContext {
            owner_key: cx.owner_key.as_ref(),
        };
        let members = entry.bins.iter().zip(values);
        let (mut object, setters, key_injected) = match &entry.factory {
            Factory::Default => (Object::new(&entry.name), members.collect::<Vec<_>>(), false),
            Factory::Constructor { build, .. } => {
                let mut args = ConstructorArgs::new();
                let mut setters = Vec::new();
                for (bin, value) in members {
                    if bin.constructor_param {
                        args.insert(bin.member.clone(), value);
                    } else {
                        setters.push((bin, value));
                    }
                }
                let mut key_injected = false;
                if let (Some(mapping), Some(key)) = (&entry.key, &key) {
                    if mapping.constructor_param {
                        args.insert(mapping.member.clone(), key.clone());
                        key_injected = true;
                    }
                }
                let object = build(&entry.name, args).map_err(|reason| {
                    CodecError::Construction {
                        class: entry.name.clone(),
                        reason,
                    }
                })?;
                (object, setters, key_injected)
            }
        };

        for (bin, value) in setters {
            // Read-only members without a constructor binding are skipped.
            bin.write(&mut object, value, &access);
        }
        if let (Some(mapping), Some(key)) = (&entry.key, key) {
            if !key_injected {
                mapping.write(&mut object, key);
            }
        }
        if let (Some(mapping), Some(generation)) = (&entry.generation, generation) {
            mapping.accessor.write(
                &mapping.member,
                &mut object,
                FieldValue::Int(i64::from(generation)),
                &access,
            );
        }
        Ok(object)
    }
}

/// Value of a bin the stored map or record does not carry.
fn absent_value(entry: &ClassEntry, bin: &BinMapping) -> FieldValue {
    if bin.valid_at(entry.version) {
        FieldValue::Null
    } else {
        bin.ty.zero_value()
    }
}

/// Split trailing `"v{N}"` and `"@{short_name}"` markers off a list-form
/// object.
fn split_markers(items: &[Value]) -> (&[Value], u32, Option<&str>) {
    let mut end = items.len();
    let mut short_name = None;
    if let Some(Value::Str(marker)) = items[..end].last() {
        if let Some(name) = marker.strip_prefix('@') {
            short_name = Some(name);
            end -= 1;
        }
    }
    let mut version = 1;
    if let Some(Value::Str(marker)) = items[..end].last() {
        if let Some(v) = marker
            .strip_prefix('v')
            .and_then(|digits| digits.parse::<u32>().ok())
            .filter(|v| *v > 1)
        {
            version = v;
            end -= 1;
        }
    }
    (&items[..end], version, short_name)
}
