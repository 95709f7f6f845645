//! Mappers whose behaviour depends on element types or mapping policy:
//! collections, embedded objects and references.
//!
//! None of these are cached by the registry. They hold only type names and
//! policies, and look up compiled entries and element mappers when they
//! transcode, so building one never recurses through a cyclic type graph.

use std::collections::BTreeMap;
use std::sync::Arc;

use recmap_model::{EmbedKind, ReferenceKind, ReferenceSpec, TypeRef};
use recmap_types::{Digest, FieldValue, Key, Object, ObjectRef, Value};

use crate::error::{CodecError, CodecResult};
use crate::mapper::{
    decode_value, encode_value, native_from_store, native_to_store, DecodeCx, EncodeCx,
    ValueMapper,
};

/// Arrays and lists of anything but map-embedded objects.
///
/// Elements whose declared type the store holds natively skip dispatch,
/// unless a mapper was registered for that type.
#[derive(Debug)]
pub struct ListMapper {
    element_ty: TypeRef,
    element: Arc<dyn ValueMapper>,
    native: bool,
}

impl ListMapper {
    pub fn new(element_ty: TypeRef, element: Arc<dyn ValueMapper>) -> Self {
        Self {
            element_ty,
            element,
            native: true,
        }
    }

    /// Send every element through the element mapper.
    pub fn dispatch_all(mut self) -> Self {
        self.native = false;
        self
    }
}

impl ValueMapper for ListMapper {
    fn to_store(&self, value: &FieldValue, cx: &mut EncodeCx<'_>) -> CodecResult<Value> {
        let FieldValue::List(items) = value else {
            return Err(CodecError::mismatch(TypeRef::list(self.element_ty.clone()), value));
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let native = self
                .native
                .then(|| native_to_store(&self.element_ty, item))
                .flatten();
            out.push(match native {
                Some(stored) => stored,
                None => encode_value(self.element.as_ref(), item, cx)?,
            });
        }
        Ok(Value::List(out))
    }

    fn from_store(&self, value: &Value, cx: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
        let Value::List(items) = value else {
            return Err(CodecError::invalid(TypeRef::list(self.element_ty.clone()), value));
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let native = self
                .native
                .then(|| native_from_store(&self.element_ty, item))
                .flatten();
            out.push(match native {
                Some(decoded) => decoded,
                None => decode_value(self.element.as_ref(), item, cx)?,
            });
        }
        Ok(FieldValue::List(out))
    }
}

/// Maps with independently typed keys and values.
#[derive(Debug)]
pub struct MapMapper {
    key: Arc<dyn ValueMapper>,
    value: Arc<dyn ValueMapper>,
}

impl MapMapper {
    pub fn new(key: Arc<dyn ValueMapper>, value: Arc<dyn ValueMapper>) -> Self {
        Self { key, value }
    }
}

impl ValueMapper for MapMapper {
    fn to_store(&self, value: &FieldValue, cx: &mut EncodeCx<'_>) -> CodecResult<Value> {
        let FieldValue::Map(entries) = value else {
            return Err(CodecError::mismatch("map", value));
        };
        let mut out = BTreeMap::new();
        for (k, v) in entries {
            let k = encode_value(self.key.as_ref(), k, cx)?;
            let v = encode_value(self.value.as_ref(), v, cx)?;
            out.insert(k, v);
        }
        Ok(Value::Map(out))
    }

    fn from_store(&self, value: &Value, cx: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
        let Value::Map(entries) = value else {
            return Err(CodecError::invalid("map", value));
        };
        let mut out = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            out.push((
                decode_value(self.key.as_ref(), k, cx)?,
                decode_value(self.value.as_ref(), v, cx)?,
            ));
        }
        Ok(FieldValue::Map(out))
    }
}

/// A single object stored inline in its parent.
#[derive(Debug)]
pub struct EmbeddedObjectMapper {
    class: String,
    form: EmbedKind,
}

impl EmbeddedObjectMapper {
    pub fn new(class: impl Into<String>, form: EmbedKind) -> Self {
        Self {
            class: class.into(),
            form,
        }
    }
}

impl ValueMapper for EmbeddedObjectMapper {
    fn to_store(&self, value: &FieldValue, cx: &mut EncodeCx<'_>) -> CodecResult<Value> {
        let FieldValue::Object(object) = value else {
            return Err(CodecError::mismatch(&self.class, value));
        };
        let codec = cx.codec;
        codec.encode_embedded(object, Some(&self.class), self.form, false, cx)
    }

    fn from_store(&self, value: &Value, cx: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
        let codec = cx.codec;
        codec
            .decode_embedded(value, Some(&self.class), None, cx)
            .map(FieldValue::Object)
    }
}

/// A collection of objects stored as a map from each element's key to the
/// element.
///
/// Map order follows the store's key ordering, not insertion order. When
/// `save_key` is off the key bin is left out of each element and restored
/// from the map index on decode.
#[derive(Debug)]
pub struct KeyedCollectionMapper {
    class: String,
    element_form: EmbedKind,
    save_key: bool,
}

impl KeyedCollectionMapper {
    pub fn new(class: impl Into<String>, element_form: EmbedKind, save_key: bool) -> Self {
        Self {
            class: class.into(),
            element_form,
            save_key,
        }
    }
}

impl ValueMapper for KeyedCollectionMapper {
    fn to_store(&self, value: &FieldValue, cx: &mut EncodeCx<'_>) -> CodecResult<Value> {
        let FieldValue::List(items) = value else {
            return Err(CodecError::mismatch(
                TypeRef::list(TypeRef::object(&self.class)),
                value,
            ));
        };
        let codec = cx.codec;
        let mut out = BTreeMap::new();
        for item in items {
            let FieldValue::Object(object) = item else {
                return Err(CodecError::mismatch(&self.class, item));
            };
            let entry = codec.model().entry(&object.class())?;
            let key = codec.encode_key_member(&entry, &object.snapshot(), cx)?;
            let element = codec.encode_embedded(
                object,
                Some(&self.class),
                self.element_form,
                !self.save_key,
                cx,
            )?;
            out.insert(key, element);
        }
        Ok(Value::Map(out))
    }

    fn from_store(&self, value: &Value, cx: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
        let Value::Map(entries) = value else {
            return Err(CodecError::invalid(
                TypeRef::list(TypeRef::object(&self.class)),
                value,
            ));
        };
        let codec = cx.codec;
        let declared = codec.model().entry(&self.class)?;
        let mut out = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            let key = codec.decode_key_member(&declared, k, cx)?;
            let object = codec.decode_embedded(v, Some(&self.class), Some(key), cx)?;
            out.push(FieldValue::Object(object));
        }
        Ok(FieldValue::List(out))
    }
}

/// An object stored as a separate record, written as its key.
///
/// The stored form is the target's user key (or digest blob), or the pair
/// `[key, short_name]` when the runtime class differs from the declared one.
/// Decoding never fetches: eager references register a deferred reference
/// with the session, lazy ones produce a key-only placeholder.
#[derive(Debug)]
pub struct ReferenceMapper {
    class: String,
    spec: ReferenceSpec,
}

impl ReferenceMapper {
    pub fn new(class: impl Into<String>, spec: ReferenceSpec) -> Self {
        Self {
            class: class.into(),
            spec,
        }
    }
}

impl ValueMapper for ReferenceMapper {
    fn to_store(&self, value: &FieldValue, cx: &mut EncodeCx<'_>) -> CodecResult<Value> {
        let FieldValue::Object(object) = value else {
            return Err(CodecError::mismatch(&self.class, value));
        };
        let codec = cx.codec;
        let runtime = object.class();
        let entry = codec.model().entry(&runtime)?;
        if !entry.is_subclass_of(&self.class) {
            return Err(recmap_model::ModelError::NotASubclass {
                declared: self.class.clone(),
                class: runtime,
            }
            .into());
        }
        let key = codec.key_of(object)?;
        let stored = match self.spec.kind {
            ReferenceKind::Digest => Value::Blob(key.digest.as_bytes().to_vec()),
            ReferenceKind::Id => key.user_key.clone().ok_or_else(|| {
                CodecError::MissingKeyValue {
                    class: entry.name.clone(),
                }
            })?,
        };
        if entry.name == self.class {
            Ok(stored)
        } else {
            Ok(Value::List(vec![stored, Value::Str(entry.short_name.clone())]))
        }
    }

    fn from_store(&self, value: &Value, cx: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
        let codec = cx.codec;
        let (stored, entry) = match value {
            Value::List(pair) => match pair.as_slice() {
                [stored, Value::Str(short_name)] => {
                    (stored, codec.model().subclass_for(&self.class, short_name)?)
                }
                _ => return Err(CodecError::MalformedDiscriminator(value.to_string())),
            },
            _ => (value, codec.model().entry(&self.class)?),
        };

        let namespace = entry.require_namespace()?;
        let key = match self.spec.kind {
            ReferenceKind::Digest => {
                let bytes = stored
                    .as_blob()
                    .ok_or_else(|| CodecError::invalid("digest", stored))?;
                Key::from_digest(namespace, entry.set(), Digest::from_slice(bytes)?)
            }
            ReferenceKind::Id => Key::new(namespace, entry.set(), stored.clone())?,
        };

        if self.spec.lazy {
            let key_value = codec.decode_key_member(&entry, stored, cx)?;
            let placeholder = codec.construct(&entry, Vec::new(), Some(key_value), None, cx)?;
            return Ok(FieldValue::Object(ObjectRef::new(placeholder)));
        }
        Ok(FieldValue::Object(cx.session.reference(
            entry,
            key,
            self.spec.batch_load,
        )))
    }
}

/// Empty instance used as the shell for a record not yet fetched.
pub(crate) fn shell(class: &str) -> ObjectRef {
    ObjectRef::new(Object::new(class))
}
