//! Value mapper dispatch.
//!
//! [`MapperRegistry::mapper_for`] picks the mapper for a declared type in a
//! fixed order, first match wins:
//!
//! 1. a mapper registered for exactly that type
//! 2. built-in scalar, temporal and big-number mappers
//! 3. enums
//! 4. arrays (byte arrays pass through as blobs)
//! 5. maps
//! 6. lists, honouring the member's embed policy
//! 7. embedded-object or reference mappers
//! 8. the dynamic passthrough for [`TypeRef::Any`]
//!
//! Mappers for non-parametric types are cached per registry. Collection and
//! object mappers depend on the member's policies and are rebuilt per call.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use recmap_model::{
    BinMapping, ClassModel, EmbedKind, EmbedSpec, IntKind, ModelError, ReferenceSpec, TypeRef,
};

use crate::error::{CodecError, CodecResult};
use crate::mapper::{
    AnyMapper, BigIntMapper, BoolMapper, BytesMapper, CharMapper, EnumMapper, FloatMapper,
    IntMapper, StrMapper, TemporalMapper, ValueMapper,
};
use crate::structural::{
    EmbeddedObjectMapper, KeyedCollectionMapper, ListMapper, MapMapper, ReferenceMapper,
};

/// Mapping policies of the member being transcoded.
#[derive(Clone, Copy, Debug, Default)]
pub struct BinContext<'a> {
    pub embed: Option<&'a EmbedSpec>,
    pub reference: Option<&'a ReferenceSpec>,
}

impl<'a> BinContext<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_bin(bin: &'a BinMapping) -> Self {
        Self {
            embed: bin.embed.as_ref(),
            reference: bin.reference.as_ref(),
        }
    }
}

pub struct MapperRegistry {
    model: Arc<ClassModel>,
    custom: RwLock<HashMap<TypeRef, Arc<dyn ValueMapper>>>,
    cache: DashMap<TypeRef, Arc<dyn ValueMapper>>,
}

impl MapperRegistry {
    pub fn new(model: Arc<ClassModel>) -> Self {
        Self {
            model,
            custom: RwLock::new(HashMap::new()),
            cache: DashMap::new(),
        }
    }

    /// Use `mapper` for every member declared with exactly `ty`.
    pub fn register(&self, ty: TypeRef, mapper: Arc<dyn ValueMapper>) {
        self.custom.write().insert(ty, mapper);
        self.cache.clear();
    }

    /// Whether a mapper was registered for exactly `ty`.
    pub fn is_overridden(&self, ty: &TypeRef) -> bool {
        self.custom.read().contains_key(ty)
    }

    /// Number of cached stateless mappers.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Mapper for a member of type `ty` with policies `cx`. `element` is set
    /// when `ty` is the element type of a collection.
    pub fn mapper_for(
        &self,
        ty: &TypeRef,
        cx: &BinContext<'_>,
        element: bool,
    ) -> CodecResult<Arc<dyn ValueMapper>> {
        if let Some(mapper) = self.custom.read().get(ty) {
            return Ok(Arc::clone(mapper));
        }
        if ty.is_parametric() {
            return self.structural(ty, cx, element);
        }
        if let Some(mapper) = self.cache.get(ty) {
            return Ok(Arc::clone(mapper.value()));
        }
        let built = self.stateless(ty)?;
        let mapper = self.cache.entry(ty.clone()).or_insert(built);
        Ok(Arc::clone(mapper.value()))
    }

    fn stateless(&self, ty: &TypeRef) -> CodecResult<Arc<dyn ValueMapper>> {
        let mapper: Arc<dyn ValueMapper> = match ty {
            TypeRef::Bool => Arc::new(BoolMapper),
            TypeRef::Int(kind) => Arc::new(IntMapper(*kind)),
            TypeRef::Float(kind) => Arc::new(FloatMapper(*kind)),
            TypeRef::Char => Arc::new(CharMapper),
            TypeRef::Str => Arc::new(StrMapper),
            TypeRef::Bytes => Arc::new(BytesMapper),
            TypeRef::BigInt => Arc::new(BigIntMapper),
            TypeRef::Temporal(kind) => Arc::new(TemporalMapper(*kind)),
            TypeRef::Enum(name) => Arc::new(EnumMapper::new(self.model.enum_descriptor(name)?)),
            TypeRef::Any => Arc::new(AnyMapper),
            TypeRef::Named(name) => return Err(CodecError::NoMapper(name.clone())),
            TypeRef::Array(_) | TypeRef::List(_) | TypeRef::Map(_, _) | TypeRef::Object(_) => {
                return Err(CodecError::NoMapper(ty.to_string()))
            }
        };
        Ok(mapper)
    }

    fn structural(
        &self,
        ty: &TypeRef,
        cx: &BinContext<'_>,
        element: bool,
    ) -> CodecResult<Arc<dyn ValueMapper>> {
        match ty {
            TypeRef::Array(inner) if matches!(**inner, TypeRef::Int(IntKind::I8 | IntKind::U8)) => {
                Ok(Arc::new(BytesMapper))
            }
            TypeRef::Array(inner) | TypeRef::List(inner) => {
                if cx.embed.and_then(|e| e.kind) == Some(EmbedKind::Map) {
                    let TypeRef::Object(class) = inner.as_ref() else {
                        return Err(ModelError::InvalidEmbed {
                            class: ty.to_string(),
                            member: String::new(),
                            reason: "map embedding needs object elements".into(),
                        }
                        .into());
                    };
                    let spec = cx.embed.cloned().unwrap_or_default();
                    return Ok(Arc::new(KeyedCollectionMapper::new(
                        class.clone(),
                        spec.element_kind.unwrap_or(EmbedKind::Map),
                        spec.save_key,
                    )));
                }
                let mapper = self.mapper_for(inner, cx, true)?;
                let list = ListMapper::new((**inner).clone(), mapper);
                if self.is_overridden(inner) {
                    Ok(Arc::new(list.dispatch_all()))
                } else {
                    Ok(Arc::new(list))
                }
            }
            TypeRef::Map(key, value) => {
                let key = self.mapper_for(key, &BinContext::none(), true)?;
                let value = self.mapper_for(value, cx, true)?;
                Ok(Arc::new(MapMapper::new(key, value)))
            }
            TypeRef::Object(class) => self.object_mapper(class, cx, element),
            other => self.stateless(other),
        }
    }

    /// Reference or embedded-object mapper, from the member's declared
    /// policy. Without one, classes with a key are referenced and keyless
    /// classes are embedded as maps.
    fn object_mapper(
        &self,
        class: &str,
        cx: &BinContext<'_>,
        element: bool,
    ) -> CodecResult<Arc<dyn ValueMapper>> {
        if let Some(reference) = cx.reference {
            return Ok(Arc::new(ReferenceMapper::new(class, reference.clone())));
        }
        if let Some(embed) = cx.embed {
            let form = if element {
                embed.element_kind
            } else {
                embed.kind
            };
            return Ok(Arc::new(EmbeddedObjectMapper::new(
                class,
                form.unwrap_or(EmbedKind::Map),
            )));
        }
        if self.model.entry(class)?.key.is_some() {
            Ok(Arc::new(ReferenceMapper::new(class, ReferenceSpec::default())))
        } else {
            Ok(Arc::new(EmbeddedObjectMapper::new(class, EmbedKind::Map)))
        }
    }
}

impl std::fmt::Debug for MapperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapperRegistry")
            .field("custom", &self.custom.read().len())
            .field("cached", &self.cache.len())
            .finish()
    }
}
