//! Declared member types and enum descriptors.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use recmap_types::FieldValue;

use crate::error::{ModelError, ModelResult};

/// Width of a declared integer member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
}

impl IntKind {
    /// Inclusive range of values the member can hold.
    pub fn range(&self) -> (i64, i64) {
        match self {
            Self::I8 => (i8::MIN as i64, i8::MAX as i64),
            Self::I16 => (i16::MIN as i64, i16::MAX as i64),
            Self::I32 => (i32::MIN as i64, i32::MAX as i64),
            Self::I64 => (i64::MIN, i64::MAX),
            Self::U8 => (0, u8::MAX as i64),
            Self::U16 => (0, u16::MAX as i64),
            Self::U32 => (0, u32::MAX as i64),
        }
    }
}

/// Width of a declared floating-point member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FloatKind {
    F32,
    F64,
}

/// Date and time member types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TemporalKind {
    /// Wall-clock date, millisecond precision.
    Timestamp,
    /// UTC instant, nanosecond precision.
    Instant,
    /// Calendar date.
    Date,
    /// Time of day, nanosecond precision.
    Time,
    /// Date and time without zone, nanosecond precision.
    DateTime,
}

/// The statically declared type of a member.
///
/// Mapper dispatch is driven by this type, never by the runtime value,
/// except for [`TypeRef::Any`] which dispatches per value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Bool,
    Int(IntKind),
    Float(FloatKind),
    Char,
    Str,
    Bytes,
    BigInt,
    Temporal(TemporalKind),
    /// A registered enum, by name.
    Enum(String),
    /// Fixed-shape sequence.
    Array(Box<TypeRef>),
    /// Growable sequence.
    List(Box<TypeRef>),
    Map(Box<TypeRef>, Box<TypeRef>),
    /// A registered class, by name.
    Object(String),
    /// An application type only a registered custom mapper understands.
    Named(String),
    /// Statically unknown; dispatched on the runtime value.
    Any,
}

impl TypeRef {
    pub fn list(element: TypeRef) -> Self {
        Self::List(Box::new(element))
    }

    pub fn array(element: TypeRef) -> Self {
        Self::Array(Box::new(element))
    }

    pub fn map(key: TypeRef, value: TypeRef) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    pub fn object(class: impl Into<String>) -> Self {
        Self::Object(class.into())
    }

    pub fn enumeration(name: impl Into<String>) -> Self {
        Self::Enum(name.into())
    }

    /// Whether the mapper for this type depends on surrounding context or
    /// on other types, and therefore cannot be cached on the type alone.
    pub fn is_parametric(&self) -> bool {
        matches!(
            self,
            Self::Array(_) | Self::List(_) | Self::Map(_, _) | Self::Object(_)
        )
    }

    /// Whether values of this type are stored without any translation.
    pub fn is_native(&self) -> bool {
        matches!(
            self,
            Self::Int(IntKind::I64) | Self::Float(FloatKind::F64) | Self::Str | Self::Bytes
        )
    }

    /// The class this type names, looking through one level of collection.
    pub fn object_class(&self) -> Option<&str> {
        match self {
            Self::Object(class) => Some(class),
            Self::Array(element) | Self::List(element) | Self::Map(_, element) => {
                match element.as_ref() {
                    Self::Object(class) => Some(class),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Value given to a member whose bin is absent.
    pub fn zero_value(&self) -> FieldValue {
        match self {
            Self::Bool => FieldValue::Bool(false),
            Self::Int(_) => FieldValue::Int(0),
            Self::Float(_) => FieldValue::Float(0.0),
            Self::Char => FieldValue::Char('\0'),
            _ => FieldValue::Null,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int(kind) => write!(f, "{}", format!("{kind:?}").to_lowercase()),
            Self::Float(kind) => write!(f, "{}", format!("{kind:?}").to_lowercase()),
            Self::Char => write!(f, "char"),
            Self::Str => write!(f, "string"),
            Self::Bytes => write!(f, "bytes"),
            Self::BigInt => write!(f, "bigint"),
            Self::Temporal(kind) => write!(f, "{kind:?}"),
            Self::Enum(name) => write!(f, "enum {name}"),
            Self::Array(element) => write!(f, "[{element}]"),
            Self::List(element) => write!(f, "list<{element}>"),
            Self::Map(key, value) => write!(f, "map<{key}, {value}>"),
            Self::Object(class) => write!(f, "{class}"),
            Self::Named(name) => write!(f, "{name}"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// A registered enum: its constants and how they are stored.
///
/// Constants are stored by name unless a value field is designated, in
/// which case each constant is stored as that field's value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumDescriptor {
    pub name: String,
    pub constants: Vec<String>,
    pub value_field: Option<EnumValueField>,
}

/// Designated per-constant stored values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumValueField {
    pub field: String,
    /// Constant name to stored value.
    pub values: BTreeMap<String, String>,
}

impl EnumDescriptor {
    pub fn new<I, S>(name: impl Into<String>, constants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            constants: constants.into_iter().map(Into::into).collect(),
            value_field: None,
        }
    }

    /// Store each constant as the value of `field` instead of its name.
    pub fn with_value_field<I, K, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.value_field = Some(EnumValueField {
            field: field.into(),
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        });
        self
    }

    /// Check the constant list is usable for mapping.
    pub fn validate(&self) -> ModelResult<()> {
        let invalid = |reason: String| ModelError::InvalidEnum {
            name: self.name.clone(),
            reason,
        };
        if self.constants.is_empty() {
            return Err(invalid("no constants".into()));
        }
        let mut names = HashSet::new();
        for constant in &self.constants {
            if !names.insert(constant.as_str()) {
                return Err(invalid(format!("duplicate constant {constant}")));
            }
        }
        if let Some(field) = &self.value_field {
            let mut stored = HashSet::new();
            for constant in &self.constants {
                let value = field.values.get(constant).ok_or_else(|| {
                    invalid(format!("constant {constant} has no {} value", field.field))
                })?;
                if !stored.insert(value.as_str()) {
                    return Err(invalid(format!("duplicate {} value {value}", field.field)));
                }
            }
        }
        Ok(())
    }

    /// Stored form of a constant.
    pub fn stored_value(&self, constant: &str) -> Option<String> {
        if !self.constants.iter().any(|c| c == constant) {
            return None;
        }
        match &self.value_field {
            Some(field) => field.values.get(constant).cloned(),
            None => Some(constant.to_string()),
        }
    }

    /// Constant matching a stored value.
    pub fn constant_for(&self, stored: &str) -> Option<String> {
        match &self.value_field {
            Some(field) => field
                .values
                .iter()
                .find(|(_, value)| value.as_str() == stored)
                .map(|(constant, _)| constant.clone()),
            None => self
                .constants
                .iter()
                .find(|c| c.as_str() == stored)
                .cloned(),
        }
    }
}
