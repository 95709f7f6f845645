//! The in-memory object graph.
//!
//! Mapped instances are reflective objects: a class name plus a map of
//! member name to [`FieldValue`]. Instances are shared through [`ObjectRef`]
//! handles so that graphs may contain cycles and so that deferred references
//! can be hydrated in place after the owning object has been built.
//!
//! Equality is structural. Comparing two graphs walks both in lockstep and
//! treats a pair of handles already under comparison as equal, so cyclic
//! graphs compare without recursing forever.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A member value inside an [`Object`].
#[derive(Clone, Debug)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    Bytes(Vec<u8>),
    BigInt(i128),
    /// Wall-clock date with millisecond precision.
    Timestamp(DateTime<Utc>),
    /// Point on the UTC timeline with nanosecond precision.
    Instant(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    /// Enum constant, by constant name.
    Enum(String),
    List(Vec<FieldValue>),
    /// Key/value pairs. Entry order carries no meaning.
    Map(Vec<(FieldValue, FieldValue)>),
    Object(ObjectRef),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Char(_) => "char",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::BigInt(_) => "bigint",
            Self::Timestamp(_) => "timestamp",
            Self::Instant(_) => "instant",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::DateTime(_) => "datetime",
            Self::Enum(_) => "enum",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    fn graph_eq(&self, other: &Self, seen: &mut HashSet<(usize, usize)>) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b || a.to_bits() == b.to_bits(),
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Instant(a), Self::Instant(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Time(a), Self::Time(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            (Self::Enum(a), Self::Enum(b)) => a == b,
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.graph_eq(y, seen))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter()
                            .any(|(k2, v2)| k.graph_eq(k2, seen) && v.graph_eq(v2, seen))
                    })
            }
            (Self::Object(a), Self::Object(b)) => a.graph_eq(b, seen),
            _ => false,
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        self.graph_eq(other, &mut HashSet::new())
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<char> for FieldValue {
    fn from(v: char) -> Self {
        Self::Char(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(v: Vec<FieldValue>) -> Self {
        Self::List(v)
    }
}

impl From<ObjectRef> for FieldValue {
    fn from(v: ObjectRef) -> Self {
        Self::Object(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// A reflective instance of a mapped class.
#[derive(Clone, Debug)]
pub struct Object {
    /// Name of the class this instance belongs to.
    pub class: String,
    /// Member name to value. Members never set are simply absent.
    pub fields: BTreeMap<String, FieldValue>,
}

impl Object {
    /// Create an instance with no members set.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style member assignment.
    pub fn with(mut self, member: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(member.into(), value.into());
        self
    }

    pub fn get(&self, member: &str) -> Option<&FieldValue> {
        self.fields.get(member)
    }

    pub fn set(&mut self, member: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(member.into(), value.into());
    }

    /// Wrap the instance in a shared handle.
    pub fn into_ref(self) -> ObjectRef {
        ObjectRef::new(self)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        let mut seen = HashSet::new();
        fields_eq(&self.class, &self.fields, &other.class, &other.fields, &mut seen)
    }
}

fn fields_eq(
    class_a: &str,
    fields_a: &BTreeMap<String, FieldValue>,
    class_b: &str,
    fields_b: &BTreeMap<String, FieldValue>,
    seen: &mut HashSet<(usize, usize)>,
) -> bool {
    class_a == class_b
        && fields_a.len() == fields_b.len()
        && fields_a.iter().all(|(name, value)| {
            fields_b
                .get(name)
                .is_some_and(|other| value.graph_eq(other, seen))
        })
}

/// Shared, mutable handle to an [`Object`].
///
/// Cloning the handle shares the instance. Locks are `parking_lot` locks and
/// are never held across calls back into the mapper.
#[derive(Clone)]
pub struct ObjectRef(Arc<RwLock<Object>>);

impl ObjectRef {
    pub fn new(object: Object) -> Self {
        Self(Arc::new(RwLock::new(object)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Object> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Object> {
        self.0.write()
    }

    /// Class name of the referenced instance.
    pub fn class(&self) -> String {
        self.0.read().class.clone()
    }

    /// Clone of a member value.
    pub fn get(&self, member: &str) -> Option<FieldValue> {
        self.0.read().fields.get(member).cloned()
    }

    pub fn set(&self, member: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.write().fields.insert(member.into(), value.into());
    }

    /// Swap the instance behind the handle, returning the previous one.
    ///
    /// Every holder of this handle observes the new instance.
    pub fn replace(&self, object: Object) -> Object {
        std::mem::replace(&mut *self.0.write(), object)
    }

    /// Clone of the instance behind the handle.
    pub fn snapshot(&self) -> Object {
        self.0.read().clone()
    }

    /// Whether both handles share the same instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable address of the shared instance, for identity-keyed bookkeeping.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    fn graph_eq(&self, other: &Self, seen: &mut HashSet<(usize, usize)>) -> bool {
        if self.ptr_eq(other) || !seen.insert((self.addr(), other.addr())) {
            return true;
        }
        let a = self.snapshot();
        let b = other.snapshot();
        fields_eq(&a.class, &a.fields, &b.class, &b.fields, seen)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.graph_eq(other, &mut HashSet::new())
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(obj) => write!(f, "ObjectRef({}@{:#x})", obj.class, self.addr()),
            None => write!(f, "ObjectRef(<locked>@{:#x})", self.addr()),
        }
    }
}

impl From<Object> for ObjectRef {
    fn from(object: Object) -> Self {
        Self::new(object)
    }
}
