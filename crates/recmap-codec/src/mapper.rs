//! The [`ValueMapper`] trait and the built-in scalar mappers.
//!
//! A mapper translates one member value between its in-memory
//! [`FieldValue`] form and the store's [`Value`] form. Mappers never see
//! nulls: [`encode_value`] and [`decode_value`] handle `Null`/`Nil` before
//! dispatching.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Timelike, Utc};
use recmap_model::{EmbedKind, EnumDescriptor, FloatKind, IntKind, TemporalKind, TypeRef};
use recmap_types::{FieldValue, ObjectRef, Value};

use crate::codec::GraphCodec;
use crate::error::{CodecError, CodecResult};
use crate::session::Session;

/// State carried through one encode call.
pub struct EncodeCx<'a> {
    pub codec: &'a GraphCodec,
    /// User key of the record being written, passed to property accessors.
    pub owner_key: Option<Value>,
    /// Embedded objects currently being encoded, by handle address.
    visiting: Vec<usize>,
}

impl<'a> EncodeCx<'a> {
    pub fn new(codec: &'a GraphCodec, owner_key: Option<Value>) -> Self {
        Self {
            codec,
            owner_key,
            visiting: Vec::new(),
        }
    }

    pub(crate) fn enter(&mut self, object: &ObjectRef, class: &str) -> CodecResult<()> {
        if self.visiting.contains(&object.addr()) {
            return Err(CodecError::CyclicEmbed {
                class: class.to_string(),
            });
        }
        self.visiting.push(object.addr());
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.visiting.pop();
    }
}

/// State carried through one decode call.
pub struct DecodeCx<'a> {
    pub codec: &'a GraphCodec,
    pub session: &'a mut Session,
    /// User key of the record being read, passed to property accessors.
    pub owner_key: Option<Value>,
}

impl<'a> DecodeCx<'a> {
    pub fn new(codec: &'a GraphCodec, session: &'a mut Session, owner_key: Option<Value>) -> Self {
        Self {
            codec,
            session,
            owner_key,
        }
    }
}

/// Translates member values to and from the store's value model.
pub trait ValueMapper: Send + Sync + fmt::Debug {
    /// Encode a non-null member value.
    fn to_store(&self, value: &FieldValue, cx: &mut EncodeCx<'_>) -> CodecResult<Value>;

    /// Decode a non-nil stored value.
    fn from_store(&self, value: &Value, cx: &mut DecodeCx<'_>) -> CodecResult<FieldValue>;
}

/// Encode through `mapper`, mapping `Null` to `Nil`.
pub fn encode_value(
    mapper: &dyn ValueMapper,
    value: &FieldValue,
    cx: &mut EncodeCx<'_>,
) -> CodecResult<Value> {
    if value.is_null() {
        return Ok(Value::Nil);
    }
    mapper.to_store(value, cx)
}

/// Decode through `mapper`, mapping `Nil` to `Null`.
pub fn decode_value(
    mapper: &dyn ValueMapper,
    value: &Value,
    cx: &mut DecodeCx<'_>,
) -> CodecResult<FieldValue> {
    if value.is_nil() {
        return Ok(FieldValue::Null);
    }
    mapper.from_store(value, cx)
}

/// Direct translation for values whose declared type the store holds as-is.
pub(crate) fn native_to_store(ty: &TypeRef, value: &FieldValue) -> Option<Value> {
    match (ty, value) {
        (TypeRef::Int(IntKind::I64), FieldValue::Int(v)) => Some(Value::Int(*v)),
        (TypeRef::Float(FloatKind::F64), FieldValue::Float(v)) => Some(Value::Float(*v)),
        (TypeRef::Str, FieldValue::Str(s)) => Some(Value::Str(s.clone())),
        (TypeRef::Bytes, FieldValue::Bytes(b)) => Some(Value::Blob(b.clone())),
        _ => None,
    }
}

pub(crate) fn native_from_store(ty: &TypeRef, value: &Value) -> Option<FieldValue> {
    match (ty, value) {
        (TypeRef::Int(IntKind::I64), Value::Int(v)) => Some(FieldValue::Int(*v)),
        (TypeRef::Float(FloatKind::F64), Value::Float(v)) => Some(FieldValue::Float(*v)),
        (TypeRef::Str, Value::Str(s)) => Some(FieldValue::Str(s.clone())),
        (TypeRef::Bytes, Value::Blob(b)) => Some(FieldValue::Bytes(b.clone())),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct BoolMapper;

impl ValueMapper for BoolMapper {
    fn to_store(&self, value: &FieldValue, _: &mut EncodeCx<'_>) -> CodecResult<Value> {
        match value {
            FieldValue::Bool(b) => Ok(Value::Int(i64::from(*b))),
            other => Err(CodecError::mismatch(TypeRef::Bool, other)),
        }
    }

    fn from_store(&self, value: &Value, _: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
        match value {
            Value::Int(v) => Ok(FieldValue::Bool(*v != 0)),
            other => Err(CodecError::invalid(TypeRef::Bool, other)),
        }
    }
}

/// Integers of a declared width, range-checked in both directions.
#[derive(Debug)]
pub struct IntMapper(pub IntKind);

impl IntMapper {
    fn check(&self, v: i64) -> CodecResult<i64> {
        let (min, max) = self.0.range();
        if v < min || v > max {
            return Err(CodecError::OutOfRange {
                ty: TypeRef::Int(self.0).to_string(),
                value: v.to_string(),
            });
        }
        Ok(v)
    }
}

impl ValueMapper for IntMapper {
    fn to_store(&self, value: &FieldValue, _: &mut EncodeCx<'_>) -> CodecResult<Value> {
        match value {
            FieldValue::Int(v) => Ok(Value::Int(self.check(*v)?)),
            other => Err(CodecError::mismatch(TypeRef::Int(self.0), other)),
        }
    }

    fn from_store(&self, value: &Value, _: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
        match value {
            Value::Int(v) => Ok(FieldValue::Int(self.check(*v)?)),
            other => Err(CodecError::invalid(TypeRef::Int(self.0), other)),
        }
    }
}

#[derive(Debug)]
pub struct FloatMapper(pub FloatKind);

impl ValueMapper for FloatMapper {
    fn to_store(&self, value: &FieldValue, _: &mut EncodeCx<'_>) -> CodecResult<Value> {
        let v = match value {
            FieldValue::Float(v) => *v,
            FieldValue::Int(v) => *v as f64,
            other => return Err(CodecError::mismatch(TypeRef::Float(self.0), other)),
        };
        Ok(Value::Float(match self.0 {
            FloatKind::F32 => f64::from(v as f32),
            FloatKind::F64 => v,
        }))
    }

    fn from_store(&self, value: &Value, _: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
        value
            .as_float()
            .map(FieldValue::Float)
            .ok_or_else(|| CodecError::invalid(TypeRef::Float(self.0), value))
    }
}

/// Characters stored as their code point.
#[derive(Debug)]
pub struct CharMapper;

impl ValueMapper for CharMapper {
    fn to_store(&self, value: &FieldValue, _: &mut EncodeCx<'_>) -> CodecResult<Value> {
        match value {
            FieldValue::Char(c) => Ok(Value::Int(i64::from(u32::from(*c)))),
            other => Err(CodecError::mismatch(TypeRef::Char, other)),
        }
    }

    fn from_store(&self, value: &Value, _: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
        let decoded = match value {
            Value::Int(v) => u32::try_from(*v).ok().and_then(char::from_u32),
            Value::Str(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => None,
                }
            }
            _ => None,
        };
        decoded
            .map(FieldValue::Char)
            .ok_or_else(|| CodecError::invalid(TypeRef::Char, value))
    }
}

#[derive(Debug)]
pub struct StrMapper;

impl ValueMapper for StrMapper {
    fn to_store(&self, value: &FieldValue, _: &mut EncodeCx<'_>) -> CodecResult<Value> {
        match value {
            FieldValue::Str(s) => Ok(Value::Str(s.clone())),
            other => Err(CodecError::mismatch(TypeRef::Str, other)),
        }
    }

    fn from_store(&self, value: &Value, _: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
        match value {
            Value::Str(s) => Ok(FieldValue::Str(s.clone())),
            other => Err(CodecError::invalid(TypeRef::Str, other)),
        }
    }
}

/// Opaque binary, stored without translation.
#[derive(Debug)]
pub struct BytesMapper;

impl ValueMapper for BytesMapper {
    fn to_store(&self, value: &FieldValue, _: &mut EncodeCx<'_>) -> CodecResult<Value> {
        match value {
            FieldValue::Bytes(b) => Ok(Value::Blob(b.clone())),
            other => Err(CodecError::mismatch(TypeRef::Bytes, other)),
        }
    }

    fn from_store(&self, value: &Value, _: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
        match value {
            Value::Blob(b) => Ok(FieldValue::Bytes(b.clone())),
            other => Err(CodecError::invalid(TypeRef::Bytes, other)),
        }
    }
}

/// Arbitrary-width integers, stored as decimal strings.
#[derive(Debug)]
pub struct BigIntMapper;

impl ValueMapper for BigIntMapper {
    fn to_store(&self, value: &FieldValue, _: &mut EncodeCx<'_>) -> CodecResult<Value> {
        match value {
            FieldValue::BigInt(v) => Ok(Value::Str(v.to_string())),
            FieldValue::Int(v) => Ok(Value::Str(v.to_string())),
            other => Err(CodecError::mismatch(TypeRef::BigInt, other)),
        }
    }

    fn from_store(&self, value: &Value, _: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
        let decoded = match value {
            Value::Str(s) => s.parse::<i128>().ok(),
            Value::Int(v) => Some(i128::from(*v)),
            _ => None,
        };
        decoded
            .map(FieldValue::BigInt)
            .ok_or_else(|| CodecError::invalid(TypeRef::BigInt, value))
    }
}

// ---------------------------------------------------------------------------
// Temporal
// ---------------------------------------------------------------------------

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Date and time types.
///
/// | kind        | stored as                    |
/// |-------------|------------------------------|
/// | `Timestamp` | epoch milliseconds           |
/// | `Date`      | epoch day                    |
/// | `Time`      | nanoseconds since midnight   |
/// | `Instant`   | `[epoch seconds, nanos]`     |
/// | `DateTime`  | `[epoch seconds, nanos]`     |
#[derive(Debug)]
pub struct TemporalMapper(pub TemporalKind);

fn epoch_pair(dt: DateTime<Utc>) -> Value {
    Value::List(vec![
        Value::Int(dt.timestamp()),
        Value::Int(i64::from(dt.timestamp_subsec_nanos())),
    ])
}

fn from_epoch_pair(value: &Value) -> Option<DateTime<Utc>> {
    match value.as_list()? {
        [Value::Int(secs), Value::Int(nanos)] => {
            DateTime::from_timestamp(*secs, u32::try_from(*nanos).ok()?)
        }
        _ => None,
    }
}

fn date_from_epoch_day(day: i64) -> Option<NaiveDate> {
    // NaiveDate::default() is 1970-01-01.
    let epoch = NaiveDate::default();
    if day >= 0 {
        epoch.checked_add_days(Days::new(day.unsigned_abs()))
    } else {
        epoch.checked_sub_days(Days::new(day.unsigned_abs()))
    }
}

fn time_from_nanos(nanos: i64) -> Option<NaiveTime> {
    if nanos < 0 {
        return None;
    }
    let secs = u32::try_from(nanos / NANOS_PER_SECOND).ok()?;
    let frac = u32::try_from(nanos % NANOS_PER_SECOND).ok()?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, frac)
}

impl ValueMapper for TemporalMapper {
    fn to_store(&self, value: &FieldValue, _: &mut EncodeCx<'_>) -> CodecResult<Value> {
        match (self.0, value) {
            (TemporalKind::Timestamp, FieldValue::Timestamp(dt)) => {
                Ok(Value::Int(dt.timestamp_millis()))
            }
            (TemporalKind::Instant, FieldValue::Instant(dt)) => Ok(epoch_pair(*dt)),
            (TemporalKind::Date, FieldValue::Date(date)) => Ok(Value::Int(
                date.signed_duration_since(NaiveDate::default()).num_days(),
            )),
            (TemporalKind::Time, FieldValue::Time(time)) => Ok(Value::Int(
                i64::from(time.num_seconds_from_midnight()) * NANOS_PER_SECOND
                    + i64::from(time.nanosecond()),
            )),
            (TemporalKind::DateTime, FieldValue::DateTime(dt)) => Ok(epoch_pair(dt.and_utc())),
            (kind, other) => Err(CodecError::mismatch(TypeRef::Temporal(kind), other)),
        }
    }

    fn from_store(&self, value: &Value, _: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
        let decoded = match (self.0, value) {
            (TemporalKind::Timestamp, Value::Int(ms)) => {
                DateTime::from_timestamp_millis(*ms).map(FieldValue::Timestamp)
            }
            (TemporalKind::Instant, _) => from_epoch_pair(value).map(FieldValue::Instant),
            (TemporalKind::Date, Value::Int(day)) => {
                date_from_epoch_day(*day).map(FieldValue::Date)
            }
            (TemporalKind::Time, Value::Int(nanos)) => time_from_nanos(*nanos).map(FieldValue::Time),
            (TemporalKind::DateTime, _) => {
                from_epoch_pair(value).map(|dt| FieldValue::DateTime(dt.naive_utc()))
            }
            _ => None,
        };
        decoded.ok_or_else(|| CodecError::invalid(TypeRef::Temporal(self.0), value))
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Enum constants, stored by name or by their designated field value.
#[derive(Debug)]
pub struct EnumMapper {
    descriptor: Arc<EnumDescriptor>,
}

impl EnumMapper {
    pub fn new(descriptor: Arc<EnumDescriptor>) -> Self {
        Self { descriptor }
    }

    fn unknown(&self, value: impl Into<String>) -> CodecError {
        CodecError::UnknownEnumConstant {
            name: self.descriptor.name.clone(),
            value: value.into(),
        }
    }
}

impl ValueMapper for EnumMapper {
    fn to_store(&self, value: &FieldValue, _: &mut EncodeCx<'_>) -> CodecResult<Value> {
        match value {
            FieldValue::Enum(constant) => self
                .descriptor
                .stored_value(constant)
                .map(Value::Str)
                .ok_or_else(|| self.unknown(constant.as_str())),
            other => Err(CodecError::mismatch(
                TypeRef::Enum(self.descriptor.name.clone()),
                other,
            )),
        }
    }

    fn from_store(&self, value: &Value, _: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
        match value {
            Value::Str(stored) => self
                .descriptor
                .constant_for(stored)
                .map(FieldValue::Enum)
                .ok_or_else(|| self.unknown(stored.as_str())),
            other => Err(self.unknown(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Dynamic
// ---------------------------------------------------------------------------

/// Stored discriminator bin of a dynamically typed embedded object.
pub const TYPE_MARKER: &str = "@type";

/// Members declared [`TypeRef::Any`]: natively representable values pass
/// through, objects are embedded with their discriminator.
#[derive(Debug)]
pub struct AnyMapper;

impl ValueMapper for AnyMapper {
    fn to_store(&self, value: &FieldValue, cx: &mut EncodeCx<'_>) -> CodecResult<Value> {
        match value {
            FieldValue::Null => Ok(Value::Nil),
            FieldValue::Int(v) => Ok(Value::Int(*v)),
            FieldValue::Float(v) => Ok(Value::Float(*v)),
            FieldValue::Str(s) => Ok(Value::Str(s.clone())),
            FieldValue::Bytes(b) => Ok(Value::Blob(b.clone())),
            FieldValue::List(items) => items
                .iter()
                .map(|item| self.to_store(item, cx))
                .collect::<CodecResult<Vec<_>>>()
                .map(Value::List),
            FieldValue::Map(entries) => {
                let mut map = std::collections::BTreeMap::new();
                for (k, v) in entries {
                    map.insert(self.to_store(k, cx)?, self.to_store(v, cx)?);
                }
                Ok(Value::Map(map))
            }
            FieldValue::Object(object) => {
                let codec = cx.codec;
                codec.encode_embedded(object, None, EmbedKind::Map, false, cx)
            }
            other => Err(CodecError::mismatch("natively representable value", other)),
        }
    }

    fn from_store(&self, value: &Value, cx: &mut DecodeCx<'_>) -> CodecResult<FieldValue> {
        match value {
            Value::Nil => Ok(FieldValue::Null),
            Value::Int(v) => Ok(FieldValue::Int(*v)),
            Value::Float(v) => Ok(FieldValue::Float(*v)),
            Value::Str(s) => Ok(FieldValue::Str(s.clone())),
            Value::Blob(b) => Ok(FieldValue::Bytes(b.clone())),
            Value::List(items) => items
                .iter()
                .map(|item| self.from_store(item, cx))
                .collect::<CodecResult<Vec<_>>>()
                .map(FieldValue::List),
            Value::Map(map) if map.contains_key(&Value::from(TYPE_MARKER)) => {
                let codec = cx.codec;
                codec
                    .decode_embedded(value, None, None, cx)
                    .map(FieldValue::Object)
            }
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| Ok((self.from_store(k, cx)?, self.from_store(v, cx)?)))
                .collect::<CodecResult<Vec<_>>>()
                .map(FieldValue::Map),
        }
    }
}
