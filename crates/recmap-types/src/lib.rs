//! Foundation types for recmap.
//!
//! This crate provides the value, key and record types shared by every other
//! recmap crate, plus the in-memory object graph the mapper reads from and
//! writes into.
//!
//! # Key Types
//!
//! - [`Value`]: A value as the key-value store holds it (scalar, list or map)
//! - [`Key`]: Record locator: namespace, set and user key or [`Digest`]
//! - [`Record`]: Named bins plus generation and expiration metadata
//! - [`Object`] / [`ObjectRef`]: Reflective in-memory instance and its shared handle
//! - [`FieldValue`]: A member value inside an [`Object`]

pub mod error;
pub mod key;
pub mod object;
pub mod record;
pub mod value;

pub use error::TypeError;
pub use key::{Digest, Key};
pub use object::{FieldValue, Object, ObjectRef};
pub use record::Record;
pub use value::Value;
