//! # recmap-codec
//!
//! Transcoding between object graphs and store records.
//!
//! - [`MapperRegistry`] picks a [`ValueMapper`] for each declared member type.
//! - [`GraphCodec`] turns objects into bins and back, embedding objects in
//!   map or list form and writing references as keys.
//! - [`ReferenceResolver`] fetches referenced records after a read, one
//!   breadth-first wave at a time, with one batched read per wave.
//!
//! ## Design Rules
//!
//! 1. **Decode never fetches.** References found while decoding are queued
//!    in the [`Session`]; only the resolver talks to the store.
//! 2. **One instance per record.** Within a session every key maps to one
//!    handle, so shared targets and cycles decode to shared instances.
//! 3. **Readers tolerate older writers.** List-form objects carry their
//!    writer's schema version and are read slot by slot against it.
//! 4. **Errors are fatal.** A failed conversion or store call aborts the
//!    whole operation; a missing referenced record is not an error.

pub mod codec;
pub mod error;
pub mod mapper;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod structural;

pub use codec::GraphCodec;
pub use error::{CodecError, CodecResult};
pub use mapper::{
    decode_value, encode_value, AnyMapper, BigIntMapper, BoolMapper, BytesMapper, CharMapper,
    DecodeCx, EncodeCx, EnumMapper, FloatMapper, IntMapper, StrMapper, TemporalMapper,
    ValueMapper, TYPE_MARKER,
};
pub use registry::{BinContext, MapperRegistry};
pub use resolver::{ReferenceResolver, ResolveStats, ResolverConfig};
pub use session::{DeferredReference, Session};
pub use structural::{
    EmbeddedObjectMapper, KeyedCollectionMapper, ListMapper, MapMapper, ReferenceMapper,
};
