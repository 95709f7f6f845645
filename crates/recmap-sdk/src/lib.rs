//! High-level object mapper for recmap.
//!
//! [`ObjectMapper`] is the entry point for applications: register classes
//! once, then save, read, delete and scan objects against any
//! [`RecordStore`](recmap_store::RecordStore).
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use recmap_sdk::{MemberDescriptor, Object, ObjectMapper, TypeDescriptor, TypeRef};
//! use recmap_store::InMemoryRecordStore;
//!
//! let mapper = ObjectMapper::builder(Arc::new(InMemoryRecordStore::new()))
//!     .class(
//!         TypeDescriptor::new("Customer")
//!             .namespace("test")
//!             .member(MemberDescriptor::new("id", TypeRef::Str).key())
//!             .member(MemberDescriptor::new("name", TypeRef::Str)),
//!     )
//!     .build()?;
//!
//! mapper.save(&Object::new("Customer").with("id", "c1").with("name", "Ada").into_ref())?;
//! let customer = mapper.read("Customer", "c1")?;
//! # Ok::<(), recmap_sdk::SdkError>(())
//! ```

pub mod config;
pub mod error;
pub mod mapper;

pub use config::MapperConfig;
pub use error::{SdkError, SdkResult};
pub use mapper::{ObjectMapper, ObjectMapperBuilder};

// Re-export the types needed to describe and handle mapped objects.
pub use recmap_codec::{ResolverConfig, ValueMapper};
pub use recmap_model::{
    EmbedKind, EmbedSpec, EnumDescriptor, Factory, MappingConfig, MemberDescriptor,
    ReferenceSpec, TypeDescriptor, TypeRef,
};
pub use recmap_types::{FieldValue, Key, Object, ObjectRef, Record, Value};
