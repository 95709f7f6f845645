use std::fmt;

use recmap_model::ModelError;
use recmap_store::StoreError;
use recmap_types::{FieldValue, TypeError, Value};
use thiserror::Error;

/// Errors raised while transcoding object graphs.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Invalid class mapping, surfaced at first use of the class.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Store transport failure, passed through unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Type(#[from] TypeError),

    /// An in-memory value does not fit the member's declared type.
    #[error("cannot encode {found} as {expected}")]
    TypeMismatch { expected: String, found: String },

    /// A stored value cannot be decoded as the member's declared type.
    #[error("cannot decode stored {found} as {expected}")]
    InvalidStoredValue { expected: String, found: String },

    #[error("value {value} out of range for {ty}")]
    OutOfRange { ty: String, value: String },

    #[error("{value} is not a constant of enum {name}")]
    UnknownEnumConstant { name: String, value: String },

    #[error("malformed type discriminator: {0}")]
    MalformedDiscriminator(String),

    #[error("no value mapper registered for {0}")]
    NoMapper(String),

    #[error("{class} instance has no key value")]
    MissingKeyValue { class: String },

    #[error("cannot construct {class}: {reason}")]
    Construction { class: String, reason: String },

    /// A batched read returned a different number of results than keys.
    #[error("batched read of {requested} keys returned {returned} results")]
    BatchSizeMismatch { requested: usize, returned: usize },

    #[error("{class} embeds itself; use a reference to store cycles")]
    CyclicEmbed { class: String },
}

impl CodecError {
    pub(crate) fn mismatch(expected: impl fmt::Display, found: &FieldValue) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            found: found.type_name().to_string(),
        }
    }

    pub(crate) fn invalid(expected: impl fmt::Display, found: &Value) -> Self {
        Self::InvalidStoredValue {
            expected: expected.to_string(),
            found: found.type_name().to_string(),
        }
    }
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
