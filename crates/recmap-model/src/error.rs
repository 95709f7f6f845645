//! Configuration errors raised while compiling class models.

use thiserror::Error;

/// Errors detected while registering or compiling a class model.
///
/// Every variant is a configuration error: it is fatal for the offending
/// class and surfaces on first use of that class.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("class not registered: {0}")]
    UnknownClass(String),

    #[error("enum not registered: {0}")]
    UnknownEnum(String),

    #[error("invalid enum {name}: {reason}")]
    InvalidEnum { name: String, reason: String },

    #[error("{class} has no member named {member}")]
    UnknownMember { class: String, member: String },

    #[error("{class}: bin name {bin} is produced by more than one member")]
    DuplicateBinName { class: String, bin: String },

    #[error("{class}.{member} declares both an embed and a reference policy")]
    ConflictingPolicies { class: String, member: String },

    #[error("{class}.{member}: lazy references cannot use digest mode")]
    LazyDigestReference { class: String, member: String },

    #[error("{class}.{member}: invalid reference: {reason}")]
    InvalidReference {
        class: String,
        member: String,
        reason: String,
    },

    #[error("{class}.{member}: invalid embedding: {reason}")]
    InvalidEmbed {
        class: String,
        member: String,
        reason: String,
    },

    #[error("{class} declares more than one key member")]
    MultipleKeys { class: String },

    #[error("{class} has no key member")]
    MissingKey { class: String },

    #[error("{class} has no namespace")]
    MissingNamespace { class: String },

    #[error("{class}.{member}: key member cannot be read")]
    KeyNotReadable { class: String, member: String },

    #[error("{class}.{member}: key member has no setter and is not a constructor parameter")]
    KeyNotWritable { class: String, member: String },

    #[error("{class}: constructor parameter {param} does not name a member")]
    UnknownConstructorParam { class: String, param: String },

    #[error("{class}.{member}: generation members must be integers")]
    InvalidGeneration { class: String, member: String },

    #[error("{class} binds more than one member to the record generation")]
    MultipleGenerations { class: String },

    #[error("{class}.{bin}: invalid version range {min}..={max}")]
    InvalidVersionRange {
        class: String,
        bin: String,
        min: u32,
        max: u32,
    },

    #[error("{class}.{bin}: ordinals start at 1")]
    InvalidOrdinal { class: String, bin: String },

    #[error("{class}: ordinal {ordinal} is assigned to more than one bin")]
    DuplicateOrdinal { class: String, ordinal: u32 },

    #[error("short name {short_name} already used by {existing}, cannot assign to {class}")]
    DuplicateShortName {
        short_name: String,
        existing: String,
        class: String,
    },

    #[error("cyclic inheritance through {0}")]
    CyclicInheritance(String),

    #[error("unknown type discriminator {short_name} for {declared}")]
    UnknownDiscriminator { declared: String, short_name: String },

    #[error("{class} is not a subclass of {declared}")]
    NotASubclass { declared: String, class: String },

    #[error("mapping configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;
