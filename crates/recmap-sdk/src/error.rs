use recmap_codec::CodecError;
use recmap_model::ModelError;
use recmap_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("mapping error: {0}")]
    Model(#[from] ModelError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SdkError {
    /// The store error behind this failure, wherever it was raised.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) | Self::Codec(CodecError::Store(e)) => Some(e),
            _ => None,
        }
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
