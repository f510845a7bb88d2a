//! Storage error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The embedded database failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A record could not be encoded or decoded.
    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// An annotation set with the same filename already exists for the
    /// slide; overwriting is an explicit caller decision.
    #[error("annotation set '{filename}' already exists for slide '{slide_id}'")]
    AlreadyExists { filename: String, slide_id: String },
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}
