use thiserror::Error;

use granary_types::blob_id::BlobId;

pub type Result<T> = std::result::Result<T, GranaryError>;

#[derive(Debug, Error)]
pub enum GranaryError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("blob not found on backend: {0}")]
    BlobNotFound(BlobId),

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(u64),

    #[error("check percentage {0} is out of range 0..=100")]
    InvalidPercent(u8),

    #[error("check run cancelled")]
    Cancelled,

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
