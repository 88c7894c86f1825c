use thiserror::Error;

use crate::types::FaceId;

/// Failure of the embedding oracle. The core never evaluates a query that
/// produced one of these.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("image could not be decoded: {0}")]
    InvalidImage(String),
    #[error("no face found in image")]
    NoFace,
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("extraction timed out")]
    Timeout,
    #[error("extraction service failed: {0}")]
    Service(String),
}

/// Backend failure, as opposed to an empty result.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store query failed: {0}")]
    Backend(String),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("face {0} not found")]
    NotFound(FaceId),
    #[error("face {0} exists but the update changed nothing")]
    UpdateFailed(FaceId),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("invalid face id: {0:?}")]
    InvalidId(String),
    #[error("threshold must be a finite non-negative number, got {0}")]
    InvalidThreshold(f32),
}

pub type CoreResult<T> = Result<T, CoreError>;
