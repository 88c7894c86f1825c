use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;
use crate::types::Embedding;

/// Encoded image as received from a caller, usually a base64 data URL.
/// Passed to the extractor untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImagePayload(String);

impl ImagePayload {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

/// Black-box oracle turning an image into a fixed-length embedding.
#[async_trait]
pub trait EmbeddingExtractor: Send + Sync {
    async fn extract(&self, image: &ImagePayload, model: &str)
        -> Result<Embedding, ExtractionError>;
}
