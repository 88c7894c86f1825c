//! Verification: resolve a query embedding to at most one enrolled identity.

use std::sync::Arc;

use crate::error::CoreResult;
use crate::store::FaceRecordStore;
use crate::types::{Embedding, EuclideanMatcher, MatchResult, Matcher, Threshold};

/// Read-only matcher over the current contents of a [`FaceRecordStore`].
///
/// Each call reads a fresh snapshot with no isolation from concurrent
/// writers; a verify racing a delete may or may not see the deleted face.
pub struct MatchingEngine<M = EuclideanMatcher> {
    faces: Arc<dyn FaceRecordStore>,
    matcher: M,
    threshold: Threshold,
    dim: usize,
}

impl MatchingEngine<EuclideanMatcher> {
    pub fn new(faces: Arc<dyn FaceRecordStore>, threshold: Threshold, dim: usize) -> Self {
        Self::with_matcher(faces, EuclideanMatcher, threshold, dim)
    }
}

impl<M: Matcher> MatchingEngine<M> {
    pub fn with_matcher(
        faces: Arc<dyn FaceRecordStore>,
        matcher: M,
        threshold: Threshold,
        dim: usize,
    ) -> Self {
        Self {
            faces,
            matcher,
            threshold,
            dim,
        }
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    /// Find the nearest enrolled face and accept it if within the threshold.
    ///
    /// An empty store is a normal non-match for any query. Otherwise a store
    /// read failure, a query of the wrong dimension, or a stored record of
    /// the wrong dimension is an error.
    pub async fn verify(&self, query: &Embedding) -> CoreResult<MatchResult> {
        let gallery = self.faces.find_all().await?;
        if !gallery.is_empty() {
            query.ensure_dim(self.dim)?;
        }

        let result = self.matcher.compare(query, &gallery, self.threshold)?;

        match &result.face {
            Some(face) => tracing::info!(
                face_id = %face.id,
                distance = face.distance,
                candidates = result.candidates,
                "verify: match"
            ),
            None => tracing::info!(
                nearest = ?result.nearest_distance,
                threshold = self.threshold.value(),
                candidates = result.candidates,
                "verify: no match"
            ),
        }

        Ok(result)
    }
}
