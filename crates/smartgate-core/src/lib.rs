//! smartgate-core: Face identity matching and enrollment consistency.
//!
//! Resolves face embeddings to enrolled identities by thresholded
//! nearest-neighbour search, and keeps the face store and the attendance
//! ledger coherent across enroll, replace and delete.

pub mod coordinator;
pub mod envelope;
pub mod error;
pub mod extractor;
pub mod matching;
pub mod store;
pub mod types;

pub use coordinator::{ConsistencyCoordinator, DeleteOutcome};
pub use error::{CoreError, CoreResult, ExtractionError, StoreError};
pub use extractor::{EmbeddingExtractor, ImagePayload};
pub use matching::MatchingEngine;
pub use store::{AttendanceLedger, FaceRecordStore, MemoryFaceStore, MemoryLedger};
pub use types::{
    AttendanceId, AttendanceRecord, Embedding, EuclideanMatcher, FaceId, FaceMatch, FaceRecord,
    MatchResult, Matcher, Threshold,
};
