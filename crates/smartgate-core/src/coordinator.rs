//! Enroll, replace and delete as multi-step protocols over the face store
//! and the attendance ledger.
//!
//! Neither collection is transactional with the other. A failure between
//! the face delete and the attendance cascade leaves orphaned attendance
//! events pointing at an absent face; nothing reconciles them later.

use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::store::{AttendanceLedger, FaceRecordStore};
use crate::types::{Embedding, FaceId, FaceRecord};

/// Counts reported by a successful delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: u64,
    pub cascaded: u64,
}

/// The only writer of the face store; owns the attendance cascade.
pub struct ConsistencyCoordinator {
    faces: Arc<dyn FaceRecordStore>,
    ledger: Arc<dyn AttendanceLedger>,
    dim: usize,
}

impl ConsistencyCoordinator {
    pub fn new(
        faces: Arc<dyn FaceRecordStore>,
        ledger: Arc<dyn AttendanceLedger>,
        dim: usize,
    ) -> Self {
        Self { faces, ledger, dim }
    }

    /// Create a new identity. Duplicates are not checked here.
    pub async fn enroll(&self, name: &str, embedding: &Embedding) -> CoreResult<FaceId> {
        embedding.ensure_dim(self.dim)?;
        let id = self.faces.insert(name, embedding).await?;
        tracing::info!(face_id = %id, name, "face enrolled");
        Ok(id)
    }

    /// Overwrite name and embedding of an existing identity in place.
    pub async fn replace(&self, id: &FaceId, name: &str, embedding: &Embedding) -> CoreResult<()> {
        if self.faces.find_by_id(id).await?.is_none() {
            return Err(CoreError::NotFound(*id));
        }
        embedding.ensure_dim(self.dim)?;

        let modified = self.faces.update(id, name, embedding).await?;
        if modified == 0 {
            tracing::warn!(face_id = %id, "replace: store reported no modification");
            return Err(CoreError::UpdateFailed(*id));
        }

        tracing::info!(face_id = %id, name, "face replaced");
        Ok(())
    }

    /// Remove an identity, then every attendance event referencing it.
    ///
    /// The cascade runs only after the face delete removed a record.
    pub async fn delete(&self, id: &FaceId) -> CoreResult<DeleteOutcome> {
        let deleted = self.faces.delete(id).await?;
        if deleted == 0 {
            return Err(CoreError::NotFound(*id));
        }

        let cascaded = match self.ledger.delete_by_face(id).await {
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(
                    face_id = %id,
                    error = %err,
                    "face deleted but attendance cascade failed; orphaned events remain"
                );
                return Err(err.into());
            }
        };

        tracing::info!(face_id = %id, cascaded, "face deleted");
        Ok(DeleteOutcome { deleted, cascaded })
    }

    pub async fn find(&self, id: &FaceId) -> CoreResult<Option<FaceRecord>> {
        Ok(self.faces.find_by_id(id).await?)
    }

    pub async fn list(&self) -> CoreResult<Vec<FaceRecord>> {
        Ok(self.faces.find_all().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::matching::MatchingEngine;
    use crate::store::{MemoryFaceStore, MemoryLedger};
    use crate::types::{AttendanceRecord, Threshold};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec()).unwrap()
    }

    struct Fixture {
        faces: Arc<MemoryFaceStore>,
        ledger: Arc<MemoryLedger>,
        coordinator: ConsistencyCoordinator,
        engine: MatchingEngine,
    }

    fn fixture() -> Fixture {
        let faces = Arc::new(MemoryFaceStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        Fixture {
            coordinator: ConsistencyCoordinator::new(faces.clone(), ledger.clone(), 3),
            engine: MatchingEngine::new(faces.clone(), Threshold::new(1.0).unwrap(), 3),
            faces,
            ledger,
        }
    }

    /// Face store whose updates find the record but change nothing.
    struct NoopUpdateStore(MemoryFaceStore);

    #[async_trait]
    impl FaceRecordStore for NoopUpdateStore {
        async fn insert(&self, name: &str, embedding: &Embedding) -> Result<FaceId, StoreError> {
            self.0.insert(name, embedding).await
        }
        async fn find_all(&self) -> Result<Vec<FaceRecord>, StoreError> {
            self.0.find_all().await
        }
        async fn find_by_id(&self, id: &FaceId) -> Result<Option<FaceRecord>, StoreError> {
            self.0.find_by_id(id).await
        }
        async fn update(&self, _: &FaceId, _: &str, _: &Embedding) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn delete(&self, id: &FaceId) -> Result<u64, StoreError> {
            self.0.delete(id).await
        }
    }

    /// Ledger that counts cascade calls and can be made to fail them.
    #[derive(Default)]
    struct ProbeLedger {
        inner: MemoryLedger,
        cascade_calls: AtomicUsize,
        fail_cascade: bool,
    }

    #[async_trait]
    impl AttendanceLedger for ProbeLedger {
        async fn record(
            &self,
            face_id: &FaceId,
            timestamp: DateTime<Utc>,
        ) -> Result<AttendanceRecord, StoreError> {
            self.inner.record(face_id, timestamp).await
        }
        async fn find_by_face(&self, face_id: &FaceId) -> Result<Vec<AttendanceRecord>, StoreError> {
            self.inner.find_by_face(face_id).await
        }
        async fn find_all(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
            self.inner.find_all().await
        }
        async fn delete_by_face(&self, face_id: &FaceId) -> Result<u64, StoreError> {
            self.cascade_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_cascade {
                return Err(StoreError::Unavailable("ledger offline".into()));
            }
            self.inner.delete_by_face(face_id).await
        }
    }

    #[tokio::test]
    async fn test_enroll_assigns_fresh_ids_for_duplicates() {
        let fx = fixture();
        let a = fx.coordinator.enroll("Alice", &emb(&[1.0, 2.0, 3.0])).await.unwrap();
        let b = fx.coordinator.enroll("Alice", &emb(&[1.0, 2.0, 3.0])).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(fx.faces.find_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_enroll_rejects_wrong_dimension() {
        let fx = fixture();
        let err = fx.coordinator.enroll("Alice", &emb(&[1.0, 2.0])).await.unwrap_err();
        assert!(matches!(err, CoreError::DimensionMismatch { expected: 3, actual: 2 }));
        assert!(fx.faces.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_then_verify_matches_new_name() {
        let fx = fixture();
        let e1 = emb(&[0.0, 0.0, 0.0]);
        let e2 = emb(&[5.0, 5.0, 5.0]);
        let id = fx.coordinator.enroll("Alice", &e1).await.unwrap();

        fx.coordinator.replace(&id, "Alice2", &e2).await.unwrap();

        let face = fx.engine.verify(&e2).await.unwrap().face.unwrap();
        assert_eq!(face.id, id);
        assert_eq!(face.name, "Alice2");
        assert!(!fx.engine.verify(&e1).await.unwrap().verified());
    }

    #[tokio::test]
    async fn test_replace_missing_is_not_found_and_writes_nothing() {
        let fx = fixture();
        fx.coordinator.enroll("Alice", &emb(&[0.0, 0.0, 0.0])).await.unwrap();
        let before = fx.faces.find_all().await.unwrap();
        let missing = FaceId::generate();

        let err = fx
            .coordinator
            .replace(&missing, "Bob", &emb(&[1.0, 1.0, 1.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(id) if id == missing));
        assert_eq!(fx.faces.find_all().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_replace_missing_reports_not_found_before_dimension() {
        let fx = fixture();
        let missing = FaceId::generate();

        let err = fx.coordinator.replace(&missing, "x", &emb(&[1.0])).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_replace_existing_rejects_wrong_dimension() {
        let fx = fixture();
        let id = fx.coordinator.enroll("Alice", &emb(&[0.0, 0.0, 0.0])).await.unwrap();

        let err = fx.coordinator.replace(&id, "Alice", &emb(&[1.0])).await.unwrap_err();
        assert!(matches!(err, CoreError::DimensionMismatch { expected: 3, actual: 1 }));
        assert_eq!(fx.faces.find_by_id(&id).await.unwrap().unwrap().name, "Alice");
    }

    #[tokio::test]
    async fn test_replace_with_no_modification_is_update_failed() {
        let faces = Arc::new(NoopUpdateStore(MemoryFaceStore::new()));
        let coordinator = ConsistencyCoordinator::new(faces.clone(), Arc::new(MemoryLedger::new()), 3);
        let id = coordinator.enroll("Alice", &emb(&[0.0, 0.0, 0.0])).await.unwrap();

        let err = coordinator
            .replace(&id, "Alice2", &emb(&[1.0, 1.0, 1.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UpdateFailed(failed) if failed == id));
    }

    #[tokio::test]
    async fn test_delete_cascades_attendance() {
        let fx = fixture();
        let e1 = emb(&[0.0, 0.0, 0.0]);
        let id = fx.coordinator.enroll("Alice", &e1).await.unwrap();
        let other = fx.coordinator.enroll("Bob", &emb(&[9.0, 9.0, 9.0])).await.unwrap();
        for _ in 0..3 {
            fx.ledger.record(&id, Utc::now()).await.unwrap();
        }
        fx.ledger.record(&other, Utc::now()).await.unwrap();

        let outcome = fx.coordinator.delete(&id).await.unwrap();
        assert_eq!(outcome, DeleteOutcome { deleted: 1, cascaded: 3 });

        assert!(fx.faces.find_by_id(&id).await.unwrap().is_none());
        assert!(fx.ledger.find_by_face(&id).await.unwrap().is_empty());
        assert_eq!(fx.ledger.find_by_face(&other).await.unwrap().len(), 1);
        assert!(!fx.engine.verify(&e1).await.unwrap().verified());
    }

    #[tokio::test]
    async fn test_delete_missing_skips_cascade() {
        let faces = Arc::new(MemoryFaceStore::new());
        let ledger = Arc::new(ProbeLedger::default());
        let coordinator = ConsistencyCoordinator::new(faces, ledger.clone(), 3);
        let missing = FaceId::generate();
        ledger.record(&missing, Utc::now()).await.unwrap();

        let err = coordinator.delete(&missing).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
        assert_eq!(ledger.cascade_calls.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.find_by_face(&missing).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_cascade_failure_leaves_orphans() {
        let faces = Arc::new(MemoryFaceStore::new());
        let ledger = Arc::new(ProbeLedger {
            fail_cascade: true,
            ..Default::default()
        });
        let coordinator = ConsistencyCoordinator::new(faces.clone(), ledger.clone(), 3);
        let id = coordinator.enroll("Alice", &emb(&[0.0, 0.0, 0.0])).await.unwrap();
        ledger.record(&id, Utc::now()).await.unwrap();

        let err = coordinator.delete(&id).await.unwrap_err();
        assert!(matches!(err, CoreError::Store(_)));
        assert!(faces.find_by_id(&id).await.unwrap().is_none());
        assert_eq!(ledger.find_by_face(&id).await.unwrap().len(), 1);
    }
}
