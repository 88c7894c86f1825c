//! Request-level operations: extract, then match or mutate, then render an
//! envelope. Nothing here returns an error to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use smartgate_core::envelope::{
    failure_message, DeleteResponse, FaceResponse, SignInResponse, VerifyResponse,
};
use smartgate_core::{
    AttendanceLedger, AttendanceRecord, ConsistencyCoordinator, CoreError, CoreResult,
    DeleteOutcome, Embedding, EmbeddingExtractor, FaceId, FaceMatch, FaceRecordStore,
    ImagePayload, MatchResult, MatchingEngine, Threshold,
};

const MSG_MISSING_FIELDS: &str = "Missing required fields (img, name)";
const MSG_MISSING_IMAGE: &str = "Missing required fields (img)";

#[derive(Debug, Clone, Serialize)]
pub struct FaceSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaceListResponse {
    pub success: bool,
    pub faces: Vec<FaceSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceEntry {
    pub id: String,
    pub face_id: String,
    /// `None` when the referenced face no longer exists.
    pub name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceResponse {
    pub success: bool,
    pub records: Vec<AttendanceEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub backend: &'static str,
    pub faces: Option<u64>,
    pub threshold: f32,
    pub model: String,
    pub embedding_dim: usize,
}

pub struct FaceService {
    extractor: Arc<dyn EmbeddingExtractor>,
    faces: Arc<dyn FaceRecordStore>,
    ledger: Arc<dyn AttendanceLedger>,
    engine: MatchingEngine,
    coordinator: ConsistencyCoordinator,
    model: String,
    dim: usize,
    backend: &'static str,
}

impl FaceService {
    pub fn new(
        extractor: Arc<dyn EmbeddingExtractor>,
        faces: Arc<dyn FaceRecordStore>,
        ledger: Arc<dyn AttendanceLedger>,
        threshold: Threshold,
        model: String,
        dim: usize,
        backend: &'static str,
    ) -> Self {
        Self {
            engine: MatchingEngine::new(faces.clone(), threshold, dim),
            coordinator: ConsistencyCoordinator::new(faces.clone(), ledger.clone(), dim),
            extractor,
            faces,
            ledger,
            model,
            dim,
            backend,
        }
    }

    async fn embed(&self, img: &ImagePayload) -> CoreResult<Embedding> {
        Ok(self.extractor.extract(img, &self.model).await?)
    }

    async fn try_add(&self, img: &ImagePayload, name: &str) -> CoreResult<FaceId> {
        let embedding = self.embed(img).await?;
        self.coordinator.enroll(name, &embedding).await
    }

    async fn try_verify(&self, img: &ImagePayload) -> CoreResult<MatchResult> {
        let embedding = self.embed(img).await?;
        self.engine.verify(&embedding).await
    }

    async fn try_replace(&self, id: &str, img: &ImagePayload, name: &str) -> CoreResult<FaceId> {
        let id: FaceId = id.parse()?;
        if self.coordinator.find(&id).await?.is_none() {
            return Err(CoreError::NotFound(id));
        }
        let embedding = self.embed(img).await?;
        self.coordinator.replace(&id, name, &embedding).await?;
        Ok(id)
    }

    async fn try_delete(&self, id: &str) -> CoreResult<DeleteOutcome> {
        let id: FaceId = id.parse()?;
        self.coordinator.delete(&id).await
    }

    async fn try_sign_in(
        &self,
        img: &ImagePayload,
    ) -> CoreResult<Option<(FaceMatch, AttendanceRecord)>> {
        let matched = self.try_verify(img).await?;
        let Some(face) = matched.face else {
            return Ok(None);
        };
        let event = self.ledger.record(&face.id, Utc::now()).await?;
        Ok(Some((face, event)))
    }

    /// Enroll a new face. Duplicate detection is the caller's job (verify first).
    pub async fn add_face(&self, img: &ImagePayload, name: &str) -> FaceResponse {
        if img.is_empty() || name.trim().is_empty() {
            return FaceResponse {
                success: false,
                face_id: None,
                message: MSG_MISSING_FIELDS.to_string(),
                created: true,
            };
        }

        match self.try_add(img, name.trim()).await {
            Ok(id) => FaceResponse::added(id),
            Err(err) => {
                tracing::warn!(error = %err, "add_face failed");
                FaceResponse::add_failure(&err)
            }
        }
    }

    pub async fn verify_face(&self, img: &ImagePayload) -> VerifyResponse {
        if img.is_empty() {
            return VerifyResponse {
                success: false,
                verified: false,
                face_match: None,
                message: Some(MSG_MISSING_IMAGE.to_string()),
            };
        }

        match self.try_verify(img).await {
            Ok(result) => VerifyResponse::from_match(result),
            Err(err) => {
                tracing::warn!(error = %err, "verify_face failed");
                VerifyResponse::failure(&err)
            }
        }
    }

    /// Replace name and embedding of an existing face. A missing id is
    /// reported before the image is sent for extraction.
    pub async fn replace_face(&self, id: &str, img: &ImagePayload, name: &str) -> FaceResponse {
        if img.is_empty() || name.trim().is_empty() {
            return FaceResponse {
                success: false,
                face_id: None,
                message: MSG_MISSING_FIELDS.to_string(),
                created: false,
            };
        }

        match self.try_replace(id, img, name.trim()).await {
            Ok(id) => FaceResponse::updated(id),
            Err(err) => {
                tracing::warn!(face_id = id, error = %err, "replace_face failed");
                FaceResponse::failure(&err)
            }
        }
    }

    pub async fn delete_face(&self, id: &str) -> DeleteResponse {
        match self.try_delete(id).await {
            Ok(outcome) => DeleteResponse::deleted(outcome),
            Err(err) => {
                tracing::warn!(face_id = id, error = %err, "delete_face failed");
                DeleteResponse::failure(&err)
            }
        }
    }

    /// Verify and, on a match, append an attendance event for the matched face.
    pub async fn sign_in(&self, img: &ImagePayload) -> SignInResponse {
        if img.is_empty() {
            return SignInResponse {
                message: MSG_MISSING_IMAGE.to_string(),
                ..SignInResponse::not_recognized()
            };
        }

        match self.try_sign_in(img).await {
            Ok(Some((face, event))) => {
                tracing::info!(face_id = %face.id, attendance_id = %event.id, "signed in");
                SignInResponse::signed_in(&face, event.id)
            }
            Ok(None) => SignInResponse::not_recognized(),
            Err(err) => {
                tracing::warn!(error = %err, "sign_in failed");
                SignInResponse::failure(&err)
            }
        }
    }

    pub async fn list_faces(&self) -> FaceListResponse {
        match self.coordinator.list().await {
            Ok(records) => FaceListResponse {
                success: true,
                faces: records
                    .into_iter()
                    .map(|r| FaceSummary {
                        id: r.id.to_string(),
                        name: r.name,
                    })
                    .collect(),
                message: None,
            },
            Err(err) => FaceListResponse {
                success: false,
                faces: Vec::new(),
                message: Some(failure_message(&err)),
            },
        }
    }

    /// Attendance events, newest first. An empty `face_id` lists everything.
    pub async fn attendance(&self, face_id: &str) -> AttendanceResponse {
        match self.attendance_entries(face_id.trim()).await {
            Ok(records) => AttendanceResponse {
                success: true,
                records,
                message: None,
            },
            Err(err) => AttendanceResponse {
                success: false,
                records: Vec::new(),
                message: Some(failure_message(&err)),
            },
        }
    }

    async fn attendance_entries(&self, face_id: &str) -> CoreResult<Vec<AttendanceEntry>> {
        let names: HashMap<FaceId, String> = self
            .coordinator
            .list()
            .await?
            .into_iter()
            .map(|r| (r.id, r.name))
            .collect();

        let events = if face_id.is_empty() {
            self.ledger.find_all().await?
        } else {
            let id: FaceId = face_id.parse()?;
            if !names.contains_key(&id) {
                return Err(CoreError::NotFound(id));
            }
            self.ledger.find_by_face(&id).await?
        };

        Ok(events
            .into_iter()
            .map(|e| AttendanceEntry {
                id: e.id.to_string(),
                face_id: e.face_id.to_string(),
                name: names.get(&e.face_id).cloned(),
                timestamp: e.timestamp,
            })
            .collect())
    }

    pub async fn status(&self) -> StatusResponse {
        let faces = match self.faces.count().await {
            Ok(n) => Some(n),
            Err(err) => {
                tracing::warn!(error = %err, "status: face count unavailable");
                None
            }
        };
        StatusResponse {
            version: env!("CARGO_PKG_VERSION"),
            backend: self.backend,
            faces,
            threshold: self.engine.threshold().value(),
            model: self.model.clone(),
            embedding_dim: self.dim,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use smartgate_core::envelope::Envelope;
    use smartgate_core::{ExtractionError, MemoryFaceStore, MemoryLedger};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps known image strings to fixed embeddings.
    #[derive(Default)]
    struct FakeExtractor {
        known: HashMap<String, Vec<f32>>,
        calls: AtomicUsize,
    }

    impl FakeExtractor {
        fn with(mut self, img: &str, values: &[f32]) -> Self {
            self.known.insert(img.to_string(), values.to_vec());
            self
        }
    }

    #[async_trait]
    impl EmbeddingExtractor for FakeExtractor {
        async fn extract(
            &self,
            image: &ImagePayload,
            model: &str,
        ) -> Result<Embedding, ExtractionError> {
            assert_eq!(model, "Facenet");
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.known.get(image.as_str()) {
                Some(values) => Ok(Embedding::new(values.clone()).unwrap()),
                None => Err(ExtractionError::NoFace),
            }
        }
    }

    struct Fixture {
        service: FaceService,
        extractor: Arc<FakeExtractor>,
        ledger: Arc<MemoryLedger>,
    }

    fn fixture() -> Fixture {
        let extractor = Arc::new(
            FakeExtractor::default()
                .with("alice.jpg", &[0.0, 0.0, 0.0])
                .with("alice-again.jpg", &[1.0, 1.0, 1.0])
                .with("alice-new.jpg", &[20.0, 20.0, 20.0])
                .with("bob.jpg", &[10.0, 10.0, 10.0])
                .with("stranger.jpg", &[-40.0, 0.0, 0.0])
                .with("short.jpg", &[1.0, 2.0]),
        );
        let faces = Arc::new(MemoryFaceStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let service = FaceService::new(
            extractor.clone(),
            faces,
            ledger.clone(),
            Threshold::new(5.0).unwrap(),
            "Facenet".into(),
            3,
            "memory",
        );
        Fixture {
            service,
            extractor,
            ledger,
        }
    }

    fn img(s: &str) -> ImagePayload {
        ImagePayload::new(s)
    }

    #[tokio::test]
    async fn test_add_then_verify() {
        let fx = fixture();
        let added = fx.service.add_face(&img("alice.jpg"), "Alice").await;
        assert!(added.success);
        assert_eq!(added.message, "Face added successfully");
        assert_eq!(added.status_code(), 201);
        fx.service.add_face(&img("bob.jpg"), "Bob").await;

        let verified = fx.service.verify_face(&img("alice-again.jpg")).await;
        assert!(verified.success);
        assert!(verified.verified);
        let m = verified.face_match.unwrap();
        assert_eq!(Some(m.id.to_string()), added.face_id);
        assert_eq!(m.name, "Alice");
    }

    #[tokio::test]
    async fn test_verify_empty_store_succeeds_without_match() {
        let fx = fixture();
        let resp = fx.service.verify_face(&img("alice.jpg")).await;
        assert!(resp.success);
        assert!(!resp.verified);
        assert_eq!(resp.message.as_deref(), Some("No matching face found"));
    }

    #[tokio::test]
    async fn test_extraction_failure_is_reported() {
        let fx = fixture();
        let resp = fx.service.verify_face(&img("unknown.jpg")).await;
        assert!(!resp.success);
        assert!(resp.message.unwrap().starts_with("Error: "));
    }

    #[tokio::test]
    async fn test_add_rejects_missing_fields_and_bad_dimension() {
        let fx = fixture();
        let resp = fx.service.add_face(&img("alice.jpg"), "  ").await;
        assert!(!resp.success);
        assert_eq!(resp.message, "Missing required fields (img, name)");

        let resp = fx.service.add_face(&img("short.jpg"), "Shorty").await;
        assert!(!resp.success);
        assert!(resp.message.contains("dimensions"));
        assert_eq!(resp.status_code(), 201);
    }

    #[tokio::test]
    async fn test_replace_flow() {
        let fx = fixture();
        let added = fx.service.add_face(&img("alice.jpg"), "Alice").await;
        let id = added.face_id.unwrap();

        let replaced = fx
            .service
            .replace_face(&id, &img("alice-new.jpg"), "Alice2")
            .await;
        assert!(replaced.success);
        assert_eq!(replaced.message, "Face updated successfully");
        assert_eq!(replaced.status_code(), 200);
        assert_eq!(replaced.face_id.as_deref(), Some(id.as_str()));

        let verified = fx.service.verify_face(&img("alice-new.jpg")).await;
        assert_eq!(verified.face_match.unwrap().name, "Alice2");
    }

    #[tokio::test]
    async fn test_replace_missing_skips_extraction() {
        let fx = fixture();
        let resp = fx
            .service
            .replace_face(&FaceId::generate().to_string(), &img("alice.jpg"), "Ghost")
            .await;
        assert!(!resp.success);
        assert_eq!(resp.message, "Face not found");
        assert_eq!(fx.extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_id_is_an_error_message() {
        let fx = fixture();
        let resp = fx.service.delete_face("not-a-uuid").await;
        assert!(!resp.success);
        assert!(resp.message.starts_with("Error: "));
    }

    #[tokio::test]
    async fn test_sign_in_records_attendance_and_delete_cascades() {
        let fx = fixture();
        let id = fx
            .service
            .add_face(&img("alice.jpg"), "Alice")
            .await
            .face_id
            .unwrap();

        for _ in 0..3 {
            let resp = fx.service.sign_in(&img("alice-again.jpg")).await;
            assert!(resp.success);
            assert_eq!(resp.face_id.as_deref(), Some(id.as_str()));
            assert!(resp.attendance_id.is_some());
        }

        let history = fx.service.attendance(&id).await;
        assert!(history.success);
        assert_eq!(history.records.len(), 3);
        assert_eq!(history.records[0].name.as_deref(), Some("Alice"));

        let deleted = fx.service.delete_face(&id).await;
        assert!(deleted.success);
        assert_eq!(
            deleted.message,
            "Face and 3 attendance records deleted successfully"
        );
        assert!(fx.ledger.find_all().await.unwrap().is_empty());

        let again = fx.service.delete_face(&id).await;
        assert!(!again.success);
        assert_eq!(again.message, "Face not found");
    }

    #[tokio::test]
    async fn test_sign_in_unrecognized_writes_nothing() {
        let fx = fixture();
        fx.service.add_face(&img("alice.jpg"), "Alice").await;

        let resp = fx.service.sign_in(&img("stranger.jpg")).await;
        assert!(!resp.success);
        assert_eq!(resp.message, "Face not recognized");
        assert!(fx.ledger.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attendance_unknown_face() {
        let fx = fixture();
        let resp = fx.service.attendance(&FaceId::generate().to_string()).await;
        assert!(!resp.success);
        assert_eq!(resp.message.as_deref(), Some("Face not found"));

        let all = fx.service.attendance("").await;
        assert!(all.success);
        assert!(all.records.is_empty());
    }

    #[tokio::test]
    async fn test_list_and_status() {
        let fx = fixture();
        fx.service.add_face(&img("alice.jpg"), "Alice").await;
        fx.service.add_face(&img("bob.jpg"), "Bob").await;

        let list = fx.service.list_faces().await;
        let names: Vec<_> = list.faces.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);

        let status = fx.service.status().await;
        assert_eq!(status.faces, Some(2));
        assert_eq!(status.backend, "memory");
        assert_eq!(status.threshold, 5.0);
    }
}
