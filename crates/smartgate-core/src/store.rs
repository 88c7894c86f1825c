//! Persistence contracts for enrolled faces and attendance events, plus the
//! in-memory implementations used by tests and the `memory` backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::types::{AttendanceId, AttendanceRecord, Embedding, FaceId, FaceRecord};

/// Collection of enrolled identities.
///
/// `find_all` must return records in a stable order; the matcher's
/// tie-break depends on it.
#[async_trait]
pub trait FaceRecordStore: Send + Sync {
    async fn insert(&self, name: &str, embedding: &Embedding) -> Result<FaceId, StoreError>;
    async fn find_all(&self) -> Result<Vec<FaceRecord>, StoreError>;
    async fn find_by_id(&self, id: &FaceId) -> Result<Option<FaceRecord>, StoreError>;
    /// Returns the number of records modified.
    async fn update(
        &self,
        id: &FaceId,
        name: &str,
        embedding: &Embedding,
    ) -> Result<u64, StoreError>;
    /// Returns the number of records removed.
    async fn delete(&self, id: &FaceId) -> Result<u64, StoreError>;
    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.find_all().await?.len() as u64)
    }
}

/// Append-mostly collection of attendance events keyed by a weak `face_id`.
#[async_trait]
pub trait AttendanceLedger: Send + Sync {
    async fn record(
        &self,
        face_id: &FaceId,
        timestamp: DateTime<Utc>,
    ) -> Result<AttendanceRecord, StoreError>;
    /// Newest first.
    async fn find_by_face(&self, face_id: &FaceId) -> Result<Vec<AttendanceRecord>, StoreError>;
    /// Newest first.
    async fn find_all(&self) -> Result<Vec<AttendanceRecord>, StoreError>;
    /// Returns the number of events removed.
    async fn delete_by_face(&self, face_id: &FaceId) -> Result<u64, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryFaceStore {
    records: Mutex<Vec<FaceRecord>>,
}

impl MemoryFaceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FaceRecordStore for MemoryFaceStore {
    async fn insert(&self, name: &str, embedding: &Embedding) -> Result<FaceId, StoreError> {
        let id = FaceId::generate();
        self.records.lock().push(FaceRecord {
            id,
            name: name.to_string(),
            embedding: embedding.clone(),
        });
        Ok(id)
    }

    async fn find_all(&self) -> Result<Vec<FaceRecord>, StoreError> {
        Ok(self.records.lock().clone())
    }

    async fn find_by_id(&self, id: &FaceId) -> Result<Option<FaceRecord>, StoreError> {
        Ok(self.records.lock().iter().find(|r| r.id == *id).cloned())
    }

    async fn update(
        &self,
        id: &FaceId,
        name: &str,
        embedding: &Embedding,
    ) -> Result<u64, StoreError> {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.id == *id) {
            Some(record) => {
                record.name = name.to_string();
                record.embedding = embedding.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete(&self, id: &FaceId) -> Result<u64, StoreError> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.id != *id);
        Ok((before - records.len()) as u64)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.records.lock().len() as u64)
    }
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    events: Mutex<Vec<AttendanceRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(mut events: Vec<AttendanceRecord>) -> Vec<AttendanceRecord> {
    // Equal timestamps: later insert comes first.
    events.sort_by_key(|e| e.timestamp);
    events.reverse();
    events
}

#[async_trait]
impl AttendanceLedger for MemoryLedger {
    async fn record(
        &self,
        face_id: &FaceId,
        timestamp: DateTime<Utc>,
    ) -> Result<AttendanceRecord, StoreError> {
        let event = AttendanceRecord {
            id: AttendanceId::generate(),
            face_id: *face_id,
            timestamp,
        };
        self.events.lock().push(event.clone());
        Ok(event)
    }

    async fn find_by_face(&self, face_id: &FaceId) -> Result<Vec<AttendanceRecord>, StoreError> {
        let events = self
            .events
            .lock()
            .iter()
            .filter(|e| e.face_id == *face_id)
            .cloned()
            .collect();
        Ok(newest_first(events))
    }

    async fn find_all(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(newest_first(self.events.lock().clone()))
    }

    async fn delete_by_face(&self, face_id: &FaceId) -> Result<u64, StoreError> {
        let mut events = self.events.lock();
        let before = events.len();
        events.retain(|e| e.face_id != *face_id);
        Ok((before - events.len()) as u64)
    }
}
