//! SQLite-backed face store and attendance ledger on a single connection.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use smartgate_core::{
    AttendanceId, AttendanceLedger, AttendanceRecord, Embedding, FaceId, FaceRecord,
    FaceRecordStore, StoreError,
};

use crate::schema::apply_schema;

/// Implements both [`FaceRecordStore`] and [`AttendanceLedger`] over one
/// `tokio_rusqlite` connection. The two collections are written with
/// separate statements; there is no transaction spanning a cascade.
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(map_err)?;
        conn.call(|conn| {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            tracing::debug!(journal_mode = %mode, "sqlite journal mode");
            apply_schema(conn)?;
            Ok(())
        })
        .await
        .map_err(map_err)?;

        tracing::info!(path = %path.display(), "sqlite store opened");
        Ok(Self { conn })
    }

    /// Fresh private in-memory database.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(map_err)?;
        conn.call(|conn| Ok(apply_schema(conn)?))
            .await
            .map_err(map_err)?;
        Ok(Self { conn })
    }
}

fn map_err(err: tokio_rusqlite::Error) -> StoreError {
    match err {
        tokio_rusqlite::Error::ConnectionClosed => {
            StoreError::Unavailable("connection closed".into())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

fn timestamp_to_sql(ts: &DateTime<Utc>) -> String {
    // Fixed width so lexical order equals chronological order.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp_from_sql(id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("bad timestamp {raw:?}: {e}"),
        })
}

pub(crate) fn embedding_to_blob(embedding: &Embedding) -> Vec<u8> {
    embedding
        .values()
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

pub(crate) fn embedding_from_blob(id: &str, blob: &[u8]) -> Result<Embedding, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("embedding blob of {} bytes is not a whole number of f32", blob.len()),
        });
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Embedding::new(values).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn parse_face_id(raw: &str) -> Result<FaceId, StoreError> {
    raw.parse().map_err(|_| StoreError::Corrupt {
        id: raw.to_string(),
        reason: "id is not a uuid".into(),
    })
}

type FaceRow = (String, String, Vec<u8>);
type AttendanceRow = (String, String, String);

fn decode_face((id, name, blob): FaceRow) -> Result<FaceRecord, StoreError> {
    Ok(FaceRecord {
        id: parse_face_id(&id)?,
        embedding: embedding_from_blob(&id, &blob)?,
        name,
    })
}

fn decode_attendance((id, face_id, ts): AttendanceRow) -> Result<AttendanceRecord, StoreError> {
    let attendance_id: AttendanceId = id.parse().map_err(|_| StoreError::Corrupt {
        id: id.clone(),
        reason: "id is not a uuid".into(),
    })?;
    Ok(AttendanceRecord {
        id: attendance_id,
        face_id: parse_face_id(&face_id)?,
        timestamp: timestamp_from_sql(&id, &ts)?,
    })
}

#[async_trait]
impl FaceRecordStore for SqliteStore {
    async fn insert(&self, name: &str, embedding: &Embedding) -> Result<FaceId, StoreError> {
        let id = FaceId::generate();
        let row = (
            id.to_string(),
            name.to_string(),
            embedding_to_blob(embedding),
            timestamp_to_sql(&Utc::now()),
        );
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO faces (id, name, embedding, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![row.0, row.1, row.2, row.3],
                )?;
                Ok(())
            })
            .await
            .map_err(map_err)?;
        Ok(id)
    }

    async fn find_all(&self) -> Result<Vec<FaceRecord>, StoreError> {
        let rows: Vec<FaceRow> = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, name, embedding FROM faces ORDER BY rowid")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect::<Result<Vec<FaceRow>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_err)?;
        rows.into_iter().map(decode_face).collect()
    }

    async fn find_by_id(&self, id: &FaceId) -> Result<Option<FaceRecord>, StoreError> {
        let key = id.to_string();
        let row: Option<FaceRow> = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, name, embedding FROM faces WHERE id = ?1",
                        params![key],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?)
            })
            .await
            .map_err(map_err)?;
        row.map(decode_face).transpose()
    }

    async fn update(
        &self,
        id: &FaceId,
        name: &str,
        embedding: &Embedding,
    ) -> Result<u64, StoreError> {
        let row = (id.to_string(), name.to_string(), embedding_to_blob(embedding));
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE faces SET name = ?2, embedding = ?3 WHERE id = ?1",
                    params![row.0, row.1, row.2],
                )?)
            })
            .await
            .map_err(map_err)?;
        Ok(changed as u64)
    }

    async fn delete(&self, id: &FaceId) -> Result<u64, StoreError> {
        let key = id.to_string();
        let removed = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM faces WHERE id = ?1", params![key])?))
            .await
            .map_err(map_err)?;
        Ok(removed as u64)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = self
            .conn
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM faces", [], |row| row.get(0))?))
            .await
            .map_err(map_err)?;
        Ok(n as u64)
    }
}

#[async_trait]
impl AttendanceLedger for SqliteStore {
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
        let row = (
            event.id.to_string(),
            face_id.to_string(),
            timestamp_to_sql(&timestamp),
        );
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attendance (id, face_id, timestamp) VALUES (?1, ?2, ?3)",
                    params![row.0, row.1, row.2],
                )?;
                Ok(())
            })
            .await
            .map_err(map_err)?;
        Ok(event)
    }

    async fn find_by_face(&self, face_id: &FaceId) -> Result<Vec<AttendanceRecord>, StoreError> {
        let key = face_id.to_string();
        let rows: Vec<AttendanceRow> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, face_id, timestamp FROM attendance
                     WHERE face_id = ?1 ORDER BY timestamp DESC, rowid DESC",
                )?;
                let rows = stmt
                    .query_map(params![key], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<Result<Vec<AttendanceRow>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_err)?;
        rows.into_iter().map(decode_attendance).collect()
    }

    async fn find_all(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        let rows: Vec<AttendanceRow> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, face_id, timestamp FROM attendance
                     ORDER BY timestamp DESC, rowid DESC",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect::<Result<Vec<AttendanceRow>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_err)?;
        rows.into_iter().map(decode_attendance).collect()
    }

    async fn delete_by_face(&self, face_id: &FaceId) -> Result<u64, StoreError> {
        let key = face_id.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM attendance WHERE face_id = ?1", params![key])?)
            })
            .await
            .map_err(map_err)?;
        Ok(removed as u64)
    }
}
