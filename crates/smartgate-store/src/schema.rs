use rusqlite::Connection;

/// `faces` and `attendance` are related only by `attendance.face_id`; there
/// is deliberately no foreign key, orphans are tolerated.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS faces (
    id         TEXT PRIMARY KEY NOT NULL,
    name       TEXT NOT NULL,
    embedding  BLOB NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id        TEXT PRIMARY KEY NOT NULL,
    face_id   TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_attendance_face_id ON attendance(face_id);
";

pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}
