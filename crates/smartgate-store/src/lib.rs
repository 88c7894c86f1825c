//! smartgate-store: SQLite persistence for enrolled faces and attendance.

mod schema;
pub mod sqlite;

pub use sqlite::SqliteStore;
