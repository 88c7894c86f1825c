use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use smartgate_core::Threshold;

/// Which backend holds faces and attendance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    /// Volatile; contents are lost on restart.
    Memory,
}

/// Which D-Bus bus the daemon claims its name on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    System,
    Session,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    pub store_backend: StoreBackend,
    /// Base URL of the DeepFace-compatible embedding service.
    pub deepface_url: String,
    /// Model identifier passed to the embedding service (default: Facenet).
    pub model_name: String,
    /// Maximum Euclidean distance for a positive match.
    pub threshold: f32,
    /// Embedding length produced by `model_name`.
    pub embedding_dim: usize,
    /// Timeout in seconds for one extraction request.
    pub extract_timeout_secs: u64,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `SMARTGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("smartgate");

        let db_path = std::env::var("SMARTGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("smartgate.db"));

        Self {
            db_path,
            store_backend: parse_backend(std::env::var("SMARTGATE_STORE_BACKEND").ok().as_deref()),
            deepface_url: std::env::var("SMARTGATE_DEEPFACE_URL")
                .unwrap_or_else(|_| "http://localhost:5005".to_string()),
            model_name: std::env::var("SMARTGATE_MODEL_NAME")
                .unwrap_or_else(|_| "Facenet".to_string()),
            threshold: env_f32("SMARTGATE_THRESHOLD", 10.0),
            embedding_dim: env_usize("SMARTGATE_EMBEDDING_DIM", 128),
            extract_timeout_secs: env_u64("SMARTGATE_EXTRACT_TIMEOUT_SECS", 30),
            bus: parse_bus(std::env::var("SMARTGATE_BUS").ok().as_deref()),
        }
    }

    /// Reject settings the core cannot run with.
    pub fn validate(&self) -> Result<()> {
        Threshold::new(self.threshold)?;
        if self.embedding_dim == 0 {
            bail!("SMARTGATE_EMBEDDING_DIM must be greater than zero");
        }
        if self.extract_timeout_secs == 0 {
            bail!("SMARTGATE_EXTRACT_TIMEOUT_SECS must be greater than zero");
        }
        Ok(())
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }
}

fn parse_backend(value: Option<&str>) -> StoreBackend {
    match value.map(str::trim) {
        Some(v) if v.eq_ignore_ascii_case("memory") => StoreBackend::Memory,
        _ => StoreBackend::Sqlite,
    }
}

fn parse_bus(value: Option<&str>) -> BusKind {
    match value.map(str::trim) {
        Some(v) if v.eq_ignore_ascii_case("session") => BusKind::Session,
        _ => BusKind::System,
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
