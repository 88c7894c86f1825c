use std::sync::Arc;

use anyhow::{Context, Result};
use smartgate_core::{AttendanceLedger, FaceRecordStore, MemoryFaceStore, MemoryLedger, Threshold};
use smartgate_store::SqliteStore;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod extractor;
mod service;

use config::{BusKind, Config, StoreBackend};
use dbus_interface::{GateService, BUS_NAME, OBJECT_PATH};
use extractor::DeepFaceClient;
use service::FaceService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("smartgated starting");

    let config = Config::from_env();
    config.validate().context("invalid configuration")?;
    tracing::info!(
        backend = ?config.store_backend,
        db = %config.db_path.display(),
        deepface = %config.deepface_url,
        model = %config.model_name,
        threshold = config.threshold,
        dim = config.embedding_dim,
        "configuration loaded"
    );

    let faces: Arc<dyn FaceRecordStore>;
    let ledger: Arc<dyn AttendanceLedger>;
    let backend = match config.store_backend {
        StoreBackend::Sqlite => {
            let store = Arc::new(
                SqliteStore::open(&config.db_path)
                    .await
                    .with_context(|| format!("opening {}", config.db_path.display()))?,
            );
            faces = store.clone();
            ledger = store;
            "sqlite"
        }
        StoreBackend::Memory => {
            tracing::warn!("memory backend: enrolled faces are lost on restart");
            faces = Arc::new(MemoryFaceStore::new());
            ledger = Arc::new(MemoryLedger::new());
            "memory"
        }
    };

    let extractor = Arc::new(
        DeepFaceClient::new(&config.deepface_url, config.extract_timeout())
            .context("building embedding client")?,
    );

    let service = Arc::new(FaceService::new(
        extractor,
        faces,
        ledger,
        Threshold::new(config.threshold)?,
        config.model_name.clone(),
        config.embedding_dim,
        backend,
    ));

    let builder = match config.bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, GateService::new(service))?
        .build()
        .await
        .context("registering D-Bus service")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "smartgated ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("smartgated shutting down");

    Ok(())
}
