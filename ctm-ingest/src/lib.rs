//! ctm-ingest library interface
//!
//! Upload ingestion pipeline for the clinical trial monitor, plus the HTTP
//! surface that exposes it. Integration tests drive both through this crate.

pub mod api;
pub mod db;
pub mod error;
pub mod services;

pub use crate::error::{ApiError, ApiResult, IngestError, IngestResult, RecordRejection};

use axum::Router;
use chrono::{DateTime, Utc};
use ctm_common::config::UploadConfig;
use ctm_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db::{ClinicalStore, SqliteStore};
use crate::services::FileProcessor;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Persistence gateway over `db`
    pub store: Arc<dyn ClinicalStore>,
    /// Upload pipeline
    pub processor: FileProcessor,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last storage error, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
    /// Largest accepted upload in bytes
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self::with_upload_config(db, event_bus, &UploadConfig::default())
    }

    pub fn with_upload_config(db: SqlitePool, event_bus: EventBus, upload: &UploadConfig) -> Self {
        let store: Arc<dyn ClinicalStore> = Arc::new(SqliteStore::new(db.clone()));
        let processor = FileProcessor::new(Arc::clone(&store), event_bus.clone());
        Self {
            db,
            store,
            processor,
            event_bus,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
            max_upload_bytes: upload.max_bytes,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::upload_routes(state.max_upload_bytes))
        .merge(api::analysis_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
