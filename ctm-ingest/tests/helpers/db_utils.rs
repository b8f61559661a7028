//! Database Test Utilities

use anyhow::Result;
use ctm_common::config::DatabaseConfig;
use ctm_common::events::EventBus;
use ctm_ingest::db::{init_database_pool, ClinicalStore, SqliteStore};
use ctm_ingest::services::FileProcessor;
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

/// Create temporary file-backed test database with the schema applied
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_ctm.db");

    let pool = init_database_pool(&db_path, &DatabaseConfig::default()).await?;

    Ok((temp_dir, pool))
}

/// Pipeline over a fresh database, with its event bus
pub async fn create_test_processor() -> Result<(TempDir, SqlitePool, FileProcessor, EventBus)> {
    let (temp_dir, pool) = create_test_db().await?;
    let store: Arc<dyn ClinicalStore> = Arc::new(SqliteStore::new(pool.clone()));
    let event_bus = EventBus::new(1000);
    let processor = FileProcessor::new(store, event_bus.clone());
    Ok((temp_dir, pool, processor, event_bus))
}

/// Row count of a table
pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    let query = format!("SELECT COUNT(*) FROM {}", table);
    sqlx::query_scalar(&query).fetch_one(pool).await.unwrap()
}
