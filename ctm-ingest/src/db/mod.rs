//! Database access for ctm-ingest
//!
//! SQLite via sqlx. Uniqueness rules that protect against concurrent uploads
//! (fingerprints, medication events, outlier tuples) live in the schema, so
//! the store stays correct even when two pipelines race past their pre-checks.

pub mod gateway;
pub mod sqlite;

pub use gateway::{ClinicalStore, OutlierInsert};
pub use sqlite::SqliteStore;

use ctm_common::config::DatabaseConfig;
use ctm_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Initialize database connection pool
///
/// Creates the database file and parent folder when missing, then ensures the
/// schema exists. Pool acquisition and SQLite lock waits are both bounded by
/// the configured timeouts.
pub async fn init_database_pool(db_path: &Path, config: &DatabaseConfig) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let newly_created = !db_path.exists();

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
        .connect_with(options)
        .await?;

    if newly_created {
        tracing::info!("Initialized new database: {}", db_path.display());
    } else {
        tracing::info!("Opened existing database: {}", db_path.display());
    }

    init_tables(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the full schema
///
/// Limited to a single connection: every SQLite `:memory:` connection is a
/// separate database.
pub async fn open_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;
    Ok(pool)
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS trials (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        start_date TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS patients (
        id TEXT PRIMARY KEY,
        trial_id TEXT NOT NULL REFERENCES trials(id),
        enroll_date TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS symptoms (
        id TEXT PRIMARY KEY,
        patient_id TEXT NOT NULL REFERENCES patients(id),
        symptom TEXT NOT NULL,
        severity INTEGER NOT NULL CHECK (severity BETWEEN 0 AND 10),
        reported_date TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS lab_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id TEXT NOT NULL REFERENCES patients(id),
        test_type TEXT NOT NULL,
        value REAL NOT NULL,
        units TEXT NOT NULL,
        result_date TEXT NOT NULL,
        file_hash TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_lab_results_file_hash ON lab_results(file_hash)",
    r#"
    CREATE TABLE IF NOT EXISTS medication_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id TEXT NOT NULL REFERENCES patients(id),
        medication TEXT NOT NULL,
        dosage TEXT NOT NULL,
        administered_date TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (patient_id, medication, administered_date)
    )
    "#,
    // No foreign key on patient_id: reference outliers name unknown patients
    r#"
    CREATE TABLE IF NOT EXISTS outlier_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id TEXT NOT NULL,
        message TEXT NOT NULL,
        type TEXT NOT NULL,
        created_at TEXT NOT NULL,
        reported_date TEXT NOT NULL,
        detail TEXT,
        UNIQUE (patient_id, message, type, reported_date)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_outlier_logs_created_at ON outlier_logs(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_outlier_logs_reported_date ON outlier_logs(reported_date)",
    r#"
    CREATE TABLE IF NOT EXISTS upload_fingerprints (
        digest TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        record_count INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
];

/// Create ctm-ingest tables if they don't exist
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!(
        "Database tables initialized (trials, patients, symptoms, lab_results, medication_events, outlier_logs, upload_fingerprints)"
    );

    Ok(())
}
