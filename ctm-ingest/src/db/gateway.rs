//! Persistence gateway consumed by the ingest pipeline
//!
//! The pipeline only talks to storage through [`ClinicalStore`]. Every insert
//! is insert-if-absent and reports whether it created a row; uniqueness is
//! decided by the store, never by a read-then-write in the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctm_common::db::{
    LabResult, MedicationEvent, NewLabResult, NewMedicationEvent, NewOutlierLog, OutlierLog,
    OutlierType, Patient, Symptom, Trial, UploadFingerprint,
};
use ctm_common::Result;

/// Outcome of an outlier log upsert
#[derive(Debug, Clone, PartialEq)]
pub enum OutlierInsert {
    /// New entry stored; should be broadcast
    Created(OutlierLog),
    /// An entry with the same (patient, message, type, reported date) existed
    Existing(OutlierLog),
}

impl OutlierInsert {
    pub fn log(&self) -> &OutlierLog {
        match self {
            OutlierInsert::Created(log) | OutlierInsert::Existing(log) => log,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, OutlierInsert::Created(_))
    }
}

/// Abstract CRUD against the clinical store
///
/// Implementations must be safe to call from concurrent pipeline runs.
#[async_trait]
pub trait ClinicalStore: Send + Sync {
    async fn find_trial(&self, id: &str) -> Result<Option<Trial>>;

    /// Returns `false` when a trial with this id already exists
    async fn insert_trial(&self, trial: &Trial) -> Result<bool>;

    async fn find_patient(&self, id: &str) -> Result<Option<Patient>>;

    /// Returns `false` when the patient is already enrolled
    async fn insert_patient(&self, patient: &Patient) -> Result<bool>;

    /// Returns `false` when a symptom with this id already exists
    async fn insert_symptom(&self, symptom: &Symptom) -> Result<bool>;

    async fn insert_lab_result(&self, result: &NewLabResult) -> Result<LabResult>;

    /// Returns `None` when (patient, medication, administered date) already exists
    async fn insert_medication_event(
        &self,
        event: &NewMedicationEvent,
    ) -> Result<Option<MedicationEvent>>;

    /// Atomic upsert keyed by (patient, message, type, reported date)
    async fn insert_outlier_log(&self, log: &NewOutlierLog) -> Result<OutlierInsert>;

    async fn find_outlier_log_by_tuple(
        &self,
        patient_id: &str,
        message: &str,
        outlier_type: OutlierType,
        reported_date: &DateTime<Utc>,
    ) -> Result<Option<OutlierLog>>;

    async fn find_fingerprint(&self, digest: &str) -> Result<Option<UploadFingerprint>>;

    /// Returns `false` when the digest was already recorded
    async fn record_fingerprint(&self, fingerprint: &UploadFingerprint) -> Result<bool>;

    async fn count_patients(&self) -> Result<i64>;

    /// `None` when no symptoms are stored
    async fn avg_symptom_severity(&self) -> Result<Option<f64>>;

    async fn count_outlier_logs(&self) -> Result<i64>;

    /// Most recently detected outliers first
    async fn recent_outliers(&self, limit: i64) -> Result<Vec<OutlierLog>>;

    /// Outliers ordered by clinical event time, newest first
    async fn outliers_by_reported_date(&self, limit: i64) -> Result<Vec<OutlierLog>>;
}
