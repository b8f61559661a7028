//! SQLite implementation of the clinical store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctm_common::db::{
    AnomalyDetail, LabResult, MedicationEvent, NewLabResult, NewMedicationEvent, NewOutlierLog,
    OutlierLog, OutlierType, Patient, Symptom, Trial, UploadFingerprint,
};
use ctm_common::time::{format_timestamp, parse_stored_timestamp};
use ctm_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::gateway::{ClinicalStore, OutlierInsert};

const OUTLIER_COLUMNS: &str = "id, patient_id, message, type, created_at, reported_date, detail";

/// Clinical store backed by a sqlx SQLite pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn timestamp_column(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.get(column);
    parse_stored_timestamp(&raw)
        .ok_or_else(|| Error::Internal(format!("Invalid timestamp in column {}: {}", column, raw)))
}

fn row_to_outlier(row: &SqliteRow) -> Result<OutlierLog> {
    let type_str: String = row.get("type");
    let detail_json: Option<String> = row.get("detail");
    let detail = match detail_json {
        Some(json) => Some(
            serde_json::from_str::<AnomalyDetail>(&json)
                .map_err(|e| Error::Internal(format!("Invalid outlier detail: {}", e)))?,
        ),
        None => None,
    };

    Ok(OutlierLog {
        id: row.get("id"),
        patient_id: row.get("patient_id"),
        message: row.get("message"),
        outlier_type: type_str.parse()?,
        created_at: timestamp_column(row, "created_at")?,
        reported_date: timestamp_column(row, "reported_date")?,
        detail,
    })
}

fn row_to_medication_event(row: &SqliteRow) -> Result<MedicationEvent> {
    Ok(MedicationEvent {
        id: row.get("id"),
        patient_id: row.get("patient_id"),
        medication: row.get("medication"),
        dosage: row.get("dosage"),
        administered_date: timestamp_column(row, "administered_date")?,
        created_at: timestamp_column(row, "created_at")?,
    })
}

#[async_trait]
impl ClinicalStore for SqliteStore {
    async fn find_trial(&self, id: &str) -> Result<Option<Trial>> {
        let row = sqlx::query("SELECT id, name, start_date FROM trials WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Trial {
                id: row.get("id"),
                name: row.get("name"),
                start_date: timestamp_column(&row, "start_date")?,
            })),
            None => Ok(None),
        }
    }

    async fn insert_trial(&self, trial: &Trial) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO trials (id, name, start_date) VALUES (?, ?, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(&trial.id)
        .bind(&trial.name)
        .bind(format_timestamp(&trial.start_date))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_patient(&self, id: &str) -> Result<Option<Patient>> {
        let row = sqlx::query("SELECT id, trial_id, enroll_date FROM patients WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Patient {
                id: row.get("id"),
                trial_id: row.get("trial_id"),
                enroll_date: timestamp_column(&row, "enroll_date")?,
            })),
            None => Ok(None),
        }
    }

    async fn insert_patient(&self, patient: &Patient) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO patients (id, trial_id, enroll_date)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&patient.id)
        .bind(&patient.trial_id)
        .bind(format_timestamp(&patient.enroll_date))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_symptom(&self, symptom: &Symptom) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO symptoms (id, patient_id, symptom, severity, reported_date)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&symptom.id)
        .bind(&symptom.patient_id)
        .bind(&symptom.symptom)
        .bind(symptom.severity)
        .bind(format_timestamp(&symptom.reported_date))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_lab_result(&self, result: &NewLabResult) -> Result<LabResult> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO lab_results (patient_id, test_type, value, units, result_date, file_hash)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&result.patient_id)
        .bind(&result.test_type)
        .bind(result.value)
        .bind(&result.units)
        .bind(format_timestamp(&result.result_date))
        .bind(&result.file_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(LabResult {
            id,
            patient_id: result.patient_id.clone(),
            test_type: result.test_type.clone(),
            value: result.value,
            units: result.units.clone(),
            result_date: result.result_date,
            file_hash: result.file_hash.clone(),
        })
    }

    async fn insert_medication_event(
        &self,
        event: &NewMedicationEvent,
    ) -> Result<Option<MedicationEvent>> {
        let row = sqlx::query(
            r#"
            INSERT INTO medication_events (patient_id, medication, dosage, administered_date, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(patient_id, medication, administered_date) DO NOTHING
            RETURNING id, patient_id, medication, dosage, administered_date, created_at
            "#,
        )
        .bind(&event.patient_id)
        .bind(&event.medication)
        .bind(&event.dosage)
        .bind(format_timestamp(&event.administered_date))
        .bind(format_timestamp(&Utc::now()))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_medication_event).transpose()
    }

    async fn insert_outlier_log(&self, log: &NewOutlierLog) -> Result<OutlierInsert> {
        let detail = log
            .detail
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| Error::Internal(format!("Failed to serialize outlier detail: {}", e)))?;

        let query = format!(
            r#"
            INSERT INTO outlier_logs (patient_id, message, type, created_at, reported_date, detail)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(patient_id, message, type, reported_date) DO NOTHING
            RETURNING {}
            "#,
            OUTLIER_COLUMNS
        );

        let inserted = sqlx::query(&query)
            .bind(&log.patient_id)
            .bind(&log.message)
            .bind(log.outlier_type.as_str())
            .bind(format_timestamp(&Utc::now()))
            .bind(format_timestamp(&log.reported_date))
            .bind(detail)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = inserted {
            return Ok(OutlierInsert::Created(row_to_outlier(&row)?));
        }

        let existing = self
            .find_outlier_log_by_tuple(
                &log.patient_id,
                &log.message,
                log.outlier_type,
                &log.reported_date,
            )
            .await?
            .ok_or_else(|| {
                Error::Internal(format!(
                    "Outlier log conflict without existing row for patient {}",
                    log.patient_id
                ))
            })?;

        Ok(OutlierInsert::Existing(existing))
    }

    async fn find_outlier_log_by_tuple(
        &self,
        patient_id: &str,
        message: &str,
        outlier_type: OutlierType,
        reported_date: &DateTime<Utc>,
    ) -> Result<Option<OutlierLog>> {
        let query = format!(
            r#"
            SELECT {}
            FROM outlier_logs
            WHERE patient_id = ? AND message = ? AND type = ? AND reported_date = ?
            LIMIT 1
            "#,
            OUTLIER_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(patient_id)
            .bind(message)
            .bind(outlier_type.as_str())
            .bind(format_timestamp(reported_date))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_outlier).transpose()
    }

    async fn find_fingerprint(&self, digest: &str) -> Result<Option<UploadFingerprint>> {
        let row = sqlx::query(
            "SELECT digest, kind, record_count, created_at FROM upload_fingerprints WHERE digest = ?",
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(UploadFingerprint {
                digest: row.get("digest"),
                kind: row.get("kind"),
                record_count: row.get("record_count"),
                created_at: timestamp_column(&row, "created_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn record_fingerprint(&self, fingerprint: &UploadFingerprint) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO upload_fingerprints (digest, kind, record_count, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(digest) DO NOTHING
            "#,
        )
        .bind(&fingerprint.digest)
        .bind(&fingerprint.kind)
        .bind(fingerprint.record_count)
        .bind(format_timestamp(&fingerprint.created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_patients(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patients")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn avg_symptom_severity(&self) -> Result<Option<f64>> {
        let avg: Option<f64> = sqlx::query_scalar("SELECT AVG(severity) FROM symptoms")
            .fetch_one(&self.pool)
            .await?;
        Ok(avg)
    }

    async fn count_outlier_logs(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outlier_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn recent_outliers(&self, limit: i64) -> Result<Vec<OutlierLog>> {
        let query = format!(
            "SELECT {} FROM outlier_logs ORDER BY created_at DESC, id DESC LIMIT ?",
            OUTLIER_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_outlier).collect()
    }

    async fn outliers_by_reported_date(&self, limit: i64) -> Result<Vec<OutlierLog>> {
        let query = format!(
            "SELECT {} FROM outlier_logs ORDER BY reported_date DESC, id DESC LIMIT ?",
            OUTLIER_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_outlier).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_pool;
    use chrono::TimeZone;

    async fn store() -> SqliteStore {
        SqliteStore::new(open_memory_pool().await.unwrap())
    }

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    async fn enroll(store: &SqliteStore, patient_id: &str) {
        store
            .insert_trial(&Trial {
                id: "T1".to_string(),
                name: "Trial One".to_string(),
                start_date: date(2024, 1, 1),
            })
            .await
            .unwrap();
        store
            .insert_patient(&Patient {
                id: patient_id.to_string(),
                trial_id: "T1".to_string(),
                enroll_date: date(2024, 2, 1),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_trial_insert_is_idempotent() {
        let store = store().await;
        let trial = Trial {
            id: "T999".to_string(),
            name: "Default Trial".to_string(),
            start_date: date(2025, 1, 1),
        };
        assert!(store.insert_trial(&trial).await.unwrap());
        assert!(!store.insert_trial(&trial).await.unwrap());

        let found = store.find_trial("T999").await.unwrap().unwrap();
        assert_eq!(found, trial);
    }

    #[tokio::test]
    async fn test_patient_requires_existing_trial() {
        let store = store().await;
        let result = store
            .insert_patient(&Patient {
                id: "P1".to_string(),
                trial_id: "NOPE".to_string(),
                enroll_date: date(2025, 1, 1),
            })
            .await;
        assert!(result.is_err(), "foreign key on trial_id should reject the insert");
    }

    #[tokio::test]
    async fn test_medication_event_unique_tuple() {
        let store = store().await;
        enroll(&store, "P1").await;

        let event = NewMedicationEvent {
            patient_id: "P1".to_string(),
            medication: "ASPIRIN".to_string(),
            dosage: "100mg".to_string(),
            administered_date: date(2025, 3, 1),
        };

        let first = store.insert_medication_event(&event).await.unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().medication, "ASPIRIN");

        let second = store.insert_medication_event(&event).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_outlier_upsert_returns_existing_on_same_tuple() {
        let store = store().await;
        let log = NewOutlierLog {
            patient_id: "P404".to_string(),
            message: "Patient not found in enrollment data for lab result".to_string(),
            outlier_type: OutlierType::Reference,
            reported_date: date(2025, 1, 5),
            detail: None,
        };

        let first = store.insert_outlier_log(&log).await.unwrap();
        assert!(first.is_created());

        let second = store.insert_outlier_log(&log).await.unwrap();
        assert!(!second.is_created());
        assert_eq!(second.log().id, first.log().id);
        assert_eq!(store.count_outlier_logs().await.unwrap(), 1);

        // A different reported date is a different event
        let later = NewOutlierLog {
            reported_date: date(2025, 1, 6),
            ..log
        };
        assert!(store.insert_outlier_log(&later).await.unwrap().is_created());
        assert_eq!(store.count_outlier_logs().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_outlier_detail_round_trips() {
        let store = store().await;
        let log = NewOutlierLog {
            patient_id: "P1".to_string(),
            message: "Abnormal LDL: 210 mg/dL".to_string(),
            outlier_type: OutlierType::Lab,
            reported_date: date(2025, 1, 1),
            detail: Some(AnomalyDetail::Lab {
                test_type: "LDL".to_string(),
                value: 210.0,
                units: "mg/dL".to_string(),
                threshold: 200.0,
            }),
        };
        let stored = store.insert_outlier_log(&log).await.unwrap();
        let found = store
            .find_outlier_log_by_tuple("P1", "Abnormal LDL: 210 mg/dL", OutlierType::Lab, &date(2025, 1, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&found, stored.log());
        assert_eq!(found.detail, log.detail);
        assert_eq!(found.reported_date, date(2025, 1, 1));
    }

    #[tokio::test]
    async fn test_fingerprint_recorded_once() {
        let store = store().await;
        let fp = UploadFingerprint {
            digest: "ab".repeat(32),
            kind: "symptoms".to_string(),
            record_count: 3,
            created_at: Utc::now(),
        };
        assert!(store.find_fingerprint(&fp.digest).await.unwrap().is_none());
        assert!(store.record_fingerprint(&fp).await.unwrap());
        assert!(!store.record_fingerprint(&fp).await.unwrap());
        let found = store.find_fingerprint(&fp.digest).await.unwrap().unwrap();
        assert_eq!(found.kind, "symptoms");
        assert_eq!(found.record_count, 3);
    }

    #[tokio::test]
    async fn test_aggregates() {
        let store = store().await;
        assert_eq!(store.count_patients().await.unwrap(), 0);
        assert_eq!(store.avg_symptom_severity().await.unwrap(), None);

        enroll(&store, "P1").await;
        for (id, severity) in [("S1", 4), ("S2", 8)] {
            store
                .insert_symptom(&Symptom {
                    id: id.to_string(),
                    patient_id: "P1".to_string(),
                    symptom: "nausea".to_string(),
                    severity,
                    reported_date: date(2025, 1, 2),
                })
                .await
                .unwrap();
        }

        assert_eq!(store.count_patients().await.unwrap(), 1);
        assert_eq!(store.avg_symptom_severity().await.unwrap(), Some(6.0));
    }

    #[tokio::test]
    async fn test_outlier_listing_orders() {
        let store = store().await;
        for (patient, day) in [("P1", 3), ("P2", 1), ("P3", 2)] {
            store
                .insert_outlier_log(&NewOutlierLog {
                    patient_id: patient.to_string(),
                    message: "Future enrollment date detected: x".to_string(),
                    outlier_type: OutlierType::Enrollment,
                    reported_date: date(2025, 1, day),
                    detail: None,
                })
                .await
                .unwrap();
        }

        let by_reported = store.outliers_by_reported_date(10).await.unwrap();
        let ids: Vec<_> = by_reported.iter().map(|o| o.patient_id.as_str()).collect();
        assert_eq!(ids, vec!["P1", "P3", "P2"]);

        let recent = store.recent_outliers(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        // Same created_at resolution falls back to insertion order
        assert_eq!(recent[0].patient_id, "P3");
    }
}
