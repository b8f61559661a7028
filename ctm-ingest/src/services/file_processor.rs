//! Upload pipeline orchestrator
//!
//! State progression:
//! IDLE → DETECTING → DEDUPLICATING → PARSING → PER_RECORD → COMPLETED | FAILED
//!
//! Only detection, fingerprinting and parsing can fail an upload. Once
//! per-record processing starts every record is handled on its own: a
//! rejected record is logged (and usually recorded as an outlier) and the
//! pipeline moves on to the next one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ctm_common::db::{
    AnomalyDetail, NewLabResult, NewMedicationEvent, NewOutlierLog, OutlierType, Patient,
    Symptom, Trial,
};
use ctm_common::events::{CtmEvent, EventBus};
use ctm_common::time::parse_timestamp;
use serde::Serialize;
use uuid::Uuid;

use super::content_hasher::{fingerprint, DuplicateGuard};
use super::format_detector;
use super::outlier_evaluator::{evaluate, Observation};
use super::parsers::{
    self, EnrollmentRecord, IngestRecords, LabRecord, MedicationRecord, RecordKind, RowDefect,
    SymptomRecord,
};
use super::validator;
use crate::db::{ClinicalStore, OutlierInsert};
use crate::error::{IngestError, IngestResult, RecordRejection};

/// Trial used for enrollment rows without a trial id
pub const DEFAULT_TRIAL_ID: &str = "T999";
pub const DEFAULT_TRIAL_NAME: &str = "Default Trial";

/// Patient id recorded for rows whose patient could not be read
pub const UNKNOWN_PATIENT: &str = "unknown";

/// Pipeline stages, logged as each upload moves through them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Detecting,
    Deduplicating,
    Parsing,
    PerRecord,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "IDLE",
            PipelineState::Detecting => "DETECTING",
            PipelineState::Deduplicating => "DEDUPLICATING",
            PipelineState::Parsing => "PARSING",
            PipelineState::PerRecord => "PER_RECORD",
            PipelineState::Completed => "COMPLETED",
            PipelineState::Failed => "FAILED",
        }
    }
}

fn advance(state: &mut PipelineState, next: PipelineState) {
    tracing::debug!(from = state.as_str(), to = next.as_str(), "Pipeline transition");
    *state = next;
}

/// Outcome of a processed upload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadSummary {
    /// Rows decoded from the upload, accepted or not
    pub count: usize,
    #[serde(rename = "type")]
    pub record_type: RecordKind,
    #[serde(skip)]
    pub accepted: usize,
    #[serde(skip)]
    pub rejected: usize,
}

#[derive(Debug, Default)]
struct RecordTally {
    accepted: usize,
    rejected: usize,
}

impl RecordTally {
    fn record(&mut self, kind: RecordKind, outcome: Result<(), RecordRejection>) {
        match outcome {
            Ok(()) => self.accepted += 1,
            Err(RecordRejection::PersistenceFailure(e)) => {
                self.rejected += 1;
                tracing::error!(kind = %kind, error = %e, "Record not persisted");
            }
            Err(rejection) => {
                self.rejected += 1;
                tracing::warn!(kind = %kind, reason = %rejection, "Record rejected");
            }
        }
    }
}

/// Runs uploads through detection, deduplication, parsing and per-record
/// validation, persistence and outlier detection
///
/// Cheap to clone; concurrent uploads share only the store and the event bus.
#[derive(Clone)]
pub struct FileProcessor {
    store: Arc<dyn ClinicalStore>,
    event_bus: EventBus,
    guard: DuplicateGuard,
}

impl FileProcessor {
    pub fn new(store: Arc<dyn ClinicalStore>, event_bus: EventBus) -> Self {
        let guard = DuplicateGuard::new(Arc::clone(&store));
        Self {
            store,
            event_bus,
            guard,
        }
    }

    pub fn store(&self) -> &Arc<dyn ClinicalStore> {
        &self.store
    }

    /// Process one upload
    ///
    /// Returns the record category and the number of rows decoded, or the
    /// fatal error that rejected the upload as a whole.
    pub async fn process(&self, content: &str) -> IngestResult<UploadSummary> {
        let started = Instant::now();
        let mut state = PipelineState::Idle;

        let result = self.run(content, &mut state).await;

        match &result {
            Ok(summary) => {
                tracing::info!(
                    kind = %summary.record_type,
                    count = summary.count,
                    accepted = summary.accepted,
                    rejected = summary.rejected,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Upload processed"
                );
            }
            Err(e) => {
                let failed_in = state.as_str();
                advance(&mut state, PipelineState::Failed);
                tracing::warn!(stage = failed_in, error = %e, "Upload rejected");
            }
        }

        result
    }

    async fn run(&self, content: &str, state: &mut PipelineState) -> IngestResult<UploadSummary> {
        advance(state, PipelineState::Detecting);
        let format = format_detector::detect(content).ok_or(IngestError::FormatUnrecognized)?;
        tracing::debug!(format = format.label(), bytes = content.len(), "Format detected");

        advance(state, PipelineState::Deduplicating);
        let digest = fingerprint(content);
        if self.guard.is_duplicate(&digest).await? {
            return Err(IngestError::DuplicateUpload { digest });
        }

        advance(state, PipelineState::Parsing);
        let records = parsers::parse(format, content)?;
        let kind = records.kind();
        let count = records.len();

        // The store decides between racing uploads of identical content
        if !self.guard.claim(&digest, kind.label(), count).await? {
            return Err(IngestError::DuplicateUpload { digest });
        }

        advance(state, PipelineState::PerRecord);
        let tally = self.process_records(records, &digest).await;

        advance(state, PipelineState::Completed);
        Ok(UploadSummary {
            count,
            record_type: kind,
            accepted: tally.accepted,
            rejected: tally.rejected,
        })
    }

    async fn process_records(&self, records: IngestRecords, digest: &str) -> RecordTally {
        let kind = records.kind();
        let mut tally = RecordTally::default();

        match records {
            IngestRecords::Enrollments(rows) => {
                let mut known_trials = HashSet::new();
                for row in rows {
                    let outcome = match row {
                        Ok(record) => self.handle_enrollment(record, &mut known_trials).await,
                        Err(defect) => self.handle_defect(kind, defect).await,
                    };
                    tally.record(kind, outcome);
                }
            }
            IngestRecords::MedicationEvents(rows) => {
                for row in rows {
                    let outcome = match row {
                        Ok(record) => self.handle_medication(record).await,
                        Err(defect) => self.handle_defect(kind, defect).await,
                    };
                    tally.record(kind, outcome);
                }
            }
            IngestRecords::Symptoms(rows) => {
                for row in rows {
                    let outcome = match row {
                        Ok(record) => self.handle_symptom(record).await,
                        Err(defect) => self.handle_defect(kind, defect).await,
                    };
                    tally.record(kind, outcome);
                }
            }
            IngestRecords::LabResults(rows) => {
                for row in rows {
                    let outcome = match row {
                        Ok(record) => self.handle_lab_result(record, digest).await,
                        Err(defect) => self.handle_defect(kind, defect).await,
                    };
                    tally.record(kind, outcome);
                }
            }
        }

        tally
    }

    /// A row that failed to decode still gets the reference check when its
    /// patient id could be read
    async fn handle_defect(
        &self,
        kind: RecordKind,
        defect: RowDefect,
    ) -> Result<(), RecordRejection> {
        let event_date = defect.event_date.as_deref().and_then(parse_timestamp);

        if let Some(patient_id) = defect.patient_id.as_deref() {
            if kind != RecordKind::Enrollments
                && self.store.find_patient(patient_id).await?.is_none()
            {
                return self.reject_unknown_patient(kind, patient_id, event_date).await;
            }
        }

        let message = defect.message();
        let patient_id = defect
            .patient_id
            .unwrap_or_else(|| UNKNOWN_PATIENT.to_string());

        self.flag(&patient_id, OutlierType::Format, &message, Utc::now(), None)
            .await?;

        Err(RecordRejection::ValidationFailed(message))
    }

    async fn reject_unknown_patient(
        &self,
        kind: RecordKind,
        patient_id: &str,
        event_date: Option<DateTime<Utc>>,
    ) -> Result<(), RecordRejection> {
        let message = match kind {
            RecordKind::MedicationEvents => {
                format!("Unknown patient in medication events: {}", patient_id)
            }
            RecordKind::LabResults => {
                "Patient not found in enrollment data for lab result".to_string()
            }
            // Enrollment rows create patients and are never reference-checked
            RecordKind::Symptoms | RecordKind::Enrollments => {
                "Patient not found in enrollment data for symptom record".to_string()
            }
        };

        self.flag(
            patient_id,
            OutlierType::Reference,
            &message,
            event_date.unwrap_or_else(Utc::now),
            None,
        )
        .await?;

        Err(RecordRejection::ReferenceNotFound(patient_id.to_string()))
    }

    async fn ensure_trial(
        &self,
        trial_id: &str,
        start_date: DateTime<Utc>,
        known_trials: &mut HashSet<String>,
    ) -> Result<(), RecordRejection> {
        if known_trials.contains(trial_id) {
            return Ok(());
        }

        let name = if trial_id == DEFAULT_TRIAL_ID {
            DEFAULT_TRIAL_NAME.to_string()
        } else {
            format!("Trial {}", trial_id)
        };

        let created = self
            .store
            .insert_trial(&Trial {
                id: trial_id.to_string(),
                name,
                start_date,
            })
            .await?;

        if created {
            tracing::info!(trial_id = %trial_id, "Trial created");
        }

        known_trials.insert(trial_id.to_string());
        Ok(())
    }

    async fn handle_enrollment(
        &self,
        record: EnrollmentRecord,
        known_trials: &mut HashSet<String>,
    ) -> Result<(), RecordRejection> {
        let enroll_date = match validator::validate_enrollment(&record) {
            Ok(date) => date,
            Err(violation) => {
                self.flag(
                    &record.patient_id,
                    violation.outlier_type,
                    &violation.message,
                    Utc::now(),
                    None,
                )
                .await?;
                return Err(RecordRejection::ValidationFailed(violation.message));
            }
        };

        let trial_id = record
            .trial_id
            .clone()
            .unwrap_or_else(|| DEFAULT_TRIAL_ID.to_string());
        self.ensure_trial(&trial_id, enroll_date, known_trials).await?;

        let inserted = self
            .store
            .insert_patient(&Patient {
                id: record.patient_id.clone(),
                trial_id,
                enroll_date,
            })
            .await?;

        if !inserted {
            let message = format!("Duplicate patient enrollment: {}", record.patient_id);
            self.flag(
                &record.patient_id,
                OutlierType::Duplicate,
                &message,
                enroll_date,
                None,
            )
            .await?;
            return Err(RecordRejection::DuplicateRecord(message));
        }

        if validator::is_future_enrollment(&enroll_date, &Utc::now()) {
            self.flag(
                &record.patient_id,
                OutlierType::Enrollment,
                &format!("Future enrollment date detected: {}", record.enroll_date),
                enroll_date,
                None,
            )
            .await?;
        }

        Ok(())
    }

    async fn handle_medication(&self, record: MedicationRecord) -> Result<(), RecordRejection> {
        let event_date = parse_timestamp(&record.administered_date);

        if self.store.find_patient(&record.patient_id).await?.is_none() {
            return self
                .reject_unknown_patient(RecordKind::MedicationEvents, &record.patient_id, event_date)
                .await;
        }

        let valid = match validator::validate_medication(&record) {
            Ok(valid) => valid,
            Err(violation) => {
                self.flag(
                    &record.patient_id,
                    violation.outlier_type,
                    &violation.message,
                    event_date.unwrap_or_else(Utc::now),
                    None,
                )
                .await?;
                return Err(RecordRejection::ValidationFailed(violation.message));
            }
        };

        let inserted = self
            .store
            .insert_medication_event(&NewMedicationEvent {
                patient_id: record.patient_id.clone(),
                medication: valid.medication.clone(),
                dosage: valid.dosage.clone(),
                administered_date: valid.administered_date,
            })
            .await?;

        if inserted.is_none() {
            let message = format!(
                "Duplicate medication event: {} at {}",
                record.medication.trim(),
                record.administered_date
            );
            self.flag(
                &record.patient_id,
                OutlierType::Duplicate,
                &message,
                valid.administered_date,
                None,
            )
            .await?;
            return Err(RecordRejection::DuplicateRecord(message));
        }

        // Kept in upper case, but the source spelling is still reported
        if let Some(flagged) = valid.non_standard_name {
            self.flag(
                &record.patient_id,
                flagged.outlier_type,
                &flagged.message,
                valid.administered_date,
                None,
            )
            .await?;
        }

        Ok(())
    }

    async fn handle_symptom(&self, record: SymptomRecord) -> Result<(), RecordRejection> {
        let event_date = parse_timestamp(&record.reported_date);

        if self.store.find_patient(&record.patient_id).await?.is_none() {
            return self
                .reject_unknown_patient(RecordKind::Symptoms, &record.patient_id, event_date)
                .await;
        }

        let reported_date = match validator::validate_symptom(&record) {
            Ok(date) => date,
            Err(violation) => {
                self.flag(
                    &record.patient_id,
                    violation.outlier_type,
                    &violation.message,
                    event_date.unwrap_or_else(Utc::now),
                    None,
                )
                .await?;
                return Err(RecordRejection::ValidationFailed(violation.message));
            }
        };

        let id = record
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let inserted = self
            .store
            .insert_symptom(&Symptom {
                id: id.clone(),
                patient_id: record.patient_id.clone(),
                symptom: record.symptom.clone(),
                severity: record.severity,
                reported_date,
            })
            .await?;

        if !inserted {
            let message = format!("Duplicate symptom record: {}", id);
            self.flag(
                &record.patient_id,
                OutlierType::Duplicate,
                &message,
                reported_date,
                None,
            )
            .await?;
            return Err(RecordRejection::DuplicateRecord(message));
        }

        let observation = Observation::Symptom {
            symptom: &record.symptom,
            severity: record.severity,
        };
        if let Some(anomaly) = evaluate(&observation) {
            self.flag(
                &record.patient_id,
                anomaly.outlier_type,
                &anomaly.message,
                reported_date,
                Some(anomaly.detail),
            )
            .await?;
        }

        Ok(())
    }

    async fn handle_lab_result(
        &self,
        record: LabRecord,
        digest: &str,
    ) -> Result<(), RecordRejection> {
        let event_date = parse_timestamp(&record.result_date);

        if self.store.find_patient(&record.patient_id).await?.is_none() {
            return self
                .reject_unknown_patient(RecordKind::LabResults, &record.patient_id, event_date)
                .await;
        }

        let result_date = match validator::validate_lab_result(&record) {
            Ok(date) => date,
            Err(violation) => {
                self.flag(
                    &record.patient_id,
                    violation.outlier_type,
                    &violation.message,
                    Utc::now(),
                    None,
                )
                .await?;
                return Err(RecordRejection::ValidationFailed(violation.message));
            }
        };

        let stored = self
            .store
            .insert_lab_result(&NewLabResult {
                patient_id: record.patient_id.clone(),
                test_type: record.test_type.clone(),
                value: record.value,
                units: record.units.clone(),
                result_date,
                file_hash: Some(digest.to_string()),
            })
            .await?;

        tracing::debug!(
            lab_result_id = stored.id,
            patient_id = %stored.patient_id,
            test_type = %stored.test_type,
            "Lab result stored"
        );

        let observation = Observation::Lab {
            test_type: &record.test_type,
            value: record.value,
            units: &record.units,
        };
        if let Some(anomaly) = evaluate(&observation) {
            self.flag(
                &record.patient_id,
                anomaly.outlier_type,
                &anomaly.message,
                result_date,
                Some(anomaly.detail),
            )
            .await?;
        }

        Ok(())
    }

    async fn flag(
        &self,
        patient_id: &str,
        outlier_type: OutlierType,
        message: &str,
        reported_date: DateTime<Utc>,
        detail: Option<AnomalyDetail>,
    ) -> ctm_common::Result<OutlierInsert> {
        self.log_outlier(NewOutlierLog {
            patient_id: patient_id.to_string(),
            message: message.to_string(),
            outlier_type,
            reported_date,
            detail,
        })
        .await
    }

    /// Record an outlier unless an identical one exists
    ///
    /// New entries are broadcast to subscribers; an entry matching an
    /// existing (patient, message, type, reported date) tuple is returned
    /// as-is and not re-broadcast.
    pub async fn log_outlier(&self, log: NewOutlierLog) -> ctm_common::Result<OutlierInsert> {
        let outcome = self.store.insert_outlier_log(&log).await?;

        match &outcome {
            OutlierInsert::Created(entry) => {
                tracing::info!(
                    outlier_id = entry.id,
                    patient_id = %entry.patient_id,
                    outlier_type = %entry.outlier_type,
                    message = %entry.message,
                    "Outlier recorded"
                );
                self.event_bus.emit_lossy(CtmEvent::Outlier(entry.clone()));
            }
            OutlierInsert::Existing(entry) => {
                tracing::debug!(
                    outlier_id = entry.id,
                    patient_id = %entry.patient_id,
                    "Outlier already recorded, not re-broadcast"
                );
            }
        }

        Ok(outcome)
    }
}
