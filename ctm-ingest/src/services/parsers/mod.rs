//! Record parsers
//!
//! One parser per accepted content shape. Each turns raw text into typed
//! records; rows that cannot be decoded become [`RowDefect`]s and travel next
//! to the good rows instead of aborting the upload. Only a structurally broken
//! document (no header, not an array, no `LabResults` root) is fatal.

pub mod hierarchical;
pub mod list_document;
pub mod tabular;

use serde::Serialize;

use crate::error::IngestResult;
use crate::services::format_detector::ContentFormat;

/// Record category of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    Enrollments,
    MedicationEvents,
    Symptoms,
    LabResults,
}

impl RecordKind {
    pub fn label(&self) -> &'static str {
        match self {
            RecordKind::Enrollments => "enrollments",
            RecordKind::MedicationEvents => "medication-events",
            RecordKind::Symptoms => "symptoms",
            RecordKind::LabResults => "lab-results",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A row that could not be decoded into a record
#[derive(Debug, Clone, PartialEq)]
pub struct RowDefect {
    /// 1-based position among the data rows / elements
    pub row: usize,
    /// Patient id, when it could still be read from the row
    pub patient_id: Option<String>,
    /// Raw event date of the row, when it could still be read
    pub event_date: Option<String>,
    pub reason: String,
}

impl RowDefect {
    pub fn new(row: usize, patient_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            row,
            patient_id: patient_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            event_date: None,
            reason: reason.into(),
        }
    }

    pub fn with_event_date(mut self, event_date: Option<String>) -> Self {
        self.event_date = event_date
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self
    }

    /// Anomaly message logged for the defect
    pub fn message(&self) -> String {
        format!("Malformed row {}: {}", self.row, self.reason)
    }
}

/// Either a decoded record or the reason it could not be decoded
pub type ParsedRow<T> = Result<T, RowDefect>;

/// Enrollment row (`patientId, trialId?, enrollDate`)
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentRecord {
    pub patient_id: String,
    pub trial_id: Option<String>,
    /// Raw date text; validated downstream
    pub enroll_date: String,
}

/// Medication event row (`patientCode, medication, dosage, administeredDate`)
#[derive(Debug, Clone, PartialEq)]
pub struct MedicationRecord {
    pub patient_id: String,
    /// As written in the file; may be empty or mixed case
    pub medication: String,
    pub dosage: String,
    pub administered_date: String,
}

/// Symptom element of a list document
#[derive(Debug, Clone, PartialEq)]
pub struct SymptomRecord {
    pub id: Option<String>,
    pub patient_id: String,
    pub symptom: String,
    pub severity: i64,
    pub reported_date: String,
}

/// `Result` node of a lab results document
#[derive(Debug, Clone, PartialEq)]
pub struct LabRecord {
    pub patient_id: String,
    pub test_type: String,
    pub value: f64,
    pub units: String,
    pub result_date: String,
}

/// Decoded upload, tagged by record category
#[derive(Debug, Clone, PartialEq)]
pub enum IngestRecords {
    Enrollments(Vec<ParsedRow<EnrollmentRecord>>),
    MedicationEvents(Vec<ParsedRow<MedicationRecord>>),
    Symptoms(Vec<ParsedRow<SymptomRecord>>),
    LabResults(Vec<ParsedRow<LabRecord>>),
}

impl IngestRecords {
    pub fn kind(&self) -> RecordKind {
        match self {
            IngestRecords::Enrollments(_) => RecordKind::Enrollments,
            IngestRecords::MedicationEvents(_) => RecordKind::MedicationEvents,
            IngestRecords::Symptoms(_) => RecordKind::Symptoms,
            IngestRecords::LabResults(_) => RecordKind::LabResults,
        }
    }

    /// Number of rows decoded from the upload, defects included
    pub fn len(&self) -> usize {
        match self {
            IngestRecords::Enrollments(rows) => rows.len(),
            IngestRecords::MedicationEvents(rows) => rows.len(),
            IngestRecords::Symptoms(rows) => rows.len(),
            IngestRecords::LabResults(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode content with the parser matching its detected format
pub fn parse(format: ContentFormat, content: &str) -> IngestResult<IngestRecords> {
    match format {
        ContentFormat::Tabular => tabular::parse(content),
        ContentFormat::ListDocument => list_document::parse(content),
        ContentFormat::HierarchicalDocument => hierarchical::parse(content),
    }
}
