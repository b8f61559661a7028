//! Per-record domain validation
//!
//! Pure checks run before anything is persisted. A failed check is reported
//! as a [`Violation`]: the anomaly to log for the record.

use chrono::{DateTime, Utc};
use ctm_common::db::OutlierType;
use ctm_common::time::parse_timestamp;
use once_cell::sync::Lazy;
use regex::Regex;

use super::parsers::{EnrollmentRecord, LabRecord, MedicationRecord, SymptomRecord};

static DOSAGE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\d+(\.\d+)?\s*(mg|ml|g|mcg)$").expect("dosage pattern is valid")
});

pub const MIN_SEVERITY: i64 = 0;
pub const MAX_SEVERITY: i64 = 10;

/// A record failed validation; carries the anomaly to log
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub outlier_type: OutlierType,
    pub message: String,
}

impl Violation {
    fn format(message: impl Into<String>) -> Self {
        Self {
            outlier_type: OutlierType::Format,
            message: message.into(),
        }
    }
}

/// Medication event that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidMedication {
    /// Upper-cased name
    pub medication: String,
    pub dosage: String,
    pub administered_date: DateTime<Utc>,
    /// Set when the name was not already upper-case; the record is still kept
    pub non_standard_name: Option<Violation>,
}

pub fn is_valid_dosage(dosage: &str) -> bool {
    DOSAGE_PATTERN.is_match(dosage.trim())
}

pub fn is_standardized_name(name: &str) -> bool {
    name == name.to_uppercase()
}

pub fn severity_in_range(severity: i64) -> bool {
    (MIN_SEVERITY..=MAX_SEVERITY).contains(&severity)
}

pub fn validate_enrollment(record: &EnrollmentRecord) -> Result<DateTime<Utc>, Violation> {
    parse_timestamp(&record.enroll_date).ok_or_else(|| {
        Violation::format(format!("Invalid enrollment date: {}", record.enroll_date))
    })
}

/// Enrollment dates after `now` are accepted but flagged
pub fn is_future_enrollment(enroll_date: &DateTime<Utc>, now: &DateTime<Utc>) -> bool {
    enroll_date > now
}

pub fn validate_medication(record: &MedicationRecord) -> Result<ValidMedication, Violation> {
    let name = record.medication.trim();
    if name.is_empty() {
        return Err(Violation::format("Missing or invalid medication name"));
    }

    if !is_valid_dosage(&record.dosage) {
        return Err(Violation::format(format!(
            "Invalid dosage format: {}",
            record.dosage
        )));
    }

    let administered_date = parse_timestamp(&record.administered_date).ok_or_else(|| {
        Violation::format(format!(
            "Invalid administered date: {}",
            record.administered_date
        ))
    })?;

    let non_standard_name = (!is_standardized_name(name))
        .then(|| Violation::format(format!("Non-standardized medication name: {}", name)));

    Ok(ValidMedication {
        medication: name.to_uppercase(),
        dosage: record.dosage.trim().to_string(),
        administered_date,
        non_standard_name,
    })
}

pub fn validate_symptom(record: &SymptomRecord) -> Result<DateTime<Utc>, Violation> {
    let reported_date = parse_timestamp(&record.reported_date).ok_or_else(|| {
        Violation::format(format!("Invalid reported date: {}", record.reported_date))
    })?;

    if !severity_in_range(record.severity) {
        return Err(Violation::format(format!(
            "Invalid severity: {} (expected {}-{})",
            record.severity, MIN_SEVERITY, MAX_SEVERITY
        )));
    }

    if record.symptom.is_empty() {
        return Err(Violation::format("Missing symptom description"));
    }

    Ok(reported_date)
}

pub fn validate_lab_result(record: &LabRecord) -> Result<DateTime<Utc>, Violation> {
    parse_timestamp(&record.result_date).ok_or_else(|| {
        Violation::format(format!("Invalid result date: {}", record.result_date))
    })
}
