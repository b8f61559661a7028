//! Database models
//!
//! Field names serialise in camelCase: the outlier log shape in particular is
//! consumed by dashboards and must stay stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    pub id: String,
    pub name: String,
    pub start_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    pub trial_id: String,
    pub enroll_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Symptom {
    pub id: String,
    pub patient_id: String,
    pub symptom: String,
    /// 0-10 scale
    pub severity: i64,
    pub reported_date: DateTime<Utc>,
}

/// Lab result prior to insertion (id is assigned by the store)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLabResult {
    pub patient_id: String,
    pub test_type: String,
    pub value: f64,
    pub units: String,
    pub result_date: DateTime<Utc>,
    /// Fingerprint of the upload this result came from
    pub file_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabResult {
    pub id: i64,
    pub patient_id: String,
    pub test_type: String,
    pub value: f64,
    pub units: String,
    pub result_date: DateTime<Utc>,
    pub file_hash: Option<String>,
}

/// Medication event prior to insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMedicationEvent {
    pub patient_id: String,
    /// Upper-case normalised name
    pub medication: String,
    pub dosage: String,
    pub administered_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationEvent {
    pub id: i64,
    pub patient_id: String,
    pub medication: String,
    pub dosage: String,
    pub administered_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Outlier classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierType {
    Lab,
    Symptom,
    Enrollment,
    Reference,
    Format,
    Duplicate,
}

impl OutlierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutlierType::Lab => "lab",
            OutlierType::Symptom => "symptom",
            OutlierType::Enrollment => "enrollment",
            OutlierType::Reference => "reference",
            OutlierType::Format => "format",
            OutlierType::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for OutlierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutlierType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lab" => Ok(OutlierType::Lab),
            "symptom" => Ok(OutlierType::Symptom),
            "enrollment" => Ok(OutlierType::Enrollment),
            "reference" => Ok(OutlierType::Reference),
            "format" => Ok(OutlierType::Format),
            "duplicate" => Ok(OutlierType::Duplicate),
            other => Err(Error::InvalidInput(format!("Unknown outlier type: {}", other))),
        }
    }
}

/// Structured payload carried next to the rendered anomaly message
///
/// Lets consumers read the measured value or severity without parsing
/// `message` back apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AnomalyDetail {
    #[serde(rename_all = "camelCase")]
    Lab {
        test_type: String,
        value: f64,
        units: String,
        threshold: f64,
    },
    #[serde(rename_all = "camelCase")]
    Symptom { symptom: String, severity: i64 },
}

/// Outlier log entry prior to insertion
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutlierLog {
    pub patient_id: String,
    pub message: String,
    pub outlier_type: OutlierType,
    /// When the underlying clinical event happened
    pub reported_date: DateTime<Utc>,
    pub detail: Option<AnomalyDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlierLog {
    pub id: i64,
    pub patient_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub outlier_type: OutlierType,
    /// Detection time
    pub created_at: DateTime<Utc>,
    /// When the underlying clinical event happened
    pub reported_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<AnomalyDetail>,
}

/// Fingerprint of a processed upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFingerprint {
    pub digest: String,
    /// Record category label of the upload (e.g. "lab-results")
    pub kind: String,
    pub record_count: i64,
    pub created_at: DateTime<Utc>,
}
