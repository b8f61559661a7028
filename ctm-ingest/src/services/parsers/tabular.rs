//! Tabular (CSV) parser
//!
//! Header row required, fields trimmed. A `patientCode` column marks a
//! medication events file; anything else is read as enrollments.

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Deserialize;

use super::{EnrollmentRecord, IngestRecords, MedicationRecord, ParsedRow, RowDefect};
use crate::error::{IngestError, IngestResult};

const FORMAT: &str = "tabular";
const MEDICATION_MARKER: &str = "patientCode";
const DATE_COLUMN: &str = "administeredDate";

/// Column names as the row types expect them; headers match case-insensitively
const KNOWN_COLUMNS: &[&str] = &[
    "patientId",
    "trialId",
    "enrollDate",
    "patientCode",
    "medication",
    "dosage",
    DATE_COLUMN,
];

fn canonical_headers(headers: &StringRecord) -> StringRecord {
    headers
        .iter()
        .map(|h| {
            KNOWN_COLUMNS
                .iter()
                .find(|known| known.eq_ignore_ascii_case(h))
                .copied()
                .unwrap_or(h)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnrollmentRow {
    patient_id: String,
    #[serde(default)]
    trial_id: Option<String>,
    enroll_date: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MedicationRow {
    patient_code: String,
    #[serde(default)]
    medication: Option<String>,
    #[serde(default)]
    dosage: Option<String>,
    #[serde(default)]
    administered_date: Option<String>,
}

pub fn parse(content: &str) -> IngestResult<IngestRecords> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = canonical_headers(reader.headers().map_err(|e| {
        IngestError::StructuralParseFailure {
            format: FORMAT,
            reason: e.to_string(),
        }
    })?);

    if headers.iter().all(|h| h.is_empty()) {
        return Err(IngestError::StructuralParseFailure {
            format: FORMAT,
            reason: "missing header row".to_string(),
        });
    }

    let is_medication = headers.iter().any(|h| h == MEDICATION_MARKER);
    let patient_column = if is_medication { MEDICATION_MARKER } else { "patientId" };
    let patient_index = headers.iter().position(|h| h == patient_column);
    let date_index = headers.iter().position(|h| h == DATE_COLUMN);

    let mut enrollments = Vec::new();
    let mut medications = Vec::new();

    for (index, result) in reader.records().enumerate() {
        let row = index + 1;

        let record = match result {
            Ok(record) => record,
            Err(e) => {
                let defect = RowDefect::new(row, None, e.to_string());
                if is_medication {
                    medications.push(Err(defect));
                } else {
                    enrollments.push(Err(defect));
                }
                continue;
            }
        };

        let patient_id = patient_index
            .and_then(|i| record.get(i))
            .map(|s| s.to_string());

        if is_medication {
            let event_date = date_index.and_then(|i| record.get(i)).map(|s| s.to_string());
            medications.push(
                decode_medication(row, &headers, &record, patient_id)
                    .map_err(|defect| defect.with_event_date(event_date)),
            );
        } else {
            enrollments.push(decode_enrollment(row, &headers, &record, patient_id));
        }
    }

    tracing::debug!(
        rows = if is_medication { medications.len() } else { enrollments.len() },
        medication = is_medication,
        "Parsed tabular content"
    );

    if is_medication {
        Ok(IngestRecords::MedicationEvents(medications))
    } else {
        Ok(IngestRecords::Enrollments(enrollments))
    }
}

fn check_width(
    row: usize,
    headers: &StringRecord,
    record: &StringRecord,
    patient_id: &Option<String>,
) -> Result<(), RowDefect> {
    if record.len() != headers.len() {
        return Err(RowDefect::new(
            row,
            patient_id.clone(),
            format!("expected {} fields, found {}", headers.len(), record.len()),
        ));
    }
    Ok(())
}

fn decode_enrollment(
    row: usize,
    headers: &StringRecord,
    record: &StringRecord,
    patient_id: Option<String>,
) -> ParsedRow<EnrollmentRecord> {
    check_width(row, headers, record, &patient_id)?;

    let decoded: EnrollmentRow = record
        .deserialize(Some(headers))
        .map_err(|e| RowDefect::new(row, patient_id.clone(), e.to_string()))?;

    if decoded.patient_id.is_empty() {
        return Err(RowDefect::new(row, None, "missing patientId"));
    }

    Ok(EnrollmentRecord {
        patient_id: decoded.patient_id,
        trial_id: decoded.trial_id.filter(|t| !t.is_empty()),
        enroll_date: decoded.enroll_date,
    })
}

fn decode_medication(
    row: usize,
    headers: &StringRecord,
    record: &StringRecord,
    patient_id: Option<String>,
) -> ParsedRow<MedicationRecord> {
    check_width(row, headers, record, &patient_id)?;

    let decoded: MedicationRow = record
        .deserialize(Some(headers))
        .map_err(|e| RowDefect::new(row, patient_id.clone(), e.to_string()))?;

    if decoded.patient_code.is_empty() {
        return Err(RowDefect::new(row, None, "missing patientCode"));
    }

    // Empty medication, dosage or date are domain violations, not decode errors
    Ok(MedicationRecord {
        patient_id: decoded.patient_code,
        medication: decoded.medication.unwrap_or_default(),
        dosage: decoded.dosage.unwrap_or_default(),
        administered_date: decoded.administered_date.unwrap_or_default(),
    })
}
