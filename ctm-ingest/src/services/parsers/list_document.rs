//! List-document (JSON) parser for symptom reports

use serde::Deserialize;
use serde_json::Value;

use super::{IngestRecords, ParsedRow, RowDefect, SymptomRecord};
use crate::error::{IngestError, IngestResult};

const FORMAT: &str = "list-document";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymptomElement {
    #[serde(default)]
    id: Option<Value>,
    patient_id: String,
    symptom: String,
    severity: i64,
    reported_date: String,
}

pub fn parse(content: &str) -> IngestResult<IngestRecords> {
    let elements: Vec<Value> =
        serde_json::from_str(content).map_err(|e| IngestError::StructuralParseFailure {
            format: FORMAT,
            reason: e.to_string(),
        })?;

    let rows: Vec<ParsedRow<SymptomRecord>> = elements
        .into_iter()
        .enumerate()
        .map(|(index, element)| decode_element(index + 1, element))
        .collect();

    tracing::debug!(rows = rows.len(), "Parsed list-document content");

    Ok(IngestRecords::Symptoms(rows))
}

fn decode_element(row: usize, element: Value) -> ParsedRow<SymptomRecord> {
    let patient_id = element
        .get("patientId")
        .and_then(Value::as_str)
        .map(str::to_string);
    let reported_date = element
        .get("reportedDate")
        .and_then(Value::as_str)
        .map(str::to_string);

    if !element.is_object() {
        return Err(RowDefect::new(row, None, "element is not an object"));
    }

    let decoded: SymptomElement = serde_json::from_value(element).map_err(|e| {
        RowDefect::new(row, patient_id.clone(), e.to_string()).with_event_date(reported_date)
    })?;

    let patient_id = decoded.patient_id.trim().to_string();
    if patient_id.is_empty() {
        return Err(RowDefect::new(row, None, "missing patientId"));
    }

    let id = match decoded.id {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    Ok(SymptomRecord {
        id,
        patient_id,
        symptom: decoded.symptom.trim().to_string(),
        severity: decoded.severity,
        reported_date: decoded.reported_date.trim().to_string(),
    })
}
