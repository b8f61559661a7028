//! Hierarchical-document (XML) parser for lab results
//!
//! Expected shape:
//!
//! ```xml
//! <LabResults>
//!   <Result>
//!     <patientId>P1</patientId>
//!     <testType>LDL</testType>
//!     <value>210</value>
//!     <units>mg/dL</units>
//!     <resultDate>2025-01-01</resultDate>
//!   </Result>
//! </LabResults>
//! ```
//!
//! A single `Result` and a list of them decode the same way. Unknown elements
//! are skipped.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{IngestRecords, LabRecord, ParsedRow, RowDefect};
use crate::error::{IngestError, IngestResult};

const FORMAT: &str = "hierarchical-document";
const ROOT: &[u8] = b"LabResults";
const RESULT: &[u8] = b"Result";

fn failure(reason: impl Into<String>) -> IngestError {
    IngestError::StructuralParseFailure {
        format: FORMAT,
        reason: reason.into(),
    }
}

fn utf8(bytes: &[u8]) -> Result<&str, IngestError> {
    std::str::from_utf8(bytes).map_err(|e| failure(format!("invalid UTF-8: {}", e)))
}

/// Resolve an entity reference body (`amp`, `#38`, `#x26`)
fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse::<u32>().ok()?,
            };
            char::from_u32(value)
        }
    }
}

/// True when content is a single well-formed XML element tree
pub fn is_well_formed(content: &str) -> bool {
    let mut reader = Reader::from_str(content);
    let mut depth: usize = 0;
    let mut roots = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Ok(Event::Empty(_)) => {
                if depth == 0 {
                    roots += 1;
                }
            }
            Ok(Event::End(_)) => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Ok(Event::GeneralRef(e)) => match std::str::from_utf8(&e) {
                Ok(name) if resolve_entity(name).is_some() => {}
                _ => return false,
            },
            Ok(Event::Eof) => return depth == 0 && roots == 1,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
}

/// Field being collected inside a `Result` node
struct OpenField {
    name: String,
    text: String,
}

pub fn parse(content: &str) -> IngestResult<IngestRecords> {
    let mut reader = Reader::from_str(content);

    // Element names from the root down to the current node
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut root_seen = false;
    let mut current: Option<HashMap<String, String>> = None;
    let mut field: Option<OpenField> = None;
    let mut rows: Vec<ParsedRow<LabRecord>> = Vec::new();

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                return Err(failure(format!(
                    "{} at byte {}",
                    e,
                    reader.buffer_position()
                )))
            }
        };

        match event {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                match stack.len() {
                    0 => {
                        open_root(&name, &mut root_seen)?;
                    }
                    1 if name == RESULT => {
                        current = Some(HashMap::new());
                    }
                    2 if current.is_some() => {
                        field = Some(OpenField {
                            name: utf8(&name)?.to_string(),
                            text: String::new(),
                        });
                    }
                    _ => {}
                }
                stack.push(name);
            }
            Event::Empty(e) => {
                let name = e.local_name().as_ref().to_vec();
                match stack.len() {
                    0 => {
                        // Self-closing root: a document with no results
                        open_root(&name, &mut root_seen)?;
                    }
                    1 if name == RESULT => {
                        let ordinal = rows.len() + 1;
                        rows.push(decode_result(ordinal, HashMap::new()));
                    }
                    2 => {
                        if let Some(fields) = current.as_mut() {
                            fields.insert(utf8(&name)?.to_string(), String::new());
                        }
                    }
                    _ => {}
                }
            }
            Event::End(e) => {
                let name = e.local_name().as_ref().to_vec();
                if stack.pop().is_none() {
                    return Err(failure(format!(
                        "unexpected closing tag </{}>",
                        String::from_utf8_lossy(&name)
                    )));
                }
                match stack.len() {
                    1 if name == RESULT => {
                        if let Some(fields) = current.take() {
                            let ordinal = rows.len() + 1;
                            rows.push(decode_result(ordinal, fields));
                        }
                    }
                    2 => {
                        if let (Some(open), Some(fields)) = (field.take(), current.as_mut()) {
                            fields.insert(open.name, open.text.trim().to_string());
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                if let Some(open) = field.as_mut() {
                    if stack.len() == 3 {
                        open.text.push_str(utf8(&e)?);
                    }
                }
            }
            Event::CData(e) => {
                if let Some(open) = field.as_mut() {
                    if stack.len() == 3 {
                        open.text.push_str(utf8(&e)?);
                    }
                }
            }
            Event::GeneralRef(e) => {
                let entity = utf8(&e)?;
                let resolved = resolve_entity(entity)
                    .ok_or_else(|| failure(format!("unknown entity &{};", entity)))?;
                if let Some(open) = field.as_mut() {
                    if stack.len() == 3 {
                        open.text.push(resolved);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(unclosed) = stack.last() {
        return Err(failure(format!(
            "unclosed element <{}>",
            String::from_utf8_lossy(unclosed)
        )));
    }
    if !root_seen {
        return Err(failure("missing LabResults root"));
    }

    tracing::debug!(rows = rows.len(), "Parsed hierarchical-document content");

    Ok(IngestRecords::LabResults(rows))
}

fn open_root(name: &[u8], root_seen: &mut bool) -> IngestResult<()> {
    if *root_seen {
        return Err(failure("multiple root elements"));
    }
    if name != ROOT {
        return Err(failure(format!(
            "expected LabResults root, found <{}>",
            String::from_utf8_lossy(name)
        )));
    }
    *root_seen = true;
    Ok(())
}

fn decode_result(row: usize, mut fields: HashMap<String, String>) -> ParsedRow<LabRecord> {
    let patient_id = fields.remove("patientId").filter(|id| !id.is_empty());
    let Some(patient_id) = patient_id else {
        return Err(RowDefect::new(row, None, "missing patientId"));
    };

    let event_date = fields.get("resultDate").cloned();
    let defect = |reason: String| {
        RowDefect::new(row, Some(patient_id.clone()), reason).with_event_date(event_date.clone())
    };

    let mut required = |name: &str| -> Result<String, RowDefect> {
        fields
            .remove(name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| defect(format!("missing {}", name)))
    };

    let test_type = required("testType")?;
    let raw_value = required("value")?;
    let result_date = required("resultDate")?;
    let units = fields.remove("units").unwrap_or_default();

    let value = raw_value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| defect(format!("value is not a decimal number: {}", raw_value)))?;

    Ok(LabRecord {
        patient_id,
        test_type,
        value,
        units,
        result_date,
    })
}
