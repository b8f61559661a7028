//! Content format detection
//!
//! Uploads arrive as raw text with no trustworthy content type. Detection
//! tries the shapes in a fixed order and the first match wins, so a JSON
//! array whose text happens to contain commas and `patientId` is still a
//! list document.

use serde_json::Value;

use super::parsers::hierarchical;

/// Accepted content shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    /// CSV with a header row
    Tabular,
    /// JSON array of objects
    ListDocument,
    /// XML element tree
    HierarchicalDocument,
}

impl ContentFormat {
    pub fn label(&self) -> &'static str {
        match self {
            ContentFormat::Tabular => "tabular",
            ContentFormat::ListDocument => "list-document",
            ContentFormat::HierarchicalDocument => "hierarchical-document",
        }
    }
}

/// Header tokens that identify a tabular upload (matched case-insensitively)
const HEADER_TOKENS: &[&str] = &["patientid", "enrolldate", "trialid", "patientcode"];

/// Classify content; `None` when no shape matches
pub fn detect(content: &str) -> Option<ContentFormat> {
    if is_list_document(content) {
        return Some(ContentFormat::ListDocument);
    }

    let trimmed = content.trim();
    if trimmed.starts_with('<') && hierarchical::is_well_formed(trimmed) {
        return Some(ContentFormat::HierarchicalDocument);
    }

    if is_tabular(content) {
        return Some(ContentFormat::Tabular);
    }

    None
}

fn is_list_document(content: &str) -> bool {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Array(items)) => items.iter().all(Value::is_object),
        _ => false,
    }
}

fn is_tabular(content: &str) -> bool {
    let Some(first_line) = content.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return false;
    };

    let lowered = first_line.to_lowercase();
    first_line.contains(',') && HEADER_TOKENS.iter().any(|token| lowered.contains(token))
}
