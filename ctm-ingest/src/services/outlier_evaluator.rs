//! Clinical threshold evaluation
//!
//! Applied only to records that were accepted for persistence.

use ctm_common::db::{AnomalyDetail, OutlierType};

/// LDL above this is abnormal (mg/dL)
pub const LDL_THRESHOLD: f64 = 200.0;
/// Glucose above this is abnormal (mg/dL)
pub const GLUCOSE_THRESHOLD: f64 = 250.0;
/// Symptoms at or above this severity are flagged (0-10 scale)
pub const SEVERITY_THRESHOLD: i64 = 8;

/// Measurement or report to evaluate
#[derive(Debug, Clone, Copy)]
pub enum Observation<'a> {
    Lab {
        test_type: &'a str,
        value: f64,
        units: &'a str,
    },
    Symptom {
        symptom: &'a str,
        severity: i64,
    },
}

/// Threshold breach found in an observation
#[derive(Debug, Clone, PartialEq)]
pub struct Anomaly {
    pub outlier_type: OutlierType,
    pub message: String,
    pub detail: AnomalyDetail,
}

/// Threshold for a lab test, if one is tracked
pub fn lab_threshold(test_type: &str) -> Option<f64> {
    if test_type.eq_ignore_ascii_case("LDL") {
        Some(LDL_THRESHOLD)
    } else if test_type.eq_ignore_ascii_case("Glucose") {
        Some(GLUCOSE_THRESHOLD)
    } else {
        None
    }
}

pub fn evaluate(observation: &Observation<'_>) -> Option<Anomaly> {
    match *observation {
        Observation::Lab {
            test_type,
            value,
            units,
        } => {
            let threshold = lab_threshold(test_type)?;
            if value <= threshold {
                return None;
            }
            Some(Anomaly {
                outlier_type: OutlierType::Lab,
                message: format!("Abnormal {}: {} {}", test_type, value, units),
                detail: AnomalyDetail::Lab {
                    test_type: test_type.to_string(),
                    value,
                    units: units.to_string(),
                    threshold,
                },
            })
        }
        Observation::Symptom { symptom, severity } => {
            if severity < SEVERITY_THRESHOLD {
                return None;
            }
            Some(Anomaly {
                outlier_type: OutlierType::Symptom,
                message: format!("Symptom: {} (severity {})", capitalize(symptom), severity),
                detail: AnomalyDetail::Symptom {
                    symptom: symptom.to_string(),
                    severity,
                },
            })
        }
    }
}

/// Upper-case the first character, leave the rest untouched
pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lab(test_type: &str, value: f64) -> Option<Anomaly> {
        evaluate(&Observation::Lab {
            test_type,
            value,
            units: "mg/dL",
        })
    }

    fn symptom(severity: i64) -> Option<Anomaly> {
        evaluate(&Observation::Symptom {
            symptom: "nausea",
            severity,
        })
    }

    #[test]
    fn test_ldl_threshold() {
        let anomaly = lab("LDL", 210.0).unwrap();
        assert_eq!(anomaly.outlier_type, OutlierType::Lab);
        assert_eq!(anomaly.message, "Abnormal LDL: 210 mg/dL");
        assert!(lab("LDL", 200.0).is_none());
        assert!(lab("LDL", 199.0).is_none());
    }

    #[test]
    fn test_glucose_threshold() {
        assert_eq!(lab("Glucose", 250.5).unwrap().message, "Abnormal Glucose: 250.5 mg/dL");
        assert!(lab("Glucose", 250.0).is_none());
        assert!(lab("glucose", 300.0).is_some());
    }

    #[test]
    fn test_untracked_lab_never_flags() {
        assert!(lab("HbA1c", 9999.0).is_none());
    }

    #[test]
    fn test_lab_detail_carries_threshold() {
        let anomaly = lab("LDL", 240.0).unwrap();
        assert_eq!(
            anomaly.detail,
            AnomalyDetail::Lab {
                test_type: "LDL".to_string(),
                value: 240.0,
                units: "mg/dL".to_string(),
                threshold: LDL_THRESHOLD,
            }
        );
    }

    #[test]
    fn test_symptom_threshold() {
        assert!(symptom(7).is_none());
        let anomaly = symptom(8).unwrap();
        assert_eq!(anomaly.outlier_type, OutlierType::Symptom);
        assert_eq!(anomaly.message, "Symptom: Nausea (severity 8)");
        assert!(symptom(10).is_some());
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("nausea"), "Nausea");
        assert_eq!(capitalize("Shortness of breath"), "Shortness of breath");
        assert_eq!(capitalize(""), "");
        assert_eq!(capitalize("éruption"), "Éruption");
    }
}
