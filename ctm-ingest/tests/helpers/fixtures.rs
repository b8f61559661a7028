//! Upload content builders

/// Enrollment CSV for `(patient_id, trial_id, enroll_date)` rows
pub fn enrollments_csv(rows: &[(&str, &str, &str)]) -> String {
    let mut csv = String::from("patientId,trialId,enrollDate\n");
    for (patient, trial, date) in rows {
        csv.push_str(&format!("{},{},{}\n", patient, trial, date));
    }
    csv
}

/// Medication CSV for `(patient_code, medication, dosage, administered_date)` rows
pub fn medications_csv(rows: &[(&str, &str, &str, &str)]) -> String {
    let mut csv = String::from("patientCode,medication,dosage,administeredDate\n");
    for (patient, medication, dosage, date) in rows {
        csv.push_str(&format!("{},{},{},{}\n", patient, medication, dosage, date));
    }
    csv
}

/// Symptom JSON for `(id, patient_id, symptom, severity, reported_date)` elements
pub fn symptoms_json(rows: &[(&str, &str, &str, i64, &str)]) -> String {
    let elements: Vec<serde_json::Value> = rows
        .iter()
        .map(|(id, patient, symptom, severity, date)| {
            serde_json::json!({
                "id": id,
                "patientId": patient,
                "symptom": symptom,
                "severity": severity,
                "reportedDate": date,
            })
        })
        .collect();
    serde_json::to_string_pretty(&elements).unwrap()
}

/// Lab results XML for `(patient_id, test_type, value, units, result_date)` results
pub fn lab_results_xml(rows: &[(&str, &str, &str, &str, &str)]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<LabResults>\n");
    for (patient, test_type, value, units, date) in rows {
        xml.push_str(&format!(
            "  <Result>\n    <patientId>{}</patientId>\n    <testType>{}</testType>\n    <value>{}</value>\n    <units>{}</units>\n    <resultDate>{}</resultDate>\n  </Result>\n",
            patient, test_type, value, units, date
        ));
    }
    xml.push_str("</LabResults>\n");
    xml
}
