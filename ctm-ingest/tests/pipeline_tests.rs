//! Pipeline integration tests
//!
//! Drives whole uploads through the FileProcessor against a file-backed
//! SQLite database.

mod helpers;

use chrono::{TimeZone, Utc};
use ctm_common::db::OutlierType;
use ctm_common::events::CtmEvent;
use ctm_ingest::services::RecordKind;
use ctm_ingest::IngestError;
use helpers::*;

/// Enroll P1 and P2 so that clinical records have someone to reference
async fn enroll_baseline(processor: &ctm_ingest::services::FileProcessor) {
    processor
        .process(&enrollments_csv(&[
            ("P1", "T1", "2025-01-01"),
            ("P2", "T1", "2025-01-02"),
        ]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_list_document_lookalike_is_processed_as_symptoms() {
    let (_dir, pool, processor, _bus) = create_test_processor().await.unwrap();
    enroll_baseline(&processor).await;

    // Comma-rich first line containing a tabular header token
    let content = "[{\"patientId\":\"P1\",\"enrollDate\":\"x\",\"symptom\":\"cough\",\"severity\":2,\"reportedDate\":\"2025-02-01\"}]";
    let summary = processor.process(content).await.unwrap();

    assert_eq!(summary.record_type, RecordKind::Symptoms);
    assert_eq!(summary.count, 1);
    assert_eq!(count_rows(&pool, "symptoms").await, 1);
}

#[tokio::test]
async fn test_resubmitting_identical_content_persists_nothing_new() {
    let (_dir, pool, processor, _bus) = create_test_processor().await.unwrap();
    enroll_baseline(&processor).await;

    let labs = lab_results_xml(&[("P1", "LDL", "210", "mg/dL", "2025-03-01")]);
    processor.process(&labs).await.unwrap();

    let labs_before = count_rows(&pool, "lab_results").await;
    let outliers_before = count_rows(&pool, "outlier_logs").await;

    let err = processor.process(&labs).await.unwrap_err();
    assert!(matches!(err, IngestError::DuplicateUpload { .. }));
    assert_eq!(
        err.to_string(),
        "This file has already been processed. Skipping to prevent duplicates."
    );

    assert_eq!(count_rows(&pool, "lab_results").await, labs_before);
    assert_eq!(count_rows(&pool, "outlier_logs").await, outliers_before);
}

#[tokio::test]
async fn test_duplicate_guard_covers_every_record_kind() {
    let (_dir, _pool, processor, _bus) = create_test_processor().await.unwrap();

    let enrollments = enrollments_csv(&[("P1", "T1", "2025-01-01")]);
    processor.process(&enrollments).await.unwrap();
    assert!(matches!(
        processor.process(&enrollments).await,
        Err(IngestError::DuplicateUpload { .. })
    ));

    let symptoms = symptoms_json(&[("S1", "P1", "cough", 2, "2025-01-05")]);
    processor.process(&symptoms).await.unwrap();
    assert!(matches!(
        processor.process(&symptoms).await,
        Err(IngestError::DuplicateUpload { .. })
    ));
}

#[tokio::test]
async fn test_ldl_threshold_produces_single_lab_outlier() {
    let (_dir, pool, processor, bus) = create_test_processor().await.unwrap();
    enroll_baseline(&processor).await;
    let mut rx = bus.subscribe();

    let summary = processor
        .process(&lab_results_xml(&[
            ("P1", "LDL", "210", "mg/dL", "2025-03-01"),
            ("P2", "LDL", "199", "mg/dL", "2025-03-01"),
        ]))
        .await
        .unwrap();

    assert_eq!(summary.record_type, RecordKind::LabResults);
    assert_eq!(summary.count, 2);
    assert_eq!(count_rows(&pool, "lab_results").await, 2);

    let outliers = processor.store().recent_outliers(10).await.unwrap();
    assert_eq!(outliers.len(), 1);
    assert_eq!(outliers[0].outlier_type, OutlierType::Lab);
    assert_eq!(outliers[0].patient_id, "P1");
    assert!(outliers[0].message.contains("210"));
    assert_eq!(outliers[0].message, "Abnormal LDL: 210 mg/dL");
    assert_eq!(
        outliers[0].reported_date,
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    );

    match rx.try_recv().unwrap() {
        CtmEvent::Outlier(log) => assert_eq!(log.id, outliers[0].id),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_lab_results_carry_upload_fingerprint() {
    let (_dir, pool, processor, _bus) = create_test_processor().await.unwrap();
    enroll_baseline(&processor).await;

    let labs = lab_results_xml(&[("P1", "Glucose", "120", "mg/dL", "2025-03-01")]);
    processor.process(&labs).await.unwrap();

    let file_hash: Option<String> = sqlx::query_scalar("SELECT file_hash FROM lab_results")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(file_hash, Some(ctm_ingest::services::fingerprint(&labs)));
}

#[tokio::test]
async fn test_symptom_severity_thresholds() {
    let (_dir, pool, processor, _bus) = create_test_processor().await.unwrap();
    enroll_baseline(&processor).await;

    processor
        .process(&symptoms_json(&[
            ("S1", "P1", "nausea", 8, "2025-02-01"),
            ("S2", "P1", "headache", 7, "2025-02-01"),
            ("S3", "P2", "fatigue", 10, "2025-02-02"),
        ]))
        .await
        .unwrap();

    assert_eq!(count_rows(&pool, "symptoms").await, 3);

    let outliers = processor.store().outliers_by_reported_date(10).await.unwrap();
    let messages: Vec<_> = outliers.iter().map(|o| o.message.as_str()).collect();
    assert_eq!(
        messages,
        vec!["Symptom: Fatigue (severity 10)", "Symptom: Nausea (severity 8)"]
    );
    assert!(outliers.iter().all(|o| o.outlier_type == OutlierType::Symptom));
}

#[tokio::test]
async fn test_out_of_range_severity_is_rejected() {
    let (_dir, pool, processor, _bus) = create_test_processor().await.unwrap();
    enroll_baseline(&processor).await;

    let summary = processor
        .process(&symptoms_json(&[("S1", "P1", "nausea", 11, "2025-02-01")]))
        .await
        .unwrap();

    assert_eq!(summary.count, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(count_rows(&pool, "symptoms").await, 0);

    let outliers = processor.store().recent_outliers(10).await.unwrap();
    assert_eq!(outliers.len(), 1);
    assert_eq!(outliers[0].outlier_type, OutlierType::Format);
}

#[tokio::test]
async fn test_duplicate_medication_event_is_logged_not_inserted() {
    let (_dir, pool, processor, _bus) = create_test_processor().await.unwrap();
    enroll_baseline(&processor).await;

    let summary = processor
        .process(&medications_csv(&[
            ("P1", "ASPIRIN", "100mg", "2025-02-01"),
            ("P1", "ASPIRIN", "100mg", "2025-02-01"),
        ]))
        .await
        .unwrap();

    assert_eq!(summary.record_type, RecordKind::MedicationEvents);
    assert_eq!(summary.count, 2);
    assert_eq!(count_rows(&pool, "medication_events").await, 1);

    let outliers = processor.store().recent_outliers(10).await.unwrap();
    assert_eq!(outliers.len(), 1);
    assert_eq!(outliers[0].outlier_type, OutlierType::Duplicate);
    assert_eq!(
        outliers[0].message,
        "Duplicate medication event: ASPIRIN at 2025-02-01"
    );
}

#[tokio::test]
async fn test_medication_name_is_normalised_and_flagged() {
    let (_dir, pool, processor, _bus) = create_test_processor().await.unwrap();
    enroll_baseline(&processor).await;

    processor
        .process(&medications_csv(&[("P1", "Metformin", "500 mg", "2025-02-01")]))
        .await
        .unwrap();

    let stored: String = sqlx::query_scalar("SELECT medication FROM medication_events")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(stored, "METFORMIN");

    let outliers = processor.store().recent_outliers(10).await.unwrap();
    assert_eq!(outliers.len(), 1);
    assert_eq!(outliers[0].outlier_type, OutlierType::Format);
    assert_eq!(outliers[0].message, "Non-standardized medication name: Metformin");
}

#[tokio::test]
async fn test_invalid_medication_rows_are_skipped() {
    let (_dir, pool, processor, _bus) = create_test_processor().await.unwrap();
    enroll_baseline(&processor).await;

    let summary = processor
        .process(&medications_csv(&[
            ("P1", "ASPIRIN", "a lot", "2025-02-01"),
            ("P1", "IBUPROFEN", "200mg", "someday"),
            ("P1", "", "200mg", "2025-02-01"),
            ("P9", "ASPIRIN", "100mg", "2025-02-01"),
        ]))
        .await
        .unwrap();

    assert_eq!(summary.count, 4);
    assert_eq!(summary.accepted, 0);
    assert_eq!(count_rows(&pool, "medication_events").await, 0);

    let outliers = processor.store().recent_outliers(10).await.unwrap();
    let mut messages: Vec<_> = outliers.iter().map(|o| o.message.clone()).collect();
    messages.sort();
    assert_eq!(
        messages,
        vec![
            "Invalid administered date: someday".to_string(),
            "Invalid dosage format: a lot".to_string(),
            "Missing or invalid medication name".to_string(),
            "Unknown patient in medication events: P9".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_unknown_patient_symptom_raises_one_reference_outlier() {
    let (_dir, pool, processor, _bus) = create_test_processor().await.unwrap();
    enroll_baseline(&processor).await;

    processor
        .process(&symptoms_json(&[("S1", "P404", "rash", 9, "2025-04-02")]))
        .await
        .unwrap();

    assert_eq!(count_rows(&pool, "symptoms").await, 0);

    let outliers = processor.store().recent_outliers(10).await.unwrap();
    assert_eq!(outliers.len(), 1);
    assert_eq!(outliers[0].outlier_type, OutlierType::Reference);
    assert_eq!(outliers[0].patient_id, "P404");
    assert_eq!(
        outliers[0].message,
        "Patient not found in enrollment data for symptom record"
    );
    assert_eq!(
        outliers[0].reported_date,
        Utc.with_ymd_and_hms(2025, 4, 2, 0, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn test_unknown_patient_lab_result_raises_one_reference_outlier() {
    let (_dir, pool, processor, bus) = create_test_processor().await.unwrap();
    let mut rx = bus.subscribe();

    processor
        .process(&lab_results_xml(&[
            ("P404", "LDL", "300", "mg/dL", "2025-04-03T08:30:00Z"),
        ]))
        .await
        .unwrap();

    assert_eq!(count_rows(&pool, "lab_results").await, 0);

    let outliers = processor.store().recent_outliers(10).await.unwrap();
    assert_eq!(outliers.len(), 1);
    assert_eq!(outliers[0].outlier_type, OutlierType::Reference);
    assert_eq!(
        outliers[0].reported_date,
        Utc.with_ymd_and_hms(2025, 4, 3, 8, 30, 0).unwrap()
    );

    // The same anomaly from a different upload is suppressed
    processor
        .process(&lab_results_xml(&[
            ("P404", "LDL", "301", "mg/dL", "2025-04-03T08:30:00Z"),
        ]))
        .await
        .unwrap();
    assert_eq!(count_rows(&pool, "outlier_logs").await, 1);

    assert!(matches!(rx.try_recv(), Ok(CtmEvent::Outlier(_))));
    assert!(rx.try_recv().is_err(), "suppressed outlier must not be broadcast");
}

#[tokio::test]
async fn test_undecodable_symptom_for_unknown_patient_is_a_reference_outlier() {
    let (_dir, pool, processor, _bus) = create_test_processor().await.unwrap();
    enroll_baseline(&processor).await;

    let content = r#"[{"id":"S1","patientId":"P404","symptom":"nausea","severity":"high","reportedDate":"2025-03-01"}]"#;
    let summary = processor.process(content).await.unwrap();
    assert_eq!(summary.count, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(count_rows(&pool, "symptoms").await, 0);

    let outliers = processor.store().recent_outliers(10).await.unwrap();
    assert_eq!(outliers.len(), 1);
    assert_eq!(outliers[0].outlier_type, OutlierType::Reference);
    assert_eq!(outliers[0].patient_id, "P404");
    assert_eq!(
        outliers[0].message,
        "Patient not found in enrollment data for symptom record"
    );
    assert_eq!(
        outliers[0].reported_date,
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn test_undecodable_lab_result_for_unknown_patient_is_a_reference_outlier() {
    let (_dir, pool, processor, _bus) = create_test_processor().await.unwrap();
    enroll_baseline(&processor).await;

    processor
        .process(&lab_results_xml(&[("P404", "LDL", "n/a", "mg/dL", "2025-03-01")]))
        .await
        .unwrap();
    assert_eq!(count_rows(&pool, "lab_results").await, 0);

    let outliers = processor.store().recent_outliers(10).await.unwrap();
    assert_eq!(outliers.len(), 1);
    assert_eq!(outliers[0].outlier_type, OutlierType::Reference);
    assert_eq!(
        outliers[0].message,
        "Patient not found in enrollment data for lab result"
    );
    assert_eq!(
        outliers[0].reported_date,
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn test_undecodable_record_for_enrolled_patient_is_a_format_outlier() {
    let (_dir, _pool, processor, _bus) = create_test_processor().await.unwrap();
    enroll_baseline(&processor).await;

    processor
        .process(&lab_results_xml(&[("P1", "LDL", "n/a", "mg/dL", "2025-03-01")]))
        .await
        .unwrap();

    let outliers = processor.store().recent_outliers(10).await.unwrap();
    assert_eq!(outliers.len(), 1);
    assert_eq!(outliers[0].outlier_type, OutlierType::Format);
    assert_eq!(
        outliers[0].message,
        "Malformed row 1: value is not a decimal number: n/a"
    );
}

#[tokio::test]
async fn test_upper_case_enrollment_header_is_accepted() {
    let (_dir, pool, processor, _bus) = create_test_processor().await.unwrap();

    let summary = processor
        .process("PATIENTID,ENROLLDATE\nP1,2025-01-01\nP2,2025-01-02\n")
        .await
        .unwrap();
    assert_eq!(summary.accepted, 2);
    assert_eq!(count_rows(&pool, "patients").await, 2);
    assert_eq!(count_rows(&pool, "outlier_logs").await, 0);
}

#[tokio::test]
async fn test_duplicate_enrollment_is_flagged() {
    let (_dir, pool, processor, _bus) = create_test_processor().await.unwrap();
    enroll_baseline(&processor).await;

    processor
        .process(&enrollments_csv(&[("P1", "T2", "2025-05-01"), ("P3", "T2", "2025-05-01")]))
        .await
        .unwrap();

    assert_eq!(count_rows(&pool, "patients").await, 3);

    let patient = processor.store().find_patient("P1").await.unwrap().unwrap();
    assert_eq!(patient.trial_id, "T1", "enrollment is never mutated");

    let outliers = processor.store().recent_outliers(10).await.unwrap();
    assert_eq!(outliers.len(), 1);
    assert_eq!(outliers[0].outlier_type, OutlierType::Duplicate);
}

#[tokio::test]
async fn test_header_only_upload_counts_zero() {
    let (_dir, _pool, processor, _bus) = create_test_processor().await.unwrap();

    let summary = processor.process("patientId,trialId,enrollDate\n").await.unwrap();
    assert_eq!(summary.record_type, RecordKind::Enrollments);
    assert_eq!(summary.count, 0);
}

#[tokio::test]
async fn test_fatal_errors() {
    let (_dir, pool, processor, _bus) = create_test_processor().await.unwrap();

    assert!(matches!(
        processor.process("just some notes").await,
        Err(IngestError::FormatUnrecognized)
    ));
    assert!(matches!(
        processor.process("<Patients><Patient/></Patients>").await,
        Err(IngestError::StructuralParseFailure { .. })
    ));
    assert_eq!(count_rows(&pool, "upload_fingerprints").await, 0);
}
