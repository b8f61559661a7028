//! Test Helper Utilities
//!
//! Shared utilities for testing ctm-ingest

#![allow(dead_code, unused_imports)]

pub mod db_utils;
pub mod fixtures;

pub use db_utils::{count_rows, create_test_db, create_test_processor};
pub use fixtures::{enrollments_csv, lab_results_xml, medications_csv, symptoms_json};
