//! # Clinical Trial Monitor Common Library
//!
//! Shared code for the clinical trial monitor services including:
//! - Domain models for trials, patients, clinical records and outlier logs
//! - Event types (CtmEvent enum) and the EventBus
//! - Configuration loading
//! - Timestamp parsing and formatting
//! - SSE stream helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
