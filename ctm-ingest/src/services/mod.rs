//! Ingest pipeline services
//!
//! Content flows detector → duplicate guard → parser → validator → store →
//! outlier evaluator, sequenced by [`FileProcessor`].

pub mod content_hasher;
pub mod file_processor;
pub mod format_detector;
pub mod outlier_evaluator;
pub mod parsers;
pub mod validator;

pub use content_hasher::{fingerprint, DuplicateGuard};
pub use file_processor::{FileProcessor, PipelineState, UploadSummary};
pub use format_detector::{detect, ContentFormat};
pub use outlier_evaluator::{evaluate, Anomaly, Observation};
pub use parsers::{IngestRecords, RecordKind, RowDefect};
