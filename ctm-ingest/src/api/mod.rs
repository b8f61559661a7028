//! HTTP API handlers for ctm-ingest
//!
//! REST endpoints for uploads and analysis, plus an SSE stream of outliers.

pub mod analysis;
pub mod health;
pub mod sse;
pub mod upload;

pub use analysis::analysis_routes;
pub use health::health_routes;
pub use sse::event_stream;
pub use upload::upload_routes;
