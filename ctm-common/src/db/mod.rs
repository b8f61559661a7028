//! Database models shared between the monitor crates

pub mod models;

pub use models::*;
