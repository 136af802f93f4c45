//! Logging and observability
//!
//! JSONL run history for stage invocations.

pub mod jsonl;

pub use jsonl::{JsonlLogger, RunRecord};
