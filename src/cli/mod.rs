//! CLI output formatting
//!
//! Provides human-readable terminal display for stage execution.

pub mod display;

pub use display::{format_duration, StageDisplay};
