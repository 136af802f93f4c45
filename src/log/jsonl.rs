//! JSONL (JSON Lines) logging for stage run history
//!
//! Provides append-only logging of stage outcomes to `.shorturl-ci/runs.jsonl`.
//! Records carry names and outcomes only. Secret values and captured output
//! are never written.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use crate::deploy::state::DeployState;

/// Represents the outcome of a single stage invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    /// The stage that was run (e.g. `deploy`)
    pub stage: String,
    /// ISO 8601 timestamp of when the stage finished
    pub timestamp: DateTime<Utc>,
    /// Whether the stage succeeded
    pub success: bool,
    /// Whether the stage was stopped by cancellation or timeout
    #[serde(default)]
    pub cancelled: bool,
    /// Label of the failing phase or step, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    /// Runtime that executed the commands
    pub runtime: String,
    /// Duration of the stage in milliseconds
    pub duration_ms: u64,
    /// Resolved region (deploy only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Resolved environment name (deploy only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Names of the collected deployment outputs (values are omitted)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_keys: Vec<String>,
    /// States the deployment passed through (deploy only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<DeployState>,
}

impl RunRecord {
    /// A record for `stage` stamped with the current time
    #[must_use]
    pub fn new(stage: &str, runtime: &str, success: bool, duration_ms: u64) -> Self {
        Self {
            stage: stage.to_string(),
            timestamp: Utc::now(),
            success,
            cancelled: false,
            failed_step: None,
            runtime: runtime.to_string(),
            duration_ms,
            region: None,
            environment: None,
            output_keys: Vec::new(),
            states: Vec::new(),
        }
    }
}

/// JSONL logger for stage run history
///
/// Provides append-only logging to `<log_dir>/runs.jsonl`.
/// Each line is a JSON object representing a single stage invocation.
pub struct JsonlLogger {
    log_path: PathBuf,
}

impl JsonlLogger {
    /// Create a new JSONL logger
    ///
    /// # Errors
    /// Returns an error if the log directory cannot be created
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        let log_dir = log_dir.as_ref();

        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

        let log_path = log_dir.join("runs.jsonl");

        Ok(Self { log_path })
    }

    /// Append a run record to the log
    ///
    /// # Errors
    /// Returns an error if the log file cannot be opened, the record cannot
    /// be serialized, or writing fails
    pub fn append(&self, record: &RunRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("Failed to open log file: {}", self.log_path.display()))?;

        let json = serde_json::to_string(record).context("Failed to serialize run record to JSON")?;

        writeln!(file, "{json}").context("Failed to write to log file")?;

        Ok(())
    }

    /// Read all run records from the log, oldest first
    ///
    /// # Errors
    /// Returns an error if the log file cannot be read or any line is not a
    /// valid record
    pub fn read_all(&self) -> Result<Vec<RunRecord>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.log_path)
            .with_context(|| format!("Failed to read log file: {}", self.log_path.display()))?;

        let mut records = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let record: RunRecord = serde_json::from_str(line)
                .with_context(|| format!("Failed to parse line {} as JSON", line_num + 1))?;

            records.push(record);
        }

        Ok(records)
    }

    /// Get the path to the log file
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn deploy_record() -> RunRecord {
        let mut record = RunRecord::new("deploy", "docker", true, 42_000);
        record.region = Some("us-east-1".to_string());
        record.environment = Some("dev".to_string());
        record.output_keys = vec!["api_url".to_string()];
        record.states = vec![DeployState::Start, DeployState::Done];
        record
    }

    #[test]
    fn test_new_logger_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join(".shorturl-ci");

        let logger = JsonlLogger::new(&log_dir).unwrap();

        assert!(log_dir.exists());
        assert_eq!(logger.log_path(), log_dir.join("runs.jsonl"));
    }

    #[test]
    fn test_append_multiple_records() {
        let temp_dir = TempDir::new().unwrap();
        let logger = JsonlLogger::new(temp_dir.path()).unwrap();

        logger.append(&deploy_record()).unwrap();
        logger
            .append(&RunRecord::new("unit-test", "local", false, 800))
            .unwrap();

        let content = fs::read_to_string(logger.log_path()).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_read_all_empty_log() {
        let temp_dir = TempDir::new().unwrap();
        let logger = JsonlLogger::new(temp_dir.path()).unwrap();

        assert!(logger.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_read_all_returns_records_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let logger = JsonlLogger::new(temp_dir.path()).unwrap();

        let mut failed = RunRecord::new("deploy", "docker", false, 3_000);
        failed.failed_step = Some("plan".to_string());
        logger.append(&deploy_record()).unwrap();
        logger.append(&failed).unwrap();

        let records = logger.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], deploy_record_with_timestamp(records[0].timestamp));
        assert_eq!(records[1].failed_step.as_deref(), Some("plan"));
        assert!(!records[1].success);
    }

    fn deploy_record_with_timestamp(timestamp: DateTime<Utc>) -> RunRecord {
        RunRecord {
            timestamp,
            ..deploy_record()
        }
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let json = serde_json::to_string(&RunRecord::new("build", "local", true, 10)).unwrap();
        assert!(!json.contains("region"), "got: {json}");
        assert!(!json.contains("output_keys"), "got: {json}");
        assert!(!json.contains("failed_step"), "got: {json}");
    }

    #[test]
    fn test_read_all_rejects_garbage_line() {
        let temp_dir = TempDir::new().unwrap();
        let logger = JsonlLogger::new(temp_dir.path()).unwrap();
        fs::write(logger.log_path(), "not json\n").unwrap();

        let err = logger.read_all().unwrap_err();
        assert!(err.to_string().contains("line 1"), "got: {err}");
    }
}
