//! Error taxonomy for pipeline stages and the deploy orchestrator
//!
//! Every variant carries enough context to tell the caller which step
//! failed and what it printed. Environment construction cannot fail, so
//! there is no construction variant.

use thiserror::Error;

use crate::deploy::phase::Phase;

/// Failure of a single command execution inside a container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The command could not be started
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The command started but waiting on it failed
    #[error("failed waiting for `{program}`: {message}")]
    Wait {
        /// Program that was running
        program: String,
        /// Description of the failure
        message: String,
    },
    /// An empty argument vector was passed to `exec`
    #[error("cannot execute an empty command")]
    EmptyCommand,
    /// The cancel signal fired before or while the command ran
    #[error("cancelled")]
    Cancelled,
}

/// Error returned by a deployment or any other pipeline stage.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Writing or extracting the build artifact failed. No phase ran.
    #[error("artifact staging failed: {message}")]
    Staging {
        /// What went wrong
        message: String,
        /// Captured diagnostic output of the extraction step, if any
        output: String,
    },
    /// An infrastructure phase exited non-zero or failed to start
    #[error("phase '{phase}' failed ({}):\n{output}", exit_label(.exit_code))]
    Phase {
        /// The failing phase
        phase: Phase,
        /// Process exit code (None if it never started or was killed)
        exit_code: Option<i32>,
        /// Captured stdout and stderr of the phase
        output: String,
    },
    /// A pipeline stage command exited non-zero or failed to start
    #[error("{stage}: step '{step}' failed ({}):\n{output}", exit_label(.exit_code))]
    Stage {
        /// Stage name (e.g. `unit-test`)
        stage: String,
        /// Step label within the stage
        step: String,
        /// Process exit code (None if it never started or was killed)
        exit_code: Option<i32>,
        /// Captured stdout and stderr of the step
        output: String,
    },
    /// The caller's cancel signal fired
    #[error("cancelled during {during}")]
    Cancelled {
        /// Label of the step that was running or about to run
        during: String,
    },
    /// The request could not be turned into a runnable configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DeployError {
    /// The phase that failed, if this error came from the phase runner.
    #[must_use]
    pub const fn phase(&self) -> Option<Phase> {
        match self {
            Self::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Returns true if the run was stopped by the cancel signal.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Process exit status the CLI should use for this error.
    #[must_use]
    pub const fn exit_status(&self) -> i32 {
        if self.is_cancelled() {
            130
        } else {
            1
        }
    }
}

/// Format an exit code for display, or "no exit code" if the process never reported one.
#[allow(clippy::ref_option)]
fn exit_label(exit_code: &Option<i32>) -> String {
    exit_code.map_or_else(|| "no exit code".to_string(), |c| format!("exit code {c}"))
}

/// Join captured stdout and stderr into one diagnostic block.
#[must_use]
pub fn combine_output(stdout: &str, stderr: &str) -> String {
    match (stdout.is_empty(), stderr.is_empty()) {
        (_, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) if stdout.ends_with('\n') => format!("{stdout}{stderr}"),
        (false, false) => format!("{stdout}\n{stderr}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_error_names_phase_and_exit_code() {
        let err = DeployError::Phase {
            phase: Phase::Plan,
            exit_code: Some(1),
            output: "Error: invalid provider".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'plan'"), "got: {msg}");
        assert!(msg.contains("exit code 1"), "got: {msg}");
        assert!(msg.contains("Error: invalid provider"), "got: {msg}");
        assert_eq!(err.phase(), Some(Phase::Plan));
    }

    #[test]
    fn test_phase_error_without_exit_code() {
        let err = DeployError::Phase {
            phase: Phase::Initialize,
            exit_code: None,
            output: "failed to spawn `tofu`".to_string(),
        };
        assert!(err.to_string().contains("no exit code"));
    }

    #[test]
    fn test_cancelled_exit_status() {
        let err = DeployError::Cancelled {
            during: "apply".to_string(),
        };
        assert!(err.is_cancelled());
        assert_eq!(err.exit_status(), 130);
        assert_eq!(err.to_string(), "cancelled during apply");
        assert_eq!(err.phase(), None);
    }

    #[test]
    fn test_other_errors_exit_with_one() {
        let err = DeployError::Config("bad".to_string());
        assert!(!err.is_cancelled());
        assert_eq!(err.exit_status(), 1);
    }

    #[test]
    fn test_combine_output() {
        assert_eq!(combine_output("out", ""), "out");
        assert_eq!(combine_output("", "err"), "err");
        assert_eq!(combine_output("out", "err"), "out\nerr");
        assert_eq!(combine_output("out\n", "err\n"), "out\nerr\n");
        assert_eq!(combine_output("", ""), "");
    }
}
