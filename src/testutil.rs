//! Shared test utilities
//!
//! Common helpers used across test modules. Only compiled in test builds.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::error::RuntimeError;
use crate::runtime::{CancelHandle, CancelSignal, ContainerRuntime, ExecOutput, ExecutionEnvironment};

/// Sample `output -json` payload returned by default.
pub const SAMPLE_OUTPUTS: &str = r#"{"api_url":{"sensitive":false,"type":"string","value":"https://abc123.execute-api.us-east-1.amazonaws.com"}}"#;

/// What the fake runtime does when a command matches a rule.
#[derive(Debug, Clone)]
pub enum Response {
    /// Exit 0 with this stdout
    Succeed(String),
    /// Exit non-zero
    Fail {
        /// Exit code to report
        exit_code: i32,
        /// Captured stdout
        stdout: String,
        /// Captured stderr
        stderr: String,
    },
    /// The command cannot be started
    SpawnError,
    /// Fire the handle, then behave like a runtime that saw the signal
    CancelDuring(CancelHandle),
}

/// One `exec` as seen by the fake runtime.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Image of the environment
    pub image: String,
    /// Working directory of the environment
    pub workdir: String,
    /// Command
    pub argv: Vec<String>,
    /// Plain variables bound at call time
    pub env: BTreeMap<String, String>,
    /// Names of secret variables bound at call time
    pub secret_names: Vec<String>,
}

/// A `ContainerRuntime` that records every call and never spawns anything.
///
/// Commands succeed unless a rule matches; a rule matches when any argv
/// element equals its token.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    rules: Vec<(String, Response)>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeRuntime {
    /// A runtime where every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to commands containing `token` with `response`.
    #[must_use]
    pub fn respond(mut self, token: &str, response: Response) -> Self {
        self.rules.push((token.to_string(), response));
        self
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Second argv element of every call (the IaC subcommand for phases).
    pub fn subcommands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.argv.get(1).cloned().unwrap_or_default())
            .collect()
    }

    fn default_stdout(argv: &[String]) -> String {
        match argv.get(1).map(String::as_str) {
            Some("output") => SAMPLE_OUTPUTS.to_string(),
            Some("apply") => "Apply complete! Resources: 1 added, 0 changed, 0 destroyed.".to_string(),
            _ => format!("{} ok", argv.join(" ")),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn exec(
        &self,
        env: &ExecutionEnvironment,
        argv: &[String],
        cancel: &CancelSignal,
    ) -> Result<ExecOutput, RuntimeError> {
        if cancel.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }

        self.calls.lock().unwrap().push(RecordedCall {
            image: env.image().to_string(),
            workdir: env.workdir().to_string(),
            argv: argv.to_vec(),
            env: env.env_vars().clone(),
            secret_names: env.secrets().keys().cloned().collect(),
        });

        let rule = self
            .rules
            .iter()
            .find(|(token, _)| argv.iter().any(|a| a == token))
            .map(|(_, response)| response.clone());

        match rule {
            None => Ok(ExecOutput {
                stdout: Self::default_stdout(argv),
                stderr: String::new(),
                exit_code: Some(0),
            }),
            Some(Response::Succeed(stdout)) => Ok(ExecOutput {
                stdout,
                stderr: String::new(),
                exit_code: Some(0),
            }),
            Some(Response::Fail {
                exit_code,
                stdout,
                stderr,
            }) => Ok(ExecOutput {
                stdout,
                stderr,
                exit_code: Some(exit_code),
            }),
            Some(Response::SpawnError) => Err(RuntimeError::Spawn {
                program: argv.first().cloned().unwrap_or_default(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }),
            Some(Response::CancelDuring(handle)) => {
                handle.cancel();
                cancel.cancelled().await;
                Err(RuntimeError::Cancelled)
            }
        }
    }
}

/// A source tree with `terraform/main.tf` and `lambda/index.js`.
#[must_use]
pub fn source_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("terraform")).unwrap();
    std::fs::write(dir.path().join("terraform/main.tf"), "# infra\n").unwrap();
    std::fs::create_dir_all(dir.path().join("lambda")).unwrap();
    std::fs::write(dir.path().join("lambda/index.js"), "exports.handler = async () => {};\n")
        .unwrap();
    dir
}
