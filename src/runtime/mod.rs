//! Container runtime integration
//!
//! This module defines the execution environment model, the runtime
//! client trait, and the Docker and host-local runtime implementations.

pub mod cancel;
pub mod docker;
pub mod environment;
pub mod local;
pub mod process;
pub mod secret;

use async_trait::async_trait;

pub use cancel::{CancelHandle, CancelSignal};
pub use docker::DockerRuntime;
pub use environment::{ExecutionEnvironment, Workspace, MOUNT_POINT};
pub use local::LocalRuntime;
pub use secret::{Secret, SecretSource};

use crate::error::{combine_output, RuntimeError};

/// Captured result of one command execution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    /// Captured stdout, as written by the command
    pub stdout: String,
    /// Captured stderr, as written by the command
    pub stderr: String,
    /// Process exit code (None if killed by signal)
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    /// Whether the command exited with code 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    /// Stdout and stderr joined, for error reports.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        combine_output(&self.stdout, &self.stderr)
    }
}

/// A client able to run one command inside an execution environment.
///
/// Implementations must not keep state between calls that could leak from
/// one invocation's environment into another's.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short name for display (e.g. `docker`).
    fn name(&self) -> &str;

    /// Run `argv` in `env` and wait for it to finish or for `cancel` to fire.
    async fn exec(
        &self,
        env: &ExecutionEnvironment,
        argv: &[String],
        cancel: &CancelSignal,
    ) -> Result<ExecOutput, RuntimeError>;
}
