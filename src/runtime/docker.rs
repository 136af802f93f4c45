//! Docker-compatible runtime
//!
//! Each `exec` is one `docker run --rm` against the environment's image,
//! with the workspace bind-mounted at `/workspace`. Filesystem changes made
//! by one command are visible to the next through the mount.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use colored::Colorize;
use tokio::process::Command;

use super::cancel::CancelSignal;
use super::environment::{ExecutionEnvironment, MOUNT_POINT};
use super::process::run_command;
use super::{ContainerRuntime, ExecOutput};
use crate::error::RuntimeError;

/// Runs commands through a Docker-compatible CLI (`docker`, `podman`).
#[derive(Debug)]
pub struct DockerRuntime {
    engine: String,
    user: Option<String>,
    counter: AtomicU64,
}

impl DockerRuntime {
    /// Create a runtime that invokes the given engine binary.
    #[must_use]
    pub fn new(engine: &str) -> Self {
        Self {
            engine: engine.to_string(),
            user: None,
            counter: AtomicU64::new(0),
        }
    }

    /// Run containers as `user` (`uid:gid`) instead of the image default.
    #[must_use]
    pub fn with_user(mut self, user: Option<&str>) -> Self {
        self.user = user.map(ToString::to_string);
        self
    }

    fn next_container_name(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("shorturl-ci-{}-{n}", std::process::id())
    }

    /// Build the `run` command for `argv` in `env`.
    ///
    /// Secret values are passed through the child process environment and
    /// referenced by name only, so they never appear on the command line.
    #[must_use]
    pub fn build_command(
        &self,
        env: &ExecutionEnvironment,
        argv: &[String],
        container_name: &str,
    ) -> Command {
        let mut cmd = Command::new(&self.engine);
        cmd.arg("run").arg("--rm").arg("--name").arg(container_name);
        if let Some(user) = &self.user {
            cmd.arg("--user").arg(user);
        }

        if let Some(workspace) = env.workspace() {
            cmd.arg("-v")
                .arg(format!("{}:{MOUNT_POINT}", workspace.root().display()));
        }
        cmd.arg("-w").arg(env.workdir());

        for (name, value) in env.env_vars() {
            cmd.arg("-e").arg(format!("{name}={value}"));
        }
        for (name, secret) in env.secrets() {
            cmd.arg("-e").arg(name);
            cmd.env(name, secret.expose());
        }

        cmd.arg(env.image());
        cmd.args(argv);
        cmd
    }

    async fn remove_container(&self, name: &str) {
        let removed = Command::new(&self.engine)
            .arg("rm")
            .arg("-f")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;
        let failure = match removed {
            Ok(output) if output.status.success() => return,
            Ok(output) => String::from_utf8_lossy(&output.stderr).trim().to_string(),
            Err(e) => e.to_string(),
        };
        eprintln!(
            "  {} {}",
            "!".yellow().bold(),
            format!("Container {name} may still be running: {failure}").yellow()
        );
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &str {
        &self.engine
    }

    async fn exec(
        &self,
        env: &ExecutionEnvironment,
        argv: &[String],
        cancel: &CancelSignal,
    ) -> Result<ExecOutput, RuntimeError> {
        if argv.is_empty() {
            return Err(RuntimeError::EmptyCommand);
        }
        let name = self.next_container_name();
        let cmd = self.build_command(env, argv, &name);

        match run_command(cmd, cancel).await {
            Err(RuntimeError::Cancelled) => {
                // Killing the client does not stop the container itself.
                self.remove_container(&name).await;
                Err(RuntimeError::Cancelled)
            }
            other => other,
        }
    }
}
