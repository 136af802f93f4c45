//! Host-local runtime
//!
//! Runs commands directly on the host instead of inside a container. The
//! image is ignored; container paths under `/workspace` are rewritten to the
//! workspace's host directory. Useful where the tools are already
//! installed (e.g. a CI runner with `tofu` on `PATH`).

use async_trait::async_trait;
use tokio::process::Command;

use super::cancel::CancelSignal;
use super::environment::{ExecutionEnvironment, MOUNT_POINT};
use super::process::run_command;
use super::{ContainerRuntime, ExecOutput};
use crate::error::RuntimeError;

/// Runs commands on the host, inside the workspace directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRuntime;

impl LocalRuntime {
    /// Create a local runtime.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Build the host command for `argv` in `env`.
    pub fn build_command(
        env: &ExecutionEnvironment,
        argv: &[String],
    ) -> Result<Command, RuntimeError> {
        let root = env
            .workspace()
            .map(|ws| ws.root().to_string_lossy().into_owned());
        let rewrite = |arg: &str| match &root {
            Some(root) => rewrite_mount_paths(arg, root),
            None => arg.to_string(),
        };

        let (program, args) = argv.split_first().ok_or(RuntimeError::EmptyCommand)?;
        let mut cmd = Command::new(rewrite(program.as_str()));
        cmd.args(args.iter().map(|a| rewrite(a.as_str())));

        if let Some(dir) = env.host_path(env.workdir()) {
            cmd.current_dir(dir);
        }
        cmd.envs(env.env_vars());
        for (name, secret) in env.secrets() {
            cmd.env(name, secret.expose());
        }
        Ok(cmd)
    }
}

/// Replace container paths rooted at the mount point with `root`.
///
/// Only whole path components match: `/workspace` and `/workspace/...`
/// are rewritten, `/home/ci/workspace` and `/workspaces` are not. Shell
/// script text is scanned the same way.
fn rewrite_mount_paths(arg: &str, root: &str) -> String {
    let mut rewritten = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(pos) = rest.find(MOUNT_POINT) {
        let (before, from) = rest.split_at(pos);
        let after = &from[MOUNT_POINT.len()..];
        let starts_path = !before.chars().next_back().is_some_and(is_path_char);
        let ends_component = !after
            .chars()
            .next()
            .is_some_and(|c| c != '/' && is_path_char(c));

        rewritten.push_str(before);
        rewritten.push_str(if starts_path && ends_component {
            root
        } else {
            MOUNT_POINT
        });
        rest = after;
    }
    rewritten.push_str(rest);
    rewritten
}

const fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '~')
}

#[async_trait]
impl ContainerRuntime for LocalRuntime {
    fn name(&self) -> &str {
        "local"
    }

    async fn exec(
        &self,
        env: &ExecutionEnvironment,
        argv: &[String],
        cancel: &CancelSignal,
    ) -> Result<ExecOutput, RuntimeError> {
        let cmd = Self::build_command(env, argv)?;
        run_command(cmd, cancel).await
    }
}
