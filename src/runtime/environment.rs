//! Execution environments
//!
//! An `ExecutionEnvironment` describes where a command runs: the image,
//! working directory, environment variables, secrets and the mounted
//! working tree. Builder methods consume and return the environment, so a
//! value is threaded linearly from one step to the next.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use tempfile::TempDir;

use super::secret::Secret;

/// Container path where the working tree is mounted.
pub const MOUNT_POINT: &str = "/workspace";

/// Directory names never copied into a workspace.
const SKIPPED_DIRS: &[&str] = &[".git"];

/// A working tree exclusive to one invocation.
///
/// The source directory is copied into a fresh temporary directory, which
/// is mounted at `MOUNT_POINT`. The copy is removed when the workspace is
/// dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Copy `source` into a new temporary working tree.
    pub fn prepare(source: &Path) -> Result<Self> {
        if !source.is_dir() {
            anyhow::bail!("Source directory not found: {}", source.display());
        }
        let dir = tempfile::Builder::new()
            .prefix("shorturl-ci-")
            .tempdir()
            .context("Failed to create workspace directory")?;
        copy_tree(source, dir.path())
            .with_context(|| format!("Failed to copy source tree: {}", source.display()))?;
        Ok(Self { dir })
    }

    /// Host directory backing the mount.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Map a container path under `MOUNT_POINT` to its host path.
    ///
    /// Returns `None` for paths outside the mount or paths containing `..`.
    #[must_use]
    pub fn host_path(&self, container_path: &str) -> Option<PathBuf> {
        let rest = container_path.strip_prefix(MOUNT_POINT)?;
        if rest.is_empty() {
            return Some(self.root().to_path_buf());
        }
        let rest = rest.strip_prefix('/')?;
        if rest.split('/').any(|part| part == "..") {
            return None;
        }
        Some(self.root().join(rest))
    }
}

impl Drop for Workspace {
    /// Files created by a container running as another user can outlive the
    /// workspace; say so instead of leaving the directory behind silently.
    fn drop(&mut self) {
        match fs::remove_dir_all(self.dir.path()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => eprintln!(
                "  {} {}",
                "!".yellow().bold(),
                format!(
                    "Workspace {} was not removed: {e}",
                    self.dir.path().display()
                )
                .yellow()
            ),
        }
    }
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let name = entry.file_name();
        if SKIPPED_DIRS.iter().any(|skip| name == *skip) {
            continue;
        }
        let src = entry.path();
        let dest = to.join(&name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
            copy_tree(&src, &dest)?;
        } else if file_type.is_symlink() {
            copy_symlink(&src, &dest)?;
        } else {
            fs::copy(&src, &dest)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    let target = fs::read_link(src)?;
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    fs::copy(src, dest).map(|_| ())
}

/// Everything a runtime needs to execute a command.
#[derive(Debug)]
pub struct ExecutionEnvironment {
    image: String,
    workdir: String,
    env: BTreeMap<String, String>,
    secrets: BTreeMap<String, Secret>,
    workspace: Option<Workspace>,
}

impl ExecutionEnvironment {
    /// Start from a base image with no mount, working directory `/`.
    #[must_use]
    pub fn from_image(image: &str) -> Self {
        Self {
            image: image.to_string(),
            workdir: "/".to_string(),
            env: BTreeMap::new(),
            secrets: BTreeMap::new(),
            workspace: None,
        }
    }

    /// Mount a working tree at `MOUNT_POINT` and make it the working directory.
    #[must_use]
    pub fn with_workspace(mut self, workspace: Workspace) -> Self {
        self.workspace = Some(workspace);
        self.workdir = MOUNT_POINT.to_string();
        self
    }

    /// Set the working directory (a container path).
    #[must_use]
    pub fn with_workdir(mut self, path: &str) -> Self {
        self.workdir = path.to_string();
        self
    }

    /// Bind a plain environment variable.
    #[must_use]
    pub fn with_env_variable(mut self, name: &str, value: &str) -> Self {
        self.env.insert(name.to_string(), value.to_string());
        self
    }

    /// Bind a secret as an environment variable.
    #[must_use]
    pub fn with_secret_variable(mut self, name: &str, secret: &Secret) -> Self {
        self.secrets.insert(name.to_string(), secret.clone());
        self
    }

    /// Write `contents` into the mounted tree at `container_path`.
    ///
    /// Fails if nothing is mounted or the path lies outside the mount.
    pub fn with_file(self, container_path: &str, contents: &[u8]) -> io::Result<Self> {
        let host_path = self
            .workspace
            .as_ref()
            .and_then(|ws| ws.host_path(container_path))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("'{container_path}' is not inside a mounted workspace"),
                )
            })?;
        if let Some(parent) = host_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&host_path, contents)?;
        Ok(self)
    }

    /// Base image identifier.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Working directory (a container path).
    #[must_use]
    pub fn workdir(&self) -> &str {
        &self.workdir
    }

    /// Plain environment variables, ordered by name.
    #[must_use]
    pub const fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Secret-backed environment variables, ordered by name.
    #[must_use]
    pub const fn secrets(&self) -> &BTreeMap<String, Secret> {
        &self.secrets
    }

    /// The mounted working tree, if any.
    #[must_use]
    pub const fn workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    /// Host path for a container path under the mount.
    #[must_use]
    pub fn host_path(&self, container_path: &str) -> Option<PathBuf> {
        self.workspace.as_ref()?.host_path(container_path)
    }
}
