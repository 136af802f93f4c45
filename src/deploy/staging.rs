//! Artifact staging
//!
//! Materializes an optional build artifact into the infrastructure working
//! tree before any phase runs. The staged archive is removed once it has
//! been extracted.

use std::path::Path;

use anyhow::{Context, Result};

use super::environment::INFRA_DIR;
use crate::cli::display::StageDisplay;
use crate::error::{DeployError, RuntimeError};
use crate::runtime::{CancelSignal, ContainerRuntime, ExecutionEnvironment};

/// File name the archive is staged under
pub const STAGED_ARCHIVE_NAME: &str = "lambda-deployment.tar.gz";
/// Subdirectory the archive's contents land in
pub const ARTIFACT_TARGET_DIR: &str = "lambda";

/// Opaque archive produced by the build stage
#[derive(Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    name: String,
    contents: Vec<u8>,
}

impl BuildArtifact {
    /// Wrap archive bytes.
    #[must_use]
    pub fn new(name: &str, contents: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            contents,
        }
    }

    /// Read an archive from the host.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read(path)
            .with_context(|| format!("Failed to read build artifact: {}", path.display()))?;
        let name = path
            .file_name()
            .map_or_else(|| STAGED_ARCHIVE_NAME.to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Self { name, contents })
    }

    /// Identity of the archive (its file name)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Archive bytes
    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    /// Archive size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.contents.len()
    }

    /// Whether the archive is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

impl std::fmt::Debug for BuildArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildArtifact")
            .field("name", &self.name)
            .field("len", &self.contents.len())
            .finish()
    }
}

/// Whether a deployment has an artifact to stage
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StagingInput {
    /// Infrastructure is self-contained
    #[default]
    NoArtifact,
    /// Extract this archive first
    Artifact(BuildArtifact),
}

impl From<Option<BuildArtifact>> for StagingInput {
    fn from(artifact: Option<BuildArtifact>) -> Self {
        artifact.map_or(Self::NoArtifact, Self::Artifact)
    }
}

/// What the stager did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingOutcome {
    /// The archive was extracted
    Staged,
    /// There was nothing to stage
    Skipped,
}

/// Container path the archive is written to
#[must_use]
pub fn staged_archive_path() -> String {
    format!("{INFRA_DIR}/{STAGED_ARCHIVE_NAME}")
}

/// Shell script that unpacks the staged archive and deletes it.
#[must_use]
pub fn extraction_script() -> String {
    let archive = staged_archive_path();
    format!(
        "mkdir -p {INFRA_DIR}/{ARTIFACT_TARGET_DIR} && tar -xzf {archive} -C {INFRA_DIR}/ && rm {archive}"
    )
}

/// Stage `input` into `env`.
///
/// `NoArtifact` returns the environment untouched without running anything.
pub async fn stage<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    env: ExecutionEnvironment,
    input: StagingInput,
    cancel: &CancelSignal,
    display: &StageDisplay,
) -> Result<(ExecutionEnvironment, StagingOutcome), DeployError> {
    let artifact = match input {
        StagingInput::NoArtifact => return Ok((env, StagingOutcome::Skipped)),
        StagingInput::Artifact(artifact) => artifact,
    };

    if cancel.is_cancelled() {
        return Err(DeployError::Cancelled {
            during: "staging".to_string(),
        });
    }

    display.step_started("Extracting build artifact...");
    let env = env
        .with_file(&staged_archive_path(), artifact.contents())
        .map_err(|e| DeployError::Staging {
            message: format!("cannot write '{}' into the workspace: {e}", artifact.name()),
            output: String::new(),
        })?;

    let argv = vec!["sh".to_string(), "-c".to_string(), extraction_script()];
    let output = match runtime.exec(&env, &argv, cancel).await {
        Ok(output) => output,
        Err(RuntimeError::Cancelled) => {
            return Err(DeployError::Cancelled {
                during: "staging".to_string(),
            })
        }
        Err(e) => {
            return Err(DeployError::Staging {
                message: format!("extraction of '{}' could not run", artifact.name()),
                output: e.to_string(),
            })
        }
    };

    if !output.success() {
        return Err(DeployError::Staging {
            message: format!("extraction of '{}' failed", artifact.name()),
            output: output.diagnostic(),
        });
    }

    display.info(&format!(
        "Staged {} ({} bytes) into {INFRA_DIR}/{ARTIFACT_TARGET_DIR}",
        artifact.name(),
        artifact.len()
    ));
    Ok((env, StagingOutcome::Staged))
}
