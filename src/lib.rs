//! shorturl-ci - CI/CD pipeline for the URL-shortening service
//!
//! Builds, tests, delivers and deploys the service by running each stage's
//! commands in a short-lived execution environment. The deploy orchestrator
//! drives the infrastructure-as-code workflow `init → plan → apply → output`.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

pub mod cli;
pub mod deploy;
pub mod error;
pub mod log;
pub mod pipeline;
pub mod runtime;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use cli::StageDisplay;
pub use deploy::{
    BuildArtifact, Credentials, DeployReport, DeployRequest, Orchestrator, StagingInput,
};
pub use error::{DeployError, RuntimeError};
pub use log::{JsonlLogger, RunRecord};
pub use pipeline::{PipelineConfig, Stage, StageContext};
pub use runtime::{CancelHandle, CancelSignal, ContainerRuntime, DockerRuntime, LocalRuntime};
