//! Pipeline stages and their configuration
//!
//! `config` reads `shorturl-ci.toml`, `defaults` resolves caller-supplied
//! options, and `stages` runs each stage through a container runtime.

pub mod config;
pub mod defaults;
pub mod stages;

pub use config::{DeploySettings, ImageConfig, PipelineConfig, RuntimeConfig, RuntimeKind};
pub use defaults::{ClusterConfig, DeployConfig, ResolvedClusterConfig, ResolvedDeployConfig};
pub use stages::{ClusterRequest, DeliverRequest, Stage, StageContext, ValidateRequest};
