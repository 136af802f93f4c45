//! Pipeline configuration parser
//!
//! Parses `shorturl-ci.toml` into runtime, image and deploy settings. Every
//! table and key is optional; missing values fall back to the defaults below.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Which runtime executes stage commands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Docker-compatible container engine
    #[default]
    Docker,
    /// Directly on the host
    Local,
}

/// `[runtime]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Runtime kind (default: docker)
    #[serde(default)]
    pub kind: RuntimeKind,
    /// Container engine binary (default: docker)
    #[serde(default = "default_engine")]
    pub engine: String,
    /// `uid:gid` to run containers as, so files they create in the
    /// workspace stay removable by the invoking user (default: image user)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kind: RuntimeKind::default(),
            engine: default_engine(),
            user: None,
        }
    }
}

fn default_engine() -> String {
    "docker".to_string()
}

/// `[images]` table: base image per stage family
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageConfig {
    /// Infrastructure-as-code image used by `deploy`
    #[serde(default = "default_infra_image")]
    pub infra: String,
    /// Node.js image used by `build` and `unit-test`
    #[serde(default = "default_node_image")]
    pub node: String,
    /// curl image used by `integration-test`
    #[serde(default = "default_curl_image")]
    pub curl: String,
    /// Minimal image used by the placeholder stages
    #[serde(default = "default_alpine_image")]
    pub alpine: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            infra: default_infra_image(),
            node: default_node_image(),
            curl: default_curl_image(),
            alpine: default_alpine_image(),
        }
    }
}

fn default_infra_image() -> String {
    "ghcr.io/opentofu/opentofu:latest".to_string()
}

fn default_node_image() -> String {
    "node:18-slim".to_string()
}

fn default_curl_image() -> String {
    "curlimages/curl:latest".to_string()
}

fn default_alpine_image() -> String {
    "alpine:latest".to_string()
}

/// `[deploy]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploySettings {
    /// Infrastructure-as-code CLI (default: tofu)
    #[serde(default = "default_iac_binary")]
    pub iac_binary: String,
    /// File name the plan phase writes and the apply phase reads (default: tfplan)
    #[serde(default = "default_plan_file")]
    pub plan_file: String,
    /// Overall deadline for a stage in seconds. None means no deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            iac_binary: default_iac_binary(),
            plan_file: default_plan_file(),
            timeout_secs: None,
        }
    }
}

fn default_iac_binary() -> String {
    "tofu".to_string()
}

fn default_plan_file() -> String {
    "tfplan".to_string()
}

/// Top-level configuration parsed from `shorturl-ci.toml`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PipelineConfig {
    /// Runtime selection
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Base images
    #[serde(default)]
    pub images: ImageConfig,
    /// Deploy orchestrator settings
    #[serde(default)]
    pub deploy: DeploySettings,
}

impl PipelineConfig {
    /// Parse a configuration file from a path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load `path` if it exists, otherwise use built-in defaults.
    ///
    /// With `required`, a missing file is an error.
    pub fn load<P: AsRef<Path>>(path: P, required: bool) -> Result<Self> {
        let path = path.as_ref();
        if !required && !path.exists() {
            return Ok(Self::default());
        }
        Self::from_path(path)
    }

    /// Parse configuration content from a string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse shorturl-ci.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        let required = [
            ("runtime.engine", &self.runtime.engine),
            ("images.infra", &self.images.infra),
            ("images.node", &self.images.node),
            ("images.curl", &self.images.curl),
            ("images.alpine", &self.images.alpine),
            ("deploy.iac_binary", &self.deploy.iac_binary),
            ("deploy.plan_file", &self.deploy.plan_file),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                bail!("'{key}' cannot be empty");
            }
        }

        if self.runtime.user.as_deref().is_some_and(|u| u.trim().is_empty()) {
            bail!("'runtime.user' cannot be empty");
        }

        let plan_file = &self.deploy.plan_file;
        if plan_file.contains('/') || plan_file == "." || plan_file == ".." {
            bail!("'deploy.plan_file' must be a bare file name, got '{plan_file}'");
        }

        if self.deploy.timeout_secs == Some(0) {
            bail!("'deploy.timeout_secs' must be greater than zero");
        }

        Ok(())
    }
}
