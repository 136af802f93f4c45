//! Option resolution for stage parameters
//!
//! Callers pass every optional parameter as `Option<String>`. Each request
//! type is resolved exactly once into a fully-populated value; blank
//! strings count as absent. Downstream code never re-checks for defaults.

use std::path::Path;

/// Default cloud region for `deploy`
pub const DEFAULT_REGION: &str = "us-east-1";
/// Default environment name for `deploy`
pub const DEFAULT_ENVIRONMENT: &str = "dev";
/// Default Helm release name
pub const DEFAULT_RELEASE_NAME: &str = "shorturl";
/// Default Kubernetes namespace
pub const DEFAULT_NAMESPACE: &str = "shorturl";
/// Default container repository for `deliver`
pub const DEFAULT_CONTAINER_REPOSITORY: &str = "ttl.sh";
/// Default Helm chart repository
pub const DEFAULT_HELM_REPOSITORY: &str = "oci://ttl.sh";
/// Default integration-test target host
pub const DEFAULT_TARGET_HOST: &str = "localhost";
/// Default integration-test target port
pub const DEFAULT_TARGET_PORT: &str = "8080";
/// Version used when the source has no `VERSION` file
pub const FALLBACK_VERSION: &str = "0.0.0";

/// Return `value` unless it is absent or blank, else `default`.
#[must_use]
pub fn resolve_or(value: Option<&str>, default: &str) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Unresolved deployment settings as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployConfig {
    /// Cloud region
    pub region: Option<String>,
    /// Environment name (dev, staging, prod, ...)
    pub environment: Option<String>,
}

/// Deployment settings after defaulting. Immutable for the rest of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDeployConfig {
    region: String,
    environment: String,
}

impl DeployConfig {
    /// Apply the fixed defaults.
    #[must_use]
    pub fn resolve(&self) -> ResolvedDeployConfig {
        ResolvedDeployConfig {
            region: resolve_or(self.region.as_deref(), DEFAULT_REGION),
            environment: resolve_or(self.environment.as_deref(), DEFAULT_ENVIRONMENT),
        }
    }
}

impl ResolvedDeployConfig {
    /// Resolved region
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Resolved environment name
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }
}

/// Unresolved Helm/cluster target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Helm chart repository URL
    pub helm_repository: Option<String>,
    /// Helm release name
    pub release_name: Option<String>,
    /// Kubernetes namespace
    pub namespace: Option<String>,
}

/// Cluster target after defaulting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClusterConfig {
    /// Helm chart repository URL
    pub helm_repository: String,
    /// Helm release name
    pub release_name: String,
    /// Kubernetes namespace
    pub namespace: String,
}

impl ClusterConfig {
    /// Apply the fixed defaults.
    #[must_use]
    pub fn resolve(&self) -> ResolvedClusterConfig {
        ResolvedClusterConfig {
            helm_repository: resolve_or(self.helm_repository.as_deref(), DEFAULT_HELM_REPOSITORY),
            release_name: resolve_or(self.release_name.as_deref(), DEFAULT_RELEASE_NAME),
            namespace: resolve_or(self.namespace.as_deref(), DEFAULT_NAMESPACE),
        }
    }
}

/// Read the release version from `<source>/VERSION`, appending `-rc` for
/// release candidates.
#[must_use]
pub fn release_version(source: &Path, release_candidate: bool) -> String {
    let base = std::fs::read_to_string(source.join("VERSION"))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| FALLBACK_VERSION.to_string());
    if release_candidate {
        format!("{base}-rc")
    } else {
        base
    }
}
