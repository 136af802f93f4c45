//! Execution environment for the infrastructure phases
//!
//! Pure assembly: nothing executes here and nothing can fail.

use crate::pipeline::defaults::ResolvedDeployConfig;
use crate::runtime::{ExecutionEnvironment, Secret, Workspace};

/// Working directory holding the infrastructure definitions
pub const INFRA_DIR: &str = "/workspace/terraform";

/// Variable names the credentials are bound under
pub const ACCESS_KEY_VAR: &str = "AWS_ACCESS_KEY_ID";
/// See `ACCESS_KEY_VAR`
pub const SECRET_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";

/// Cloud credentials for the provisioning path
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Access key id
    pub access_key_id: Secret,
    /// Secret access key
    pub secret_access_key: Secret,
}

/// Assemble the deploy environment.
///
/// Mounts the workspace, sets the working directory to the infrastructure
/// definitions, binds both credentials as secret variables and exposes
/// region and environment name to the provider and to the definitions
/// themselves (`TF_VAR_*`).
#[must_use]
pub fn build_environment(
    image: &str,
    workspace: Workspace,
    config: &ResolvedDeployConfig,
    credentials: &Credentials,
) -> ExecutionEnvironment {
    ExecutionEnvironment::from_image(image)
        .with_workspace(workspace)
        .with_workdir(INFRA_DIR)
        .with_secret_variable(ACCESS_KEY_VAR, &credentials.access_key_id)
        .with_secret_variable(SECRET_KEY_VAR, &credentials.secret_access_key)
        .with_env_variable("AWS_REGION", config.region())
        .with_env_variable("TF_VAR_aws_region", config.region())
        .with_env_variable("TF_VAR_environment", config.environment())
}
