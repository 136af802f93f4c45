//! Pipeline stages
//!
//! Every stage builds a fresh execution environment, runs one or a few
//! commands in it and returns the captured stdout. `deploy` hands off to
//! the orchestrator.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::cli::display::StageDisplay;
use crate::deploy::{BuildArtifact, DeployReport, DeployRequest, Orchestrator};
use crate::error::{DeployError, RuntimeError};
use crate::runtime::{
    CancelSignal, ContainerRuntime, ExecutionEnvironment, Secret, Workspace, MOUNT_POINT,
};

use super::config::PipelineConfig;
use super::defaults::{
    release_version, resolve_or, ClusterConfig, DEFAULT_CONTAINER_REPOSITORY, DEFAULT_TARGET_HOST,
    DEFAULT_TARGET_PORT,
};

/// Where `build` leaves the packaged archive, relative to the workspace
pub const BUILD_OUTPUT: &str = "dist/lambda-deployment.tar.gz";
/// Variable carrying the release version into the build
pub const VERSION_VAR: &str = "SHORTURL_VERSION";
/// Variable carrying the cluster credentials
pub const KUBECONFIG_VAR: &str = "KUBECONFIG_DATA";

/// A pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Package the function
    Build,
    /// Publish packages
    Deliver,
    /// Provision infrastructure
    Deploy,
    /// Helm release into a cluster
    DeployCluster,
    /// Run the unit test script
    UnitTest,
    /// Run the integration test script against a live endpoint
    IntegrationTest,
    /// Check a cluster release
    Validate,
}

impl Stage {
    /// Label used in the display, errors and the run log
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Deliver => "deliver",
            Self::Deploy => "deploy",
            Self::DeployCluster => "deploy-cluster",
            Self::UnitTest => "unit-test",
            Self::IntegrationTest => "integration-test",
            Self::Validate => "validate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Parameters of `deliver`
#[derive(Debug, Clone, Default)]
pub struct DeliverRequest {
    /// Container repository (default `ttl.sh`)
    pub container_repository: Option<String>,
    /// Helm chart repository (default `oci://ttl.sh`)
    pub helm_repository: Option<String>,
    /// Previously built archive
    pub artifact: Option<BuildArtifact>,
    /// Tag the release as a candidate
    pub release_candidate: bool,
}

/// Parameters of `deploy-cluster`
#[derive(Debug, Clone)]
pub struct ClusterRequest {
    /// Cluster credentials
    pub kubeconfig: Secret,
    /// Helm repository, release name and namespace
    pub cluster: ClusterConfig,
    /// Deploy the release candidate
    pub release_candidate: bool,
}

/// Parameters of `validate`
#[derive(Debug, Clone)]
pub struct ValidateRequest {
    /// Cluster credentials
    pub kubeconfig: Secret,
    /// Release name and namespace
    pub cluster: ClusterConfig,
    /// Version the release should report (default: from `VERSION`)
    pub expected_version: Option<String>,
    /// Expect the release candidate
    pub release_candidate: bool,
}

/// Shared dependencies of every stage
pub struct StageContext<R: ContainerRuntime + ?Sized> {
    runtime: Arc<R>,
    config: PipelineConfig,
    cancel: CancelSignal,
}

impl<R: ContainerRuntime + ?Sized> StageContext<R> {
    /// Create a context running stages through `runtime`.
    #[must_use]
    pub const fn new(runtime: Arc<R>, config: PipelineConfig, cancel: CancelSignal) -> Self {
        Self {
            runtime,
            config,
            cancel,
        }
    }

    /// Name of the runtime executing stage commands
    #[must_use]
    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    /// Install dependencies, syntax-check and package the function.
    pub async fn build(
        &self,
        source: &Path,
        release_candidate: bool,
    ) -> Result<BuildArtifact, DeployError> {
        let (display, start) = self.begin(Stage::Build);
        let result: Result<BuildArtifact, DeployError> = async {
            let version = release_version(source, release_candidate);
            display.info(&format!("version {version}"));
            let env = self
                .source_environment(&self.config.images.node, source)?
                .with_env_variable(VERSION_VAR, &version);

            let steps: [(&str, &str); 3] = [
                (
                    "install",
                    "if [ -f lambda/package.json ]; then cd lambda && npm install --omit=dev; fi",
                ),
                ("syntax-check", "node --check lambda/index.js"),
                (
                    "package",
                    "mkdir -p dist && tar -czf dist/lambda-deployment.tar.gz lambda",
                ),
            ];
            for (step, script) in steps {
                self.run_step(&display, Stage::Build, step, &env, shell(script))
                    .await?;
            }

            let archive = env
                .host_path(&format!("{MOUNT_POINT}/{BUILD_OUTPUT}"))
                .ok_or_else(|| DeployError::Config("build has no workspace".to_string()))?;
            let contents = std::fs::read(&archive).map_err(|e| DeployError::Stage {
                stage: Stage::Build.to_string(),
                step: "package".to_string(),
                exit_code: None,
                output: format!("{BUILD_OUTPUT} was not produced: {e}"),
            })?;
            display.info(&format!("packaged {} bytes", contents.len()));
            Ok(BuildArtifact::new("lambda-deployment.tar.gz", contents))
        }
        .await;
        Self::finish(&display, start, &result);
        result
    }

    /// Publish the container image and chart. Nothing is published yet.
    pub async fn deliver(
        &self,
        source: &Path,
        request: &DeliverRequest,
    ) -> Result<String, DeployError> {
        let (display, start) = self.begin(Stage::Deliver);
        let result = async {
            let container_repository = resolve_or(
                request.container_repository.as_deref(),
                DEFAULT_CONTAINER_REPOSITORY,
            );
            let cluster = ClusterConfig {
                helm_repository: request.helm_repository.clone(),
                ..ClusterConfig::default()
            }
            .resolve();
            display.info(&format!(
                "version {} | containers {container_repository} | charts {}",
                release_version(source, request.release_candidate),
                cluster.helm_repository
            ));
            if let Some(artifact) = &request.artifact {
                display.info(&format!("artifact {} ({} bytes)", artifact.name(), artifact.len()));
            }

            let env = ExecutionEnvironment::from_image(&self.config.images.alpine);
            let argv = vec![
                "echo".to_string(),
                "There are no packages to be delivered.".to_string(),
            ];
            self.run_step(&display, Stage::Deliver, "publish", &env, argv)
                .await
        }
        .await;
        Self::finish(&display, start, &result);
        result
    }

    /// Provision infrastructure through the deploy orchestrator.
    pub async fn deploy(&self, request: DeployRequest) -> Result<DeployReport, DeployError> {
        Orchestrator::new(
            Arc::clone(&self.runtime),
            &self.config.images.infra,
            self.config.deploy.clone(),
        )
        .deploy(request, &self.cancel)
        .await
    }

    /// Install the Helm release. Placeholder until the chart exists.
    pub async fn deploy_cluster(
        &self,
        source: &Path,
        request: &ClusterRequest,
    ) -> Result<String, DeployError> {
        let (display, start) = self.begin(Stage::DeployCluster);
        let result = async {
            let cluster = request.cluster.resolve();
            let version = release_version(source, request.release_candidate);
            let env = ExecutionEnvironment::from_image(&self.config.images.alpine)
                .with_secret_variable(KUBECONFIG_VAR, &request.kubeconfig);
            let argv = vec![
                "echo".to_string(),
                format!(
                    "Would deploy release '{}' version {version} to namespace '{}' from {}",
                    cluster.release_name, cluster.namespace, cluster.helm_repository
                ),
            ];
            self.run_step(&display, Stage::DeployCluster, "helm-upgrade", &env, argv)
                .await
        }
        .await;
        Self::finish(&display, start, &result);
        result
    }

    /// Run `tests/run-unit-tests.sh`.
    ///
    /// The artifact is accepted so callers can chain `build` into it; the
    /// tests run against the source tree.
    pub async fn unit_test(
        &self,
        source: &Path,
        artifact: Option<&BuildArtifact>,
    ) -> Result<String, DeployError> {
        let (display, start) = self.begin(Stage::UnitTest);
        let result = async {
            if let Some(artifact) = artifact {
                display.info(&format!("artifact {} not staged", artifact.name()));
            }
            let env = self.source_environment(&self.config.images.node, source)?;
            let argv = vec!["bash".to_string(), "tests/run-unit-tests.sh".to_string()];
            self.run_step(&display, Stage::UnitTest, "unit-tests", &env, argv)
                .await
        }
        .await;
        Self::finish(&display, start, &result);
        result
    }

    /// Run `tests/run-integration-tests.sh` against `http://host:port`.
    pub async fn integration_test(
        &self,
        source: &Path,
        host: Option<&str>,
        port: Option<&str>,
    ) -> Result<String, DeployError> {
        let (display, start) = self.begin(Stage::IntegrationTest);
        let result = async {
            let url = format!(
                "http://{}:{}",
                resolve_or(host, DEFAULT_TARGET_HOST),
                resolve_or(port, DEFAULT_TARGET_PORT)
            );
            display.info(&format!("target {url}"));
            let env = self.source_environment(&self.config.images.curl, source)?;
            // Each exec is a fresh container, so the shell is installed in
            // the same invocation that runs the script.
            let argv = vec![
                "sh".to_string(),
                "-c".to_string(),
                "apk add --no-cache bash && exec bash tests/run-integration-tests.sh \"$0\""
                    .to_string(),
                url,
            ];
            self.run_step(&display, Stage::IntegrationTest, "integration-tests", &env, argv)
                .await
        }
        .await;
        Self::finish(&display, start, &result);
        result
    }

    /// Check that the release is healthy. Placeholder until the chart exists.
    pub async fn validate(
        &self,
        source: &Path,
        request: &ValidateRequest,
    ) -> Result<String, DeployError> {
        let (display, start) = self.begin(Stage::Validate);
        let result = async {
            let cluster = request.cluster.resolve();
            let expected = resolve_or(
                request.expected_version.as_deref(),
                &release_version(source, request.release_candidate),
            );
            display.info(&format!(
                "release '{}' in '{}' expecting {expected}",
                cluster.release_name, cluster.namespace
            ));
            let env = ExecutionEnvironment::from_image(&self.config.images.alpine)
                .with_secret_variable(KUBECONFIG_VAR, &request.kubeconfig);
            let argv = vec![
                "echo".to_string(),
                "this is the Validate function".to_string(),
            ];
            self.run_step(&display, Stage::Validate, "validate", &env, argv)
                .await
        }
        .await;
        Self::finish(&display, start, &result);
        result
    }

    fn begin(&self, stage: Stage) -> (StageDisplay, Instant) {
        let display = StageDisplay::new(stage.label());
        display.print_header(self.runtime.name());
        (display, Instant::now())
    }

    fn finish<T>(display: &StageDisplay, start: Instant, result: &Result<T, DeployError>) {
        if let Err(err) = result {
            display.info(&err.to_string());
        }
        display.print_summary(result.is_ok(), start.elapsed());
    }

    fn source_environment(
        &self,
        image: &str,
        source: &Path,
    ) -> Result<ExecutionEnvironment, DeployError> {
        let workspace =
            Workspace::prepare(source).map_err(|e| DeployError::Config(format!("{e:#}")))?;
        Ok(ExecutionEnvironment::from_image(image).with_workspace(workspace))
    }

    async fn run_step(
        &self,
        display: &StageDisplay,
        stage: Stage,
        step: &str,
        env: &ExecutionEnvironment,
        argv: Vec<String>,
    ) -> Result<String, DeployError> {
        if self.cancel.is_cancelled() {
            return Err(DeployError::Cancelled {
                during: step.to_string(),
            });
        }

        display.step_started(&format!("Running {step}..."));
        let step_start = Instant::now();
        let result = self.runtime.exec(env, &argv, &self.cancel).await;
        let success = matches!(&result, Ok(output) if output.success());
        display.step_finished(step, step_start.elapsed(), success);

        let stage_error = |exit_code: Option<i32>, output: String| DeployError::Stage {
            stage: stage.to_string(),
            step: step.to_string(),
            exit_code,
            output,
        };
        match result {
            Ok(output) if output.success() => Ok(output.stdout),
            Ok(output) => Err(stage_error(output.exit_code, output.diagnostic())),
            Err(RuntimeError::Cancelled) => Err(DeployError::Cancelled {
                during: step.to_string(),
            }),
            Err(err) => Err(stage_error(None, err.to_string())),
        }
    }
}

fn shell(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}
