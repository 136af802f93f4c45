//! Deploy orchestrator
//!
//! Provisions infrastructure for one deployment: resolve the configuration,
//! build an execution environment over a fresh copy of the source tree,
//! stage the build artifact if there is one, then run the IaC phases in
//! order and compose the report. The first failure ends the run.

pub mod environment;
pub mod phase;
pub mod report;
pub mod staging;
pub mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use environment::{build_environment, Credentials, INFRA_DIR};
pub use phase::{Phase, PhaseOutputs, PhaseResult, PhaseRunner, PlanFile};
pub use report::{compose_report, DeployOutputs};
pub use staging::{BuildArtifact, StagingInput, StagingOutcome};
pub use state::{DeployState, DeployTrace};

use crate::cli::display::StageDisplay;
use crate::error::DeployError;
use crate::pipeline::config::DeploySettings;
use crate::pipeline::defaults::{DeployConfig, ResolvedDeployConfig};
use crate::runtime::{CancelSignal, ContainerRuntime, Workspace};

/// Everything one deployment needs from its caller
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Project source tree (contains `terraform/`)
    pub source: PathBuf,
    /// Optional build artifact to stage first
    pub artifact: StagingInput,
    /// Cloud credentials
    pub credentials: Credentials,
    /// Region and environment, unresolved
    pub config: DeployConfig,
}

/// Result of a successful deployment
#[derive(Debug, Clone)]
pub struct DeployReport {
    /// Configuration the run used
    pub config: ResolvedDeployConfig,
    /// Apply output followed by the labelled outputs section
    pub report: String,
    /// Parsed outputs, if the capture was valid JSON
    pub outputs: Option<DeployOutputs>,
    /// States the run passed through
    pub trace: DeployTrace,
    /// Wall-clock duration of the run
    pub duration: Duration,
}

/// Drives deployments through a container runtime.
///
/// Holds no per-run state, so one orchestrator can serve any number of
/// concurrent deployments. Each run gets its own workspace.
pub struct Orchestrator<R: ContainerRuntime + ?Sized> {
    runtime: Arc<R>,
    image: String,
    settings: DeploySettings,
}

impl<R: ContainerRuntime + ?Sized> Orchestrator<R> {
    /// Create an orchestrator that runs phases in `image`.
    #[must_use]
    pub fn new(runtime: Arc<R>, image: &str, settings: DeploySettings) -> Self {
        Self {
            runtime,
            image: image.to_string(),
            settings,
        }
    }

    /// Run one deployment.
    pub async fn deploy(
        &self,
        request: DeployRequest,
        cancel: &CancelSignal,
    ) -> Result<DeployReport, DeployError> {
        let start = Instant::now();
        let display = StageDisplay::new("deploy");
        display.print_header(self.runtime.name());

        let mut trace = DeployTrace::new();
        match self.run(request, cancel, &display, &mut trace).await {
            Ok((config, phases)) => {
                let report = compose_report(&phases.apply.stdout, &phases.outputs.stdout);
                let outputs = DeployOutputs::parse(&phases.outputs.stdout);
                trace.record(DeployState::Done);
                let duration = start.elapsed();
                display.print_trace(&trace);
                display.print_summary(true, duration);
                Ok(DeployReport {
                    config,
                    report,
                    outputs,
                    trace,
                    duration,
                })
            }
            Err(err) => {
                trace.record(DeployState::Failed);
                display.print_trace(&trace);
                display.print_summary(false, start.elapsed());
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        request: DeployRequest,
        cancel: &CancelSignal,
        display: &StageDisplay,
        trace: &mut DeployTrace,
    ) -> Result<(ResolvedDeployConfig, PhaseOutputs), DeployError> {
        let config = request.config.resolve();
        display.info(&format!(
            "region {} | environment {}",
            config.region(),
            config.environment()
        ));

        let workspace = Workspace::prepare(&request.source)
            .map_err(|e| DeployError::Config(format!("{e:#}")))?;
        let env = build_environment(&self.image, workspace, &config, &request.credentials);
        trace.record(DeployState::EnvironmentBuilt);

        let (env, outcome) =
            staging::stage(&*self.runtime, env, request.artifact, cancel, display).await?;
        trace.record(match outcome {
            StagingOutcome::Staged => DeployState::ArtifactStaged,
            StagingOutcome::Skipped => DeployState::ArtifactSkipped,
        });

        let runner = PhaseRunner::new(
            &*self.runtime,
            cancel,
            display,
            &self.settings.iac_binary,
            &self.settings.plan_file,
            env,
        );
        let phases = runner.run_sequence(trace).await?;
        Ok((config, phases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{CancelHandle, Secret};
    use crate::testutil::{source_tree, FakeRuntime, Response, SAMPLE_OUTPUTS};

    const APPLY_OUTPUT: &str = "Apply complete! Resources: 1 added, 0 changed, 0 destroyed.";

    fn request(source: &tempfile::TempDir) -> DeployRequest {
        DeployRequest {
            source: source.path().to_path_buf(),
            artifact: StagingInput::NoArtifact,
            credentials: Credentials {
                access_key_id: Secret::new("AKIAEXAMPLE"),
                secret_access_key: Secret::new("wJalrXUtnFEMI"),
            },
            config: DeployConfig {
                region: Some(String::new()),
                environment: Some(String::new()),
            },
        }
    }

    fn orchestrator(runtime: &Arc<FakeRuntime>) -> Orchestrator<FakeRuntime> {
        Orchestrator::new(
            Arc::clone(runtime),
            "ghcr.io/opentofu/opentofu:latest",
            DeploySettings::default(),
        )
    }

    #[tokio::test]
    async fn test_deploy_without_artifact_uses_defaults() {
        let source = source_tree();
        let runtime = Arc::new(FakeRuntime::new());

        let report = orchestrator(&runtime)
            .deploy(request(&source), &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(report.config.region(), "us-east-1");
        assert_eq!(report.config.environment(), "dev");
        assert_eq!(runtime.subcommands(), vec!["init", "plan", "apply", "output"]);
        assert_eq!(
            report.report,
            format!("{APPLY_OUTPUT}\n\nOutputs:\n{SAMPLE_OUTPUTS}")
        );
        assert_eq!(report.outputs.unwrap().keys(), vec!["api_url"]);
        assert_eq!(
            report.trace.render(),
            "start → environment-built → artifact-skipped → initialized → planned → applied → outputs-collected → done"
        );
    }

    #[tokio::test]
    async fn test_phases_see_resolved_config_and_secrets() {
        let source = source_tree();
        let runtime = Arc::new(FakeRuntime::new());
        let mut req = request(&source);
        req.config = DeployConfig {
            region: Some("eu-west-1".to_string()),
            environment: Some("prod".to_string()),
        };

        orchestrator(&runtime)
            .deploy(req, &CancelSignal::never())
            .await
            .unwrap();

        for call in runtime.calls() {
            assert_eq!(call.image, "ghcr.io/opentofu/opentofu:latest");
            assert_eq!(call.workdir, INFRA_DIR);
            assert_eq!(call.env["AWS_REGION"], "eu-west-1");
            assert_eq!(call.env["TF_VAR_aws_region"], "eu-west-1");
            assert_eq!(call.env["TF_VAR_environment"], "prod");
            assert_eq!(
                call.secret_names,
                vec!["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"]
            );
            assert!(!call.argv.iter().any(|a| a.contains("AKIAEXAMPLE")));
        }
    }

    #[tokio::test]
    async fn test_apply_uses_plan_file_from_plan() {
        let source = source_tree();
        let runtime = Arc::new(FakeRuntime::new());

        orchestrator(&runtime)
            .deploy(request(&source), &CancelSignal::never())
            .await
            .unwrap();

        let calls = runtime.calls();
        assert!(calls[1].argv.contains(&"-out=tfplan".to_string()));
        assert_eq!(calls[2].argv.last().map(String::as_str), Some("tfplan"));
    }

    #[tokio::test]
    async fn test_artifact_is_staged_before_initialize() {
        let source = source_tree();
        let runtime = Arc::new(FakeRuntime::new());
        let mut req = request(&source);
        req.artifact = StagingInput::Artifact(BuildArtifact::new(
            "lambda-deployment.tar.gz",
            b"archive".to_vec(),
        ));

        let report = orchestrator(&runtime)
            .deploy(req, &CancelSignal::never())
            .await
            .unwrap();

        let calls = runtime.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[0].argv[0], "sh");
        assert_eq!(calls[1].argv[1], "init");
        assert_eq!(report.trace.states()[2], DeployState::ArtifactStaged);
    }

    #[tokio::test]
    async fn test_plan_failure_stops_sequence() {
        let source = source_tree();
        let runtime = Arc::new(FakeRuntime::new().respond(
            "plan",
            Response::Fail {
                exit_code: 1,
                stdout: "Planning...".to_string(),
                stderr: "Error: Invalid provider configuration".to_string(),
            },
        ));

        let err = orchestrator(&runtime)
            .deploy(request(&source), &CancelSignal::never())
            .await
            .unwrap_err();

        assert_eq!(err.phase(), Some(Phase::Plan));
        let message = err.to_string();
        assert!(
            message.contains("Invalid provider configuration"),
            "Expected plan diagnostic, got: {message}"
        );
        assert_eq!(runtime.subcommands(), vec!["init", "plan"]);
    }

    #[tokio::test]
    async fn test_cancel_during_apply_skips_outputs() {
        let source = source_tree();
        let handle = CancelHandle::new();
        let runtime =
            Arc::new(FakeRuntime::new().respond("apply", Response::CancelDuring(handle.clone())));

        let err = orchestrator(&runtime)
            .deploy(request(&source), &handle.signal())
            .await
            .unwrap_err();

        assert!(err.is_cancelled(), "Expected cancellation, got: {err}");
        assert_eq!(err.to_string(), "cancelled during apply");
        assert_eq!(runtime.subcommands(), vec!["init", "plan", "apply"]);
    }

    #[tokio::test]
    async fn test_already_cancelled_runs_nothing() {
        let source = source_tree();
        let runtime = Arc::new(FakeRuntime::new());
        let handle = CancelHandle::new();
        handle.cancel();

        let err = orchestrator(&runtime)
            .deploy(request(&source), &handle.signal())
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_staging_failure_runs_no_phase() {
        let source = source_tree();
        let runtime = Arc::new(FakeRuntime::new().respond(
            "sh",
            Response::Fail {
                exit_code: 2,
                stdout: String::new(),
                stderr: "tar: invalid magic".to_string(),
            },
        ));
        let mut req = request(&source);
        req.artifact = StagingInput::Artifact(BuildArtifact::new("a.tar.gz", b"x".to_vec()));

        let err = orchestrator(&runtime)
            .deploy(req, &CancelSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Staging { .. }), "got: {err:?}");
        assert_eq!(runtime.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_source_is_config_error() {
        let runtime = Arc::new(FakeRuntime::new());
        let source = source_tree();
        let mut req = request(&source);
        req.source = PathBuf::from("/nonexistent/shorturl");

        let err = orchestrator(&runtime)
            .deploy(req, &CancelSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Config(_)), "got: {err:?}");
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_deployments_do_not_share_workspaces() {
        let source = source_tree();
        let runtime = Arc::new(FakeRuntime::new());
        let orchestrator = orchestrator(&runtime);

        let mut dev = request(&source);
        dev.config.environment = Some("dev".to_string());
        let mut prod = request(&source);
        prod.config.environment = Some("prod".to_string());

        let never = CancelSignal::never();
        let (a, b) = tokio::join!(
            orchestrator.deploy(dev, &never),
            orchestrator.deploy(prod, &never)
        );
        assert_eq!(a.unwrap().config.environment(), "dev");
        assert_eq!(b.unwrap().config.environment(), "prod");
        assert_eq!(runtime.calls().len(), 8);
    }
}
