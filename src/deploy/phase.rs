//! Infrastructure phase runner
//!
//! Runs the fixed phase sequence `initialize → plan → apply →
//! collect-outputs` against one execution environment. Each phase is a
//! single IaC command. The first failure stops the sequence.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::state::{DeployState, DeployTrace};
use crate::cli::display::StageDisplay;
use crate::error::{DeployError, RuntimeError};
use crate::runtime::{CancelSignal, ContainerRuntime, ExecutionEnvironment};

/// One step of the infrastructure workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Prepare the working directory (`init`)
    Initialize,
    /// Compute and persist a change set (`plan -out`)
    Plan,
    /// Execute the persisted change set (`apply <planfile>`)
    Apply,
    /// Read structured outputs (`output -json`)
    CollectOutputs,
}

impl Phase {
    /// All phases, in execution order
    pub const ALL: [Self; 4] = [Self::Initialize, Self::Plan, Self::Apply, Self::CollectOutputs];

    /// Short label used in errors, logs and traces
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::CollectOutputs => "collect-outputs",
        }
    }

    /// Progress line shown when the phase starts
    #[must_use]
    pub const fn progress_message(self) -> &'static str {
        match self {
            Self::Initialize => "Initializing infrastructure workspace...",
            Self::Plan => "Planning deployment...",
            Self::Apply => "Applying configuration...",
            Self::CollectOutputs => "Retrieving deployment outputs...",
        }
    }

    /// State reached when the phase succeeds
    #[must_use]
    pub const fn completed_state(self) -> DeployState {
        match self {
            Self::Initialize => DeployState::Initialized,
            Self::Plan => DeployState::Planned,
            Self::Apply => DeployState::Applied,
            Self::CollectOutputs => DeployState::OutputsCollected,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The change set written by `plan`. Consumed by `apply`.
///
/// Not `Clone`: only the plan phase creates one, and apply takes it by value,
/// so apply can only ever run the plan computed just before it.
#[derive(Debug, PartialEq, Eq)]
pub struct PlanFile {
    name: String,
}

impl PlanFile {
    /// File name relative to the working directory
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Captured output of one successful phase
#[derive(Debug, Clone)]
pub struct PhaseResult {
    /// Phase that produced this output
    pub phase: Phase,
    /// Captured stdout
    pub stdout: String,
}

/// Captures the sequence needs to compose a report
#[derive(Debug, Clone)]
pub struct PhaseOutputs {
    /// Output of `apply`
    pub apply: PhaseResult,
    /// Output of `collect-outputs`
    pub outputs: PhaseResult,
}

/// Build the IaC argv for `phase`.
#[must_use]
pub fn phase_command(iac_binary: &str, phase: Phase, plan_file: &str) -> Vec<String> {
    let args: &[&str] = match phase {
        Phase::Initialize => &["init", "-input=false"],
        Phase::Plan => &["plan", "-input=false"],
        Phase::Apply => &["apply", "-input=false", "-auto-approve"],
        Phase::CollectOutputs => &["output", "-json"],
    };
    let mut argv = vec![iac_binary.to_string()];
    argv.extend(args.iter().map(ToString::to_string));
    match phase {
        Phase::Plan => argv.push(format!("-out={plan_file}")),
        Phase::Apply => argv.push(plan_file.to_string()),
        Phase::Initialize | Phase::CollectOutputs => {}
    }
    argv
}

/// Runs phases against an environment it owns.
pub struct PhaseRunner<'a, R: ContainerRuntime + ?Sized> {
    runtime: &'a R,
    cancel: &'a CancelSignal,
    display: &'a StageDisplay,
    iac_binary: &'a str,
    plan_file: &'a str,
    env: ExecutionEnvironment,
}

impl<'a, R: ContainerRuntime + ?Sized> PhaseRunner<'a, R> {
    /// Create a runner for `env`.
    #[must_use]
    pub const fn new(
        runtime: &'a R,
        cancel: &'a CancelSignal,
        display: &'a StageDisplay,
        iac_binary: &'a str,
        plan_file: &'a str,
        env: ExecutionEnvironment,
    ) -> Self {
        Self {
            runtime,
            cancel,
            display,
            iac_binary,
            plan_file,
            env,
        }
    }

    /// Run the full sequence, recording each transition in `trace`.
    pub async fn run_sequence(
        self,
        trace: &mut DeployTrace,
    ) -> Result<PhaseOutputs, DeployError> {
        self.run(Phase::Initialize).await?;
        trace.record(Phase::Initialize.completed_state());

        let plan = self.plan().await?;
        trace.record(Phase::Plan.completed_state());

        let apply = self.apply(plan).await?;
        trace.record(Phase::Apply.completed_state());

        let outputs = self.run(Phase::CollectOutputs).await?;
        trace.record(Phase::CollectOutputs.completed_state());

        Ok(PhaseOutputs { apply, outputs })
    }

    async fn plan(&self) -> Result<PlanFile, DeployError> {
        self.run(Phase::Plan).await?;
        Ok(PlanFile {
            name: self.plan_file.to_string(),
        })
    }

    async fn apply(&self, plan: PlanFile) -> Result<PhaseResult, DeployError> {
        let argv = phase_command(self.iac_binary, Phase::Apply, plan.name());
        self.execute(Phase::Apply, &argv).await
    }

    async fn run(&self, phase: Phase) -> Result<PhaseResult, DeployError> {
        let argv = phase_command(self.iac_binary, phase, self.plan_file);
        self.execute(phase, &argv).await
    }

    async fn execute(&self, phase: Phase, argv: &[String]) -> Result<PhaseResult, DeployError> {
        if self.cancel.is_cancelled() {
            return Err(DeployError::Cancelled {
                during: phase.label().to_string(),
            });
        }

        self.display.step_started(phase.progress_message());
        let start = Instant::now();

        let output = match self.runtime.exec(&self.env, argv, self.cancel).await {
            Ok(output) => output,
            Err(RuntimeError::Cancelled) => {
                self.display.step_finished(phase.label(), start.elapsed(), false);
                return Err(DeployError::Cancelled {
                    during: phase.label().to_string(),
                });
            }
            Err(err) => {
                self.display.step_finished(phase.label(), start.elapsed(), false);
                return Err(DeployError::Phase {
                    phase,
                    exit_code: None,
                    output: err.to_string(),
                });
            }
        };

        self.display
            .step_finished(phase.label(), start.elapsed(), output.success());

        if !output.success() {
            return Err(DeployError::Phase {
                phase,
                exit_code: output.exit_code,
                output: output.diagnostic(),
            });
        }

        Ok(PhaseResult {
            phase,
            stdout: output.stdout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{CancelHandle, Workspace};
    use crate::testutil::{source_tree, FakeRuntime, Response};

    fn env_for(source: &tempfile::TempDir) -> ExecutionEnvironment {
        ExecutionEnvironment::from_image("ghcr.io/opentofu/opentofu:latest")
            .with_workspace(Workspace::prepare(source.path()).unwrap())
            .with_workdir("/workspace/terraform")
    }

    fn staged_trace() -> DeployTrace {
        let mut trace = DeployTrace::new();
        trace.record(DeployState::EnvironmentBuilt);
        trace.record(DeployState::ArtifactSkipped);
        trace
    }

    #[test]
    fn test_phase_labels() {
        let labels: Vec<&str> = Phase::ALL.iter().map(|p| p.label()).collect();
        assert_eq!(labels, vec!["initialize", "plan", "apply", "collect-outputs"]);
        assert_eq!(Phase::CollectOutputs.to_string(), "collect-outputs");
    }

    #[test]
    fn test_phase_serializes_kebab_case() {
        let json = serde_json::to_string(&Phase::CollectOutputs).unwrap();
        assert_eq!(json, "\"collect-outputs\"");
    }

    #[test]
    fn test_phase_commands() {
        assert_eq!(
            phase_command("tofu", Phase::Initialize, "tfplan"),
            vec!["tofu", "init", "-input=false"]
        );
        assert_eq!(
            phase_command("tofu", Phase::Plan, "tfplan"),
            vec!["tofu", "plan", "-input=false", "-out=tfplan"]
        );
        assert_eq!(
            phase_command("tofu", Phase::Apply, "tfplan"),
            vec!["tofu", "apply", "-input=false", "-auto-approve", "tfplan"]
        );
        assert_eq!(
            phase_command("terraform", Phase::CollectOutputs, "tfplan"),
            vec!["terraform", "output", "-json"]
        );
    }

    #[tokio::test]
    async fn test_run_sequence_executes_phases_in_order() {
        let source = source_tree();
        let runtime = FakeRuntime::new();
        let display = StageDisplay::new("deploy");
        let cancel = CancelSignal::never();
        let runner = PhaseRunner::new(&runtime, &cancel, &display, "tofu", "tfplan", env_for(&source));
        let mut trace = staged_trace();

        let outputs = runner.run_sequence(&mut trace).await.unwrap();

        assert_eq!(runtime.subcommands(), vec!["init", "plan", "apply", "output"]);
        assert_eq!(outputs.apply.phase, Phase::Apply);
        assert_eq!(outputs.outputs.phase, Phase::CollectOutputs);
        assert_eq!(
            trace.states(),
            &[
                DeployState::Start,
                DeployState::EnvironmentBuilt,
                DeployState::ArtifactSkipped,
                DeployState::Initialized,
                DeployState::Planned,
                DeployState::Applied,
                DeployState::OutputsCollected,
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_uses_plan_file_written_by_plan() {
        let source = source_tree();
        let runtime = FakeRuntime::new();
        let display = StageDisplay::new("deploy");
        let cancel = CancelSignal::never();
        let runner = PhaseRunner::new(&runtime, &cancel, &display, "tofu", "release.plan", env_for(&source));

        runner.run_sequence(&mut staged_trace()).await.unwrap();

        let calls = runtime.calls();
        assert!(calls[1].argv.contains(&"-out=release.plan".to_string()));
        assert_eq!(calls[2].argv.last().unwrap(), "release.plan");
    }

    #[tokio::test]
    async fn test_failing_phase_stops_sequence() {
        let source = source_tree();
        let runtime = FakeRuntime::new().respond(
            "init",
            Response::Fail {
                exit_code: 1,
                stdout: String::new(),
                stderr: "Error: backend not configured".to_string(),
            },
        );
        let display = StageDisplay::new("deploy");
        let cancel = CancelSignal::never();
        let runner = PhaseRunner::new(&runtime, &cancel, &display, "tofu", "tfplan", env_for(&source));
        let mut trace = staged_trace();

        let err = runner.run_sequence(&mut trace).await.unwrap_err();

        assert_eq!(err.phase(), Some(Phase::Initialize));
        assert!(err.to_string().contains("backend not configured"));
        assert_eq!(runtime.subcommands(), vec!["init"]);
        assert_eq!(trace.current(), DeployState::ArtifactSkipped);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_phase_error_without_exit_code() {
        let source = source_tree();
        let runtime = FakeRuntime::new().respond("plan", Response::SpawnError);
        let display = StageDisplay::new("deploy");
        let cancel = CancelSignal::never();
        let runner = PhaseRunner::new(&runtime, &cancel, &display, "tofu", "tfplan", env_for(&source));

        let err = runner.run_sequence(&mut staged_trace()).await.unwrap_err();
        match err {
            DeployError::Phase { phase, exit_code, .. } => {
                assert_eq!(phase, Phase::Plan);
                assert_eq!(exit_code, None);
            }
            other => panic!("expected phase error, got {other:?}"),
        }
        assert_eq!(runtime.subcommands(), vec!["init", "plan"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let source = source_tree();
        let runtime = FakeRuntime::new();
        let display = StageDisplay::new("deploy");
        let handle = CancelHandle::new();
        handle.cancel();
        let cancel = handle.signal();
        let runner = PhaseRunner::new(&runtime, &cancel, &display, "tofu", "tfplan", env_for(&source));

        let err = runner.run_sequence(&mut staged_trace()).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(runtime.calls().is_empty());
    }
}
