//! shorturl-ci - CI/CD pipeline for the URL-shortening service
//!
//! CLI entry point. Stage reports go to stdout, progress to stderr.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use shorturl_ci::cli::format_duration;
use shorturl_ci::deploy::{BuildArtifact, Credentials, DeployReport, DeployRequest};
use shorturl_ci::error::DeployError;
use shorturl_ci::log::{JsonlLogger, RunRecord};
use shorturl_ci::pipeline::{
    ClusterConfig, ClusterRequest, DeliverRequest, DeployConfig, PipelineConfig, RuntimeKind,
    Stage, StageContext, ValidateRequest,
};
use shorturl_ci::runtime::{
    CancelHandle, ContainerRuntime, DockerRuntime, LocalRuntime, SecretSource,
};

/// CI/CD pipeline for the URL-shortening service
///
/// Runs each stage in a short-lived container. `deploy` provisions the
/// infrastructure with init, plan, apply and output.
#[derive(Parser, Debug)]
#[command(name = "shorturl-ci", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to the shorturl-ci.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the run history (.shorturl-ci by default)
    #[arg(long, global = true, default_value = ".shorturl-ci")]
    log_dir: PathBuf,

    /// Cancel the stage after this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Override the runtime selected in the configuration file
    #[arg(long, global = true, value_enum)]
    runtime: Option<RuntimeArg>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum RuntimeArg {
    Docker,
    Local,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Package the function into an archive
    Build {
        /// Project source directory
        #[arg(long, default_value = ".")]
        source: PathBuf,
        /// Append -rc to the version
        #[arg(long)]
        release_candidate: bool,
        /// Where to write the archive
        #[arg(long, default_value = "lambda-deployment.tar.gz")]
        output: PathBuf,
    },
    /// Publish the container image and chart
    Deliver {
        /// Project source directory
        #[arg(long, default_value = ".")]
        source: PathBuf,
        /// Container repository (default: ttl.sh)
        #[arg(long)]
        container_repository: Option<String>,
        /// Helm chart repository (default: oci://ttl.sh)
        #[arg(long)]
        helm_repository: Option<String>,
        /// Archive produced by `build`
        #[arg(long)]
        artifact: Option<PathBuf>,
        /// Publish as release candidate
        #[arg(long)]
        release_candidate: bool,
    },
    /// Provision the infrastructure
    Deploy {
        /// Project source directory
        #[arg(long, default_value = ".")]
        source: PathBuf,
        /// Archive produced by `build`, extracted before planning
        #[arg(long)]
        artifact: Option<PathBuf>,
        /// Access key id source (env:NAME or file:PATH)
        #[arg(long, default_value = "env:AWS_ACCESS_KEY_ID")]
        aws_access_key_id: SecretSource,
        /// Secret access key source (env:NAME or file:PATH)
        #[arg(long, default_value = "env:AWS_SECRET_ACCESS_KEY")]
        aws_secret_access_key: SecretSource,
        /// Cloud region (default: us-east-1)
        #[arg(long)]
        region: Option<String>,
        /// Environment name (default: dev)
        #[arg(long)]
        environment: Option<String>,
    },
    /// Install the Helm release into a cluster
    DeployCluster {
        /// Project source directory
        #[arg(long, default_value = ".")]
        source: PathBuf,
        /// Kubeconfig source (env:NAME or file:PATH)
        #[arg(long)]
        kubeconfig: SecretSource,
        /// Helm chart repository (default: oci://ttl.sh)
        #[arg(long)]
        helm_repository: Option<String>,
        /// Release name (default: shorturl)
        #[arg(long)]
        release_name: Option<String>,
        /// Namespace (default: shorturl)
        #[arg(long)]
        namespace: Option<String>,
        /// Deploy the release candidate
        #[arg(long)]
        release_candidate: bool,
    },
    /// Run the unit tests
    UnitTest {
        /// Project source directory
        #[arg(long, default_value = ".")]
        source: PathBuf,
        /// Archive produced by `build`
        #[arg(long)]
        artifact: Option<PathBuf>,
    },
    /// Run the integration tests against a live endpoint
    IntegrationTest {
        /// Project source directory
        #[arg(long, default_value = ".")]
        source: PathBuf,
        /// Target host (default: localhost)
        #[arg(long)]
        target_host: Option<String>,
        /// Target port (default: 8080)
        #[arg(long)]
        target_port: Option<String>,
    },
    /// Check that a cluster release is healthy
    Validate {
        /// Project source directory
        #[arg(long, default_value = ".")]
        source: PathBuf,
        /// Kubeconfig source (env:NAME or file:PATH)
        #[arg(long)]
        kubeconfig: SecretSource,
        /// Release name (default: shorturl)
        #[arg(long)]
        release_name: Option<String>,
        /// Namespace (default: shorturl)
        #[arg(long)]
        namespace: Option<String>,
        /// Version the release should report (default: from VERSION)
        #[arg(long)]
        expected_version: Option<String>,
        /// Expect the release candidate
        #[arg(long)]
        release_candidate: bool,
    },
    /// Show recent runs from the run log
    History {
        /// Only runs of this stage (e.g. deploy)
        #[arg(long)]
        stage: Option<String>,
        /// Number of runs to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

impl Command {
    /// The pipeline stage this command runs, if any
    const fn stage(&self) -> Option<Stage> {
        match self {
            Self::Build { .. } => Some(Stage::Build),
            Self::Deliver { .. } => Some(Stage::Deliver),
            Self::Deploy { .. } => Some(Stage::Deploy),
            Self::DeployCluster { .. } => Some(Stage::DeployCluster),
            Self::UnitTest { .. } => Some(Stage::UnitTest),
            Self::IntegrationTest { .. } => Some(Stage::IntegrationTest),
            Self::Validate { .. } => Some(Stage::Validate),
            Self::History { .. } => None,
        }
    }
}

/// What a successful stage hands back to the CLI
#[derive(Debug)]
struct StageSuccess {
    report: String,
    deploy: Option<DeployReport>,
}

impl StageSuccess {
    const fn text(report: String) -> Self {
        Self {
            report,
            deploy: None,
        }
    }
}

/// Load the configuration. An explicit `--config` must exist; the default
/// path may be absent.
fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path, true),
        None => PipelineConfig::load("shorturl-ci.toml", false),
    }
}

fn select_runtime(
    config: &PipelineConfig,
    overridden: Option<RuntimeArg>,
) -> Arc<dyn ContainerRuntime> {
    let kind = match overridden {
        Some(RuntimeArg::Docker) => RuntimeKind::Docker,
        Some(RuntimeArg::Local) => RuntimeKind::Local,
        None => config.runtime.kind,
    };
    match kind {
        RuntimeKind::Docker => Arc::new(
            DockerRuntime::new(&config.runtime.engine).with_user(config.runtime.user.as_deref()),
        ),
        RuntimeKind::Local => Arc::new(LocalRuntime::new()),
    }
}

/// Fire `handle` on Ctrl-C or when `timeout` elapses.
fn spawn_cancel_watcher(handle: CancelHandle, timeout: Option<Duration>) {
    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => eprintln!("Interrupted, cancelling..."),
            () = deadline => eprintln!("Deadline reached, cancelling..."),
        }
        handle.cancel();
    });
}

fn load_artifact(path: Option<&Path>) -> Result<Option<BuildArtifact>> {
    path.map(BuildArtifact::load).transpose()
}

/// Resolve the command's inputs, then run its stage.
///
/// The outer error covers input preparation (unreadable artifact, missing
/// secret). The inner result is the stage's own outcome.
async fn execute(
    command: Command,
    ctx: &StageContext<dyn ContainerRuntime>,
    logger: &JsonlLogger,
) -> Result<Result<StageSuccess, DeployError>> {
    let outcome = match command {
        Command::Build {
            source,
            release_candidate,
            output,
        } => match ctx.build(&source, release_candidate).await {
            Ok(artifact) => {
                std::fs::write(&output, artifact.contents())
                    .with_context(|| format!("Failed to write artifact: {}", output.display()))?;
                Ok(StageSuccess::text(format!(
                    "Wrote {} ({} bytes)",
                    output.display(),
                    artifact.len()
                )))
            }
            Err(err) => Err(err),
        },
        Command::Deliver {
            source,
            container_repository,
            helm_repository,
            artifact,
            release_candidate,
        } => {
            let request = DeliverRequest {
                container_repository,
                helm_repository,
                artifact: load_artifact(artifact.as_deref())?,
                release_candidate,
            };
            ctx.deliver(&source, &request).await.map(StageSuccess::text)
        }
        Command::Deploy {
            source,
            artifact,
            aws_access_key_id,
            aws_secret_access_key,
            region,
            environment,
        } => {
            let request = DeployRequest {
                source,
                artifact: load_artifact(artifact.as_deref())?.into(),
                credentials: Credentials {
                    access_key_id: aws_access_key_id.resolve()?,
                    secret_access_key: aws_secret_access_key.resolve()?,
                },
                config: DeployConfig {
                    region,
                    environment,
                },
            };
            ctx.deploy(request).await.map(|report| StageSuccess {
                report: report.report.clone(),
                deploy: Some(report),
            })
        }
        Command::DeployCluster {
            source,
            kubeconfig,
            helm_repository,
            release_name,
            namespace,
            release_candidate,
        } => {
            let request = ClusterRequest {
                kubeconfig: kubeconfig.resolve()?,
                cluster: ClusterConfig {
                    helm_repository,
                    release_name,
                    namespace,
                },
                release_candidate,
            };
            ctx.deploy_cluster(&source, &request)
                .await
                .map(StageSuccess::text)
        }
        Command::UnitTest { source, artifact } => {
            let artifact = load_artifact(artifact.as_deref())?;
            ctx.unit_test(&source, artifact.as_ref())
                .await
                .map(StageSuccess::text)
        }
        Command::IntegrationTest {
            source,
            target_host,
            target_port,
        } => ctx
            .integration_test(&source, target_host.as_deref(), target_port.as_deref())
            .await
            .map(StageSuccess::text),
        Command::Validate {
            source,
            kubeconfig,
            release_name,
            namespace,
            expected_version,
            release_candidate,
        } => {
            let request = ValidateRequest {
                kubeconfig: kubeconfig.resolve()?,
                cluster: ClusterConfig {
                    helm_repository: None,
                    release_name,
                    namespace,
                },
                expected_version,
                release_candidate,
            };
            ctx.validate(&source, &request).await.map(StageSuccess::text)
        }
        Command::History { stage, limit } => {
            let records = logger.read_all().context("Failed to read run log")?;
            Ok(StageSuccess::text(render_history(
                &records,
                stage.as_deref(),
                limit,
            )))
        }
    };
    Ok(outcome)
}

/// One line per run, oldest first, keeping the last `limit` matches.
fn render_history(records: &[RunRecord], stage: Option<&str>, limit: usize) -> String {
    let matching: Vec<&RunRecord> = records
        .iter()
        .filter(|record| stage.is_none_or(|stage| record.stage == stage))
        .collect();
    if matching.is_empty() {
        return "No runs recorded".to_string();
    }
    let skip = matching.len().saturating_sub(limit);
    matching[skip..]
        .iter()
        .map(|record| {
            let status = if record.success {
                "ok".to_string()
            } else if record.cancelled {
                "cancelled".to_string()
            } else {
                match &record.failed_step {
                    Some(step) => format!("failed at {step}"),
                    None => "failed".to_string(),
                }
            };
            format!(
                "{}  {:<16} {:<8} {:>8}  {}",
                record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                record.stage,
                record.runtime,
                format_duration(Duration::from_millis(record.duration_ms)),
                status
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Label of the step that failed, for the run log
fn failed_step(err: &DeployError) -> Option<String> {
    match err {
        DeployError::Phase { phase, .. } => Some(phase.label().to_string()),
        DeployError::Stage { step, .. } => Some(step.clone()),
        DeployError::Cancelled { during } => Some(during.clone()),
        DeployError::Staging { .. } => Some("staging".to_string()),
        DeployError::Config(_) => None,
    }
}

/// Build a `RunRecord` for JSONL logging.
fn build_record(
    stage: Stage,
    runtime: &str,
    outcome: &Result<StageSuccess, DeployError>,
    duration: Duration,
) -> RunRecord {
    let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    let mut record = RunRecord::new(stage.label(), runtime, outcome.is_ok(), duration_ms);
    match outcome {
        Ok(success) => {
            if let Some(deploy) = &success.deploy {
                record.region = Some(deploy.config.region().to_string());
                record.environment = Some(deploy.config.environment().to_string());
                record.output_keys = deploy
                    .outputs
                    .as_ref()
                    .map(|outputs| outputs.keys())
                    .unwrap_or_default();
                record.states = deploy.trace.states().to_vec();
            }
        }
        Err(err) => {
            record.cancelled = err.is_cancelled();
            record.failed_step = failed_step(err);
        }
    }
    record
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    let timeout = cli.timeout.or(config.deploy.timeout_secs).map(Duration::from_secs);
    let runtime = select_runtime(&config, cli.runtime);
    let runtime_name = runtime.name().to_string();
    let logger = JsonlLogger::new(&cli.log_dir).context("Failed to initialize JSONL logger")?;

    let handle = CancelHandle::new();
    spawn_cancel_watcher(handle.clone(), timeout);
    let ctx = StageContext::new(runtime, config, handle.signal());

    let stage = cli.command.stage();
    let start = Instant::now();
    let outcome = execute(cli.command, &ctx, &logger).await?;

    if let Some(stage) = stage {
        let record = build_record(stage, &runtime_name, &outcome, start.elapsed());
        logger
            .append(&record)
            .context("Failed to write to JSONL log")?;
    }

    match outcome {
        Ok(success) => {
            // Reports are printed as captured; only add a missing final newline.
            if success.report.ends_with('\n') {
                print!("{}", success.report);
            } else {
                println!("{}", success.report);
            }
            Ok(())
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(err.exit_status());
        }
    }
}
