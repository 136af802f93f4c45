//! Deployment state machine
//!
//! `Start → EnvironmentBuilt → (ArtifactStaged | ArtifactSkipped) →
//! Initialized → Planned → Applied → OutputsCollected → Done`, with `Failed`
//! reachable from any non-terminal state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A state of one deployment run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployState {
    /// Nothing has happened yet
    Start,
    /// The execution environment exists
    EnvironmentBuilt,
    /// A build artifact was extracted into the working tree
    ArtifactStaged,
    /// No artifact was supplied
    ArtifactSkipped,
    /// `initialize` succeeded
    Initialized,
    /// `plan` succeeded and the plan file exists
    Planned,
    /// `apply` succeeded
    Applied,
    /// `collect-outputs` succeeded
    OutputsCollected,
    /// The report was composed
    Done,
    /// A step failed or the run was cancelled
    Failed,
}

impl DeployState {
    /// Whether the state is terminal
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `next` is a legal successor of `self`
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Self::Failed) {
            return true;
        }
        matches!(
            (self, next),
            (Self::Start, Self::EnvironmentBuilt)
                | (Self::EnvironmentBuilt, Self::ArtifactStaged | Self::ArtifactSkipped)
                | (Self::ArtifactStaged | Self::ArtifactSkipped, Self::Initialized)
                | (Self::Initialized, Self::Planned)
                | (Self::Planned, Self::Applied)
                | (Self::Applied, Self::OutputsCollected)
                | (Self::OutputsCollected, Self::Done)
        )
    }

    /// Short label for display
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::EnvironmentBuilt => "environment-built",
            Self::ArtifactStaged => "artifact-staged",
            Self::ArtifactSkipped => "artifact-skipped",
            Self::Initialized => "initialized",
            Self::Planned => "planned",
            Self::Applied => "applied",
            Self::OutputsCollected => "outputs-collected",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ordered record of the states one run passed through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTrace {
    states: Vec<DeployState>,
}

impl DeployTrace {
    /// A trace positioned at `Start`
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: vec![DeployState::Start],
        }
    }

    /// Current state
    #[must_use]
    pub fn current(&self) -> DeployState {
        self.states.last().copied().unwrap_or(DeployState::Start)
    }

    /// Append `next`.
    ///
    /// Illegal transitions are a bug in the orchestrator, so they panic in
    /// debug builds.
    pub fn record(&mut self, next: DeployState) {
        debug_assert!(
            self.current().can_transition_to(next),
            "illegal transition {} -> {next}",
            self.current()
        );
        self.states.push(next);
    }

    /// All states, oldest first
    #[must_use]
    pub fn states(&self) -> &[DeployState] {
        &self.states
    }

    /// Render as `start → environment-built → ...`
    #[must_use]
    pub fn render(&self) -> String {
        self.states
            .iter()
            .map(|s| s.label())
            .collect::<Vec<_>>()
            .join(" → ")
    }
}

impl Default for DeployTrace {
    fn default() -> Self {
        Self::new()
    }
}
