use serde::Serialize;
use std::fmt;

/// Operational state of an environment, computed on every query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentState {
    Uninitialized,
    Initialized,
    Built,
    Running,
    Stopped,
}

impl EnvironmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentState::Uninitialized => "uninitialized",
            EnvironmentState::Initialized => "initialized",
            EnvironmentState::Built => "built",
            EnvironmentState::Running => "running",
            EnvironmentState::Stopped => "stopped",
        }
    }

    /// Next step an operator would usually take from here
    pub fn hint(&self) -> &'static str {
        match self {
            EnvironmentState::Uninitialized => "no project selected; pass --project or set SBX_PROJECT",
            EnvironmentState::Initialized => "nothing generated yet; run `sbx deploy`",
            EnvironmentState::Built => "configuration generated but no containers; run `sbx deploy` to start",
            EnvironmentState::Running => "environment is up",
            EnvironmentState::Stopped => "containers exist but none are running",
        }
    }
}

impl fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimal container view the detector needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub name: String,
    pub state: String,
}

impl ContainerState {
    pub fn new(name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: state.into(),
        }
    }

    fn is_running(&self) -> bool {
        self.state.trim().eq_ignore_ascii_case("running")
    }
}

/// Classify an environment.
///
/// Checks run in a fixed order; any container outranks generated artifacts,
/// so a stopped stack reads `Stopped` even after a build.
pub fn detect(context_valid: bool, containers: &[ContainerState], has_artifacts: bool) -> EnvironmentState {
    if !context_valid {
        return EnvironmentState::Uninitialized;
    }
    if containers.iter().any(ContainerState::is_running) {
        return EnvironmentState::Running;
    }
    if !containers.is_empty() {
        return EnvironmentState::Stopped;
    }
    if has_artifacts {
        return EnvironmentState::Built;
    }
    EnvironmentState::Initialized
}
