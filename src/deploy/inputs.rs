use crate::deploy::{DeployInputError, ValueChoice};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Execution-isolation technology running the workload containers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeMode {
    ProcessIsolated,
    KernelIsolated,
    MicroVm,
}

impl RuntimeMode {
    pub const ALL: [RuntimeMode; 3] = [
        RuntimeMode::ProcessIsolated,
        RuntimeMode::KernelIsolated,
        RuntimeMode::MicroVm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeMode::ProcessIsolated => "process-isolated",
            RuntimeMode::KernelIsolated => "kernel-isolated",
            RuntimeMode::MicroVm => "micro-vm",
        }
    }

    /// Name of the container runtime backing this mode
    pub fn runtime_name(&self) -> &'static str {
        match self {
            RuntimeMode::ProcessIsolated => "docker",
            RuntimeMode::KernelIsolated => "containerd",
            RuntimeMode::MicroVm => "firecracker",
        }
    }
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeMode {
    type Err = DeployInputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        RuntimeMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized || mode.runtime_name() == normalized)
            .ok_or_else(|| DeployInputError::InvalidMode {
                value: s.trim().to_string(),
            })
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct InitialFlags {
    pub template: Option<String>,
    pub env: Option<String>,
    pub mode: Option<String>,
    pub project: Option<String>,
    pub output: Option<String>,
    /// `NAME=VALUE` pairs in the order given
    pub params: Vec<(String, String)>,
    pub force: bool,
    pub no_save: bool,
    pub interactive: bool,
}

/// `SBX_*` environment variables captured at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub template: Option<String>,
    pub env: Option<String>,
    pub mode: Option<String>,
    pub project: Option<String>,
    pub output: Option<String>,
}

impl EnvOverrides {
    pub fn from_process() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            template: get("SBX_TEMPLATE"),
            env: get("SBX_ENV"),
            mode: get("SBX_MODE"),
            project: get("SBX_PROJECT"),
            output: get("SBX_OUTPUT"),
        }
    }
}

/// Trimmed, non-empty flag value
pub(crate) fn given(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Everything a deployment needs, each value tagged with where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentInputSet {
    pub template: ValueChoice<PathBuf>,
    /// Live stack the deployment targets, if one was selected
    pub stack: Option<String>,
    pub project: ValueChoice<String>,
    pub env: ValueChoice<String>,
    pub mode: ValueChoice<RuntimeMode>,
    pub output_dir: ValueChoice<PathBuf>,
    pub params: BTreeMap<String, ValueChoice<String>>,
}

impl DeploymentInputSet {
    /// Output directory with relative paths anchored at the template's directory
    pub fn resolved_output_dir(&self) -> PathBuf {
        let output = &self.output_dir.value;
        if output.is_absolute() {
            return output.clone();
        }
        match self.template.value.parent() {
            Some(base) => base.join(output),
            None => output.clone(),
        }
    }

    /// Directory holding the generated configuration for this environment
    pub fn staged_config_dir(&self) -> PathBuf {
        self.resolved_output_dir().join(&self.env.value).join("config")
    }

    pub fn param_values(&self) -> BTreeMap<String, String> {
        self.params
            .iter()
            .map(|(name, choice)| (name.clone(), choice.value.clone()))
            .collect()
    }
}

/// Values carried from a rejected pass into the next one.
///
/// Built once from the previous set and never mutated while the next pass runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarriedInputs {
    pub template: Option<ValueChoice<PathBuf>>,
    pub stack: Option<String>,
    pub project: Option<ValueChoice<String>>,
    pub env: Option<ValueChoice<String>>,
    pub mode: Option<ValueChoice<RuntimeMode>>,
    pub output_dir: Option<ValueChoice<PathBuf>>,
    pub params: BTreeMap<String, ValueChoice<String>>,
}

impl CarriedInputs {
    pub fn is_editing(&self) -> bool {
        self.template.is_some()
    }
}

impl From<&DeploymentInputSet> for CarriedInputs {
    fn from(previous: &DeploymentInputSet) -> Self {
        Self {
            template: Some(previous.template.clone()),
            stack: previous.stack.clone(),
            project: Some(previous.project.clone()),
            env: Some(previous.env.clone()),
            mode: Some(previous.mode.clone()),
            output_dir: Some(previous.output_dir.clone()),
            params: previous.params.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_mode_parses_canonical_and_runtime_names() {
        assert_eq!("kernel-isolated".parse::<RuntimeMode>().unwrap(), RuntimeMode::KernelIsolated);
        assert_eq!(" Docker ".parse::<RuntimeMode>().unwrap(), RuntimeMode::ProcessIsolated);
        assert_eq!("firecracker".parse::<RuntimeMode>().unwrap(), RuntimeMode::MicroVm);
        assert_eq!(
            "podman".parse::<RuntimeMode>().unwrap_err(),
            DeployInputError::InvalidMode {
                value: "podman".into()
            }
        );
    }

    #[test]
    fn test_mode_display_round_trips() {
        for mode in RuntimeMode::ALL {
            assert_eq!(mode.to_string().parse::<RuntimeMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_env_overrides_ignore_blank_values() {
        let vars: HashMap<&str, &str> = [("SBX_ENV", " staging "), ("SBX_MODE", "  ")].into();
        let overrides = EnvOverrides::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(overrides.env.as_deref(), Some("staging"));
        assert_eq!(overrides.mode, None);
        assert_eq!(overrides.template, None);
    }

    #[test]
    fn test_staged_config_dir_is_relative_to_template() {
        let set = DeploymentInputSet {
            template: ValueChoice::flag(PathBuf::from("/work/app/template.yaml")),
            stack: None,
            project: ValueChoice::computed("sbx-dev".into()),
            env: ValueChoice::flag("dev".into()),
            mode: ValueChoice::flag(RuntimeMode::ProcessIsolated),
            output_dir: ValueChoice::computed(PathBuf::from(".sbx")),
            params: BTreeMap::new(),
        };
        assert_eq!(set.staged_config_dir(), PathBuf::from("/work/app/.sbx/dev/config"));
    }
}
