//! Discovery of live stacks and inference of their project, environment and mode.

use crate::deploy::RuntimeMode;
use crate::deploy::template::clean_path;
use crate::traits::runtime::{PROJECT_LABEL, SERVICE_LABEL};
use crate::traits::{ContainerInstance, ContainerRuntime, FileSystem, InstanceFilter};
use anyhow::Result;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Recognized service roles; lower number wins when roles disagree about a stack
pub const SERVICE_ROLE_PRIORITY: &[(&str, u8)] = &[
    ("gateway", 0),
    ("compute-node", 1),
    ("agent", 2),
    ("database", 3),
    ("object-storage", 4),
    ("log-store", 5),
    ("provisioner", 6),
    ("dns", 7),
];

const GATEWAY_ROLE: &str = "gateway";
const COMPUTE_NODE_ROLE: &str = "compute-node";
const AGENT_ROLE: &str = "agent";

/// Variable the gateway is started with to name its environment
pub const GATEWAY_ENV_VAR: &str = "ENV";
/// Where the gateway expects its generated configuration
pub const RUNTIME_CONFIG_MOUNT: &str = "/app/runtime-config";
const CONFIG_DIR_NAME: &str = "config";

/// Orchestration file keywords, first match wins
const MODE_FILE_KEYWORDS: &[(&str, RuntimeMode)] = &[
    ("firecracker", RuntimeMode::MicroVm),
    ("containerd", RuntimeMode::KernelIsolated),
    ("docker", RuntimeMode::ProcessIsolated),
];

fn role_priority(role: &str) -> Option<u8> {
    SERVICE_ROLE_PRIORITY
        .iter()
        .find(|(name, _)| *name == role)
        .map(|(_, priority)| *priority)
}

/// A live deployment unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStack {
    pub name: String,
    pub project_id: Option<String>,
    pub inferred_env: Option<String>,
    pub service_roles_seen: Vec<String>,
}

impl RuntimeStack {
    /// Project identifier, falling back to the stack name
    pub fn project(&self) -> &str {
        self.project_id.as_deref().unwrap_or(&self.name)
    }

    pub fn matches(&self, project: &str) -> bool {
        let project = project.trim();
        self.name == project || self.project_id.as_deref() == Some(project)
    }
}

/// A mode read off the runtime, with a note on how it was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeInference {
    pub mode: RuntimeMode,
    pub provenance: &'static str,
}

/// An environment read off the runtime or the staging area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvInference {
    pub env: String,
    pub provenance: &'static str,
}

impl EnvInference {
    fn new(env: impl Into<String>, provenance: &'static str) -> Self {
        Self {
            env: env.into(),
            provenance,
        }
    }
}

pub struct RuntimeProbe<'a> {
    runtime: &'a dyn ContainerRuntime,
}

impl<'a> RuntimeProbe<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime) -> Self {
        Self { runtime }
    }

    /// List the stacks with at least one running instance of a known role, sorted by name
    pub fn discover(&self) -> Result<Vec<RuntimeStack>> {
        let instances = self.runtime.list_instances(&InstanceFilter::running())?;
        let stacks = group_stacks(&instances);
        tracing::debug!(
            instances = instances.len(),
            stacks = stacks.len(),
            "discovered live stacks"
        );
        Ok(stacks)
    }

    /// Work out which mode a project runs in; `None` when nothing gives it away
    pub fn infer_mode(&self, project: &str) -> Result<Option<ModeInference>> {
        let project = project.trim();
        if project.is_empty() {
            return Ok(None);
        }
        let instances = self
            .runtime
            .list_instances(&InstanceFilter::all().with_label(PROJECT_LABEL, project))?;
        if let Some(inference) = infer_mode_from_instances(&instances) {
            return Ok(Some(inference));
        }

        let files = self.runtime.resolve_compose_files(project)?;
        Ok(infer_mode_from_files(&files).map(|mode| ModeInference {
            mode,
            provenance: "compose files",
        }))
    }

    /// The project's gateway with its environment and mounts, preferring a running one
    pub fn gateway(&self, project: &str) -> Result<Option<ContainerInstance>> {
        let project = project.trim();
        if project.is_empty() {
            return Ok(None);
        }
        let filter = InstanceFilter::all()
            .with_label(PROJECT_LABEL, project)
            .with_label(SERVICE_LABEL, GATEWAY_ROLE);
        let instances = self.runtime.list_instances(&filter)?;
        let Some(picked) = instances.iter().find(|i| i.is_running()).or(instances.first()) else {
            return Ok(None);
        };
        self.runtime.inspect_instance(&picked.name).map(Some)
    }
}

/// Environment of a live stack; the first source that knows wins.
///
/// Order: the gateway's `ENV` variable, the environment directory its
/// runtime config is mounted from, the stack name's suffix, and finally the
/// only environment staged under `staging_root`.
pub fn infer_env(
    fs: &dyn FileSystem,
    stack: &RuntimeStack,
    gateway: Option<&ContainerInstance>,
    staging_root: &Path,
) -> Option<EnvInference> {
    gateway
        .and_then(|g| infer_env_from_gateway(g, staging_root))
        .or_else(|| {
            stack
                .inferred_env
                .clone()
                .map(|env| EnvInference::new(env, "name suffix"))
        })
        .or_else(|| infer_env_from_staging(fs, staging_root).map(|env| EnvInference::new(env, "staging")))
}

pub fn infer_env_from_gateway(gateway: &ContainerInstance, staging_root: &Path) -> Option<EnvInference> {
    if let Some(env) = gateway.env_var(GATEWAY_ENV_VAR) {
        return Some(EnvInference::new(env, "gateway env"));
    }
    let mount = gateway.bind_mount(RUNTIME_CONFIG_MOUNT)?;
    env_from_config_dir(&mount.source, staging_root).map(|env| EnvInference::new(env, "gateway config mount"))
}

/// `<staging_root>/<env>/config` yields `env`; anything else yields nothing
pub fn env_from_config_dir(dir: &Path, staging_root: &Path) -> Option<String> {
    let dir = clean_path(dir);
    let root = clean_path(staging_root);
    if dir.file_name()? != OsStr::new(CONFIG_DIR_NAME) {
        return None;
    }
    let env_dir = dir.parent()?;
    if env_dir == root || !env_dir.starts_with(&root) {
        return None;
    }
    env_dir
        .file_name()
        .map(|name| name.to_string_lossy().trim().to_string())
        .filter(|env| !env.is_empty())
}

/// The environment staged under `staging_root`, when there is exactly one
pub fn infer_env_from_staging(fs: &dyn FileSystem, staging_root: &Path) -> Option<String> {
    if !fs.is_dir(staging_root) {
        return None;
    }
    let entries = match fs.read_dir(staging_root) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::debug!(root = %staging_root.display(), error = %format!("{:#}", err), "staging root unreadable");
            return None;
        }
    };
    let envs: Vec<String> = entries
        .iter()
        .filter(|entry| fs.is_dir(&entry.join(CONFIG_DIR_NAME)))
        .filter_map(|entry| entry.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect();
    match envs.as_slice() {
        [only] => Some(only.clone()),
        _ => None,
    }
}

/// Group instances into stacks by stripping the role suffix from their names
pub fn group_stacks(instances: &[ContainerInstance]) -> Vec<RuntimeStack> {
    let mut stacks: BTreeMap<String, (u8, RuntimeStack)> = BTreeMap::new();

    for instance in instances {
        let Some(role) = instance.label(SERVICE_LABEL) else {
            continue;
        };
        let Some(priority) = role_priority(role) else {
            continue;
        };
        let Some(name) = stack_name(&instance.name, role) else {
            continue;
        };
        let project_id = instance.label(PROJECT_LABEL).map(str::to_string);

        match stacks.get_mut(&name) {
            None => {
                let stack = RuntimeStack {
                    inferred_env: infer_env_from_stack_name(&name),
                    name: name.clone(),
                    project_id,
                    service_roles_seen: vec![role.to_string()],
                };
                stacks.insert(name, (priority, stack));
            }
            Some((best, stack)) => {
                if !stack.service_roles_seen.iter().any(|r| r == role) {
                    stack.service_roles_seen.push(role.to_string());
                }
                if priority < *best {
                    *best = priority;
                    if project_id.is_some() {
                        stack.project_id = project_id;
                    }
                } else if stack.project_id.is_none() {
                    stack.project_id = project_id;
                }
            }
        }
    }

    stacks
        .into_values()
        .map(|(_, mut stack)| {
            stack.service_roles_seen.sort_by_key(|role| role_priority(role));
            stack
        })
        .collect()
}

fn stack_name(instance_name: &str, role: &str) -> Option<String> {
    let name = instance_name.trim().trim_start_matches('/');
    let stack = name.strip_suffix(role)?.strip_suffix('-')?.trim();
    (!stack.is_empty()).then(|| stack.to_string())
}

/// Last `-` segment of a stack name, when it has at least two
pub fn infer_env_from_stack_name(stack: &str) -> Option<String> {
    let parts: Vec<&str> = stack.trim().split('-').collect();
    if parts.len() < 2 {
        return None;
    }
    parts
        .last()
        .map(|env| env.trim())
        .filter(|env| !env.is_empty())
        .map(str::to_string)
}

fn has_role(instances: &[ContainerInstance], role: &str, running_only: bool) -> bool {
    instances
        .iter()
        .filter(|i| !running_only || i.is_running())
        .any(|i| i.label(SERVICE_LABEL) == Some(role))
}

pub fn infer_mode_from_instances(instances: &[ContainerInstance]) -> Option<ModeInference> {
    if has_role(instances, COMPUTE_NODE_ROLE, true) {
        return Some(ModeInference {
            mode: RuntimeMode::KernelIsolated,
            provenance: "running compute-node",
        });
    }
    if has_role(instances, COMPUTE_NODE_ROLE, false) {
        return Some(ModeInference {
            mode: RuntimeMode::KernelIsolated,
            provenance: "stopped compute-node",
        });
    }
    if has_role(instances, AGENT_ROLE, false) {
        return Some(ModeInference {
            mode: RuntimeMode::ProcessIsolated,
            provenance: "agent service",
        });
    }
    None
}

pub fn infer_mode_from_files(files: &[PathBuf]) -> Option<RuntimeMode> {
    let names: Vec<String> = files
        .iter()
        .filter_map(|f| f.file_name())
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .collect();
    MODE_FILE_KEYWORDS
        .iter()
        .find(|(keyword, _)| names.iter().any(|name| name.contains(keyword)))
        .map(|(_, mode)| *mode)
}
