use crate::deploy::DeployInputError;
use crate::traits::CommandExecutor;
use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SERVICE_LABEL: &str = "com.docker.compose.service";
pub const PROJECT_LABEL: &str = "com.docker.compose.project";
pub const CONFIG_FILES_LABEL: &str = "com.docker.compose.project.config_files";
pub const WORKING_DIR_LABEL: &str = "com.docker.compose.project.working_dir";

/// A volume or bind mount attached to an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// "bind", "volume", ...
    pub kind: String,
    pub source: PathBuf,
    pub destination: String,
}

/// One container as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerInstance {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Raw runtime state ("running", "exited", "created", ...)
    pub state: String,
    /// Environment variables; only filled in by `ContainerRuntime::inspect_instance`
    pub env: BTreeMap<String, String>,
    /// Only filled in by `ContainerRuntime::inspect_instance`
    pub mounts: Vec<Mount>,
}

impl ContainerInstance {
    /// Trimmed label value, `None` when absent or blank
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn is_running(&self) -> bool {
        self.state.trim().eq_ignore_ascii_case("running")
    }

    /// Trimmed environment variable, `None` when absent or blank
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    /// Bind mount targeting `destination`
    pub fn bind_mount(&self, destination: &str) -> Option<&Mount> {
        self.mounts
            .iter()
            .find(|m| m.kind == "bind" && m.destination == destination && !m.source.as_os_str().is_empty())
    }
}

#[cfg(test)]
impl ContainerInstance {
    pub fn new(name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: state.into(),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_bind_mount(mut self, source: impl Into<PathBuf>, destination: &str) -> Self {
        self.mounts.push(Mount {
            kind: "bind".to_string(),
            source: source.into(),
            destination: destination.to_string(),
        });
        self
    }
}

/// Which instances to list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFilter {
    pub labels: Vec<(String, String)>,
    pub include_stopped: bool,
}

impl InstanceFilter {
    pub fn running() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            labels: Vec::new(),
            include_stopped: true,
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.push((key.to_string(), value.to_string()));
        self
    }

    pub fn matches(&self, instance: &ContainerInstance) -> bool {
        if !self.include_stopped && !instance.is_running() {
            return false;
        }
        self.labels
            .iter()
            .all(|(key, value)| instance.label(key) == Some(value.as_str()))
    }
}

/// Container runtime client consumed by the runtime probe and the status command
pub trait ContainerRuntime: Send + Sync {
    fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<ContainerInstance>>;

    /// One instance with its environment and mounts
    fn inspect_instance(&self, name: &str) -> Result<ContainerInstance>;

    /// Orchestration files a project was started from
    fn resolve_compose_files(&self, project: &str) -> Result<Vec<PathBuf>> {
        let project = project.trim();
        if project.is_empty() {
            return Ok(Vec::new());
        }
        let instances = self.list_instances(&InstanceFilter::all().with_label(PROJECT_LABEL, project))?;
        Ok(compose_files_from_instances(&instances))
    }
}

/// Pick the orchestration file set shared by most instances, preferring running ones
pub fn compose_files_from_instances(instances: &[ContainerInstance]) -> Vec<PathBuf> {
    let running: Vec<&ContainerInstance> = instances.iter().filter(|i| i.is_running()).collect();
    let candidates: Vec<&ContainerInstance> = if running.is_empty() {
        instances.iter().collect()
    } else {
        running
    };

    let mut sets: BTreeMap<String, (Vec<PathBuf>, usize)> = BTreeMap::new();
    for instance in candidates {
        let Some(raw) = instance.label(CONFIG_FILES_LABEL) else {
            continue;
        };
        let files = normalize_compose_paths(raw, instance.label(WORKING_DIR_LABEL));
        if files.is_empty() {
            continue;
        }
        let key = files
            .iter()
            .map(|p| p.to_string_lossy())
            .collect::<Vec<_>>()
            .join("\u{1f}");
        sets.entry(key).or_insert_with(|| (files, 0)).1 += 1;
    }

    let mut best: Option<&(Vec<PathBuf>, usize)> = None;
    for entry in sets.values() {
        if best.is_none_or(|current| entry.1 > current.1) {
            best = Some(entry);
        }
    }
    best.map(|(files, _)| files.clone()).unwrap_or_default()
}

fn normalize_compose_paths(raw: &str, working_dir: Option<&str>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let mut path = PathBuf::from(part);
        if let Some(dir) = working_dir
            && !path.is_absolute()
        {
            path = Path::new(dir).join(path);
        }
        let path: PathBuf = path.components().collect();
        if !out.contains(&path) {
            out.push(path);
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct PsRow {
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Labels", default)]
    labels: String,
    #[serde(rename = "State", default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct InspectRow {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "State", default)]
    state: InspectState,
    #[serde(rename = "Config", default)]
    config: InspectConfig,
    #[serde(rename = "Mounts", default)]
    mounts: Vec<InspectMount>,
}

#[derive(Debug, Default, Deserialize)]
struct InspectState {
    #[serde(rename = "Status", default)]
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct InspectConfig {
    #[serde(rename = "Env", default)]
    env: Option<Vec<String>>,
    #[serde(rename = "Labels", default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct InspectMount {
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(rename = "Source", default)]
    source: String,
    #[serde(rename = "Destination", default)]
    destination: String,
}

/// `KEY=VALUE` entries into a map; entries without `=` are skipped
fn parse_env(entries: &[String]) -> BTreeMap<String, String> {
    entries
        .iter()
        .filter_map(|entry| entry.split_once('='))
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .collect()
}

/// `ContainerRuntime` backed by the docker CLI
pub struct DockerCliRuntime {
    command: Arc<dyn CommandExecutor>,
}

impl DockerCliRuntime {
    pub fn new(command: Arc<dyn CommandExecutor>) -> Self {
        Self { command }
    }

    fn parse_rows(stdout: &str) -> Result<Vec<ContainerInstance>> {
        let mut instances = Vec::new();
        for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let row: PsRow = serde_json::from_str(line).map_err(|e| {
                DeployInputError::RuntimeProbeFailure(format!("unparseable `docker ps` row: {}", e))
            })?;
            let name = row
                .names
                .split(',')
                .map(|n| n.trim().trim_start_matches('/'))
                .find(|n| !n.is_empty())
                .unwrap_or_default()
                .to_string();
            instances.push(ContainerInstance {
                name,
                labels: parse_labels(&row.labels),
                state: row.state.trim().to_string(),
                ..ContainerInstance::default()
            });
        }
        Ok(instances)
    }

    fn parse_inspect(stdout: &str) -> Result<ContainerInstance> {
        let row: InspectRow = serde_json::from_str(stdout.trim()).map_err(|e| {
            DeployInputError::RuntimeProbeFailure(format!("unparseable `docker inspect` output: {}", e))
        })?;
        Ok(ContainerInstance {
            name: row.name.trim().trim_start_matches('/').to_string(),
            labels: row.config.labels.unwrap_or_default(),
            state: row.state.status.trim().to_string(),
            env: parse_env(&row.config.env.unwrap_or_default()),
            mounts: row
                .mounts
                .into_iter()
                .map(|m| Mount {
                    kind: m.kind.trim().to_string(),
                    source: PathBuf::from(m.source.trim()),
                    destination: m.destination.trim().to_string(),
                })
                .collect(),
        })
    }

    fn docker(&self, args: &[&str]) -> Result<String> {
        let output = self
            .command
            .execute("docker", args)
            .map_err(|e| DeployInputError::RuntimeProbeFailure(format!("{:#}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeployInputError::RuntimeProbeFailure(format!(
                "`docker {}` exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim()
            ))
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse docker's `k=v,k2=v2` label rendering.
///
/// Label values may themselves contain commas (the compose config file list
/// does), so a segment without `=` continues the previous value.
fn parse_labels(raw: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    let mut last_key: Option<String> = None;
    for segment in raw.split(',') {
        match segment.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                let key = key.trim().to_string();
                labels.insert(key.clone(), value.to_string());
                last_key = Some(key);
            }
            _ => {
                if let Some(key) = &last_key
                    && let Some(value) = labels.get_mut(key)
                {
                    value.push(',');
                    value.push_str(segment);
                }
            }
        }
    }
    labels
}

impl ContainerRuntime for DockerCliRuntime {
    fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<ContainerInstance>> {
        let mut args: Vec<String> = vec!["ps".into(), "--no-trunc".into()];
        if filter.include_stopped {
            args.push("-a".into());
        }
        for (key, value) in &filter.labels {
            args.push("--filter".into());
            args.push(format!("label={}={}", key, value));
        }
        args.push("--format".into());
        args.push("{{json .}}".into());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        tracing::debug!(args = ?arg_refs, "listing container instances");
        Self::parse_rows(&self.docker(&arg_refs)?)
    }

    fn inspect_instance(&self, name: &str) -> Result<ContainerInstance> {
        tracing::debug!(name, "inspecting container instance");
        let stdout = self.docker(&["inspect", "--type", "container", "--format", "{{json .}}", name])?;
        Self::parse_inspect(&stdout)
    }
}

/// In-memory runtime for tests
#[cfg(test)]
pub struct MockContainerRuntime {
    instances: Vec<ContainerInstance>,
    failure: Option<String>,
}

#[cfg(test)]
impl MockContainerRuntime {
    pub fn new(instances: Vec<ContainerInstance>) -> Self {
        Self {
            instances,
            failure: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// A runtime that cannot be reached
    pub fn unreachable(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::empty()
        }
    }

    /// A compose-managed instance named `<stack>-<service>`
    pub fn service(stack: &str, project: &str, service: &str, state: &str) -> ContainerInstance {
        let mut instance = ContainerInstance::new(format!("{}-{}", stack, service), state)
            .with_label(SERVICE_LABEL, service);
        if !project.is_empty() {
            instance = instance.with_label(PROJECT_LABEL, project);
        }
        instance
    }
}

#[cfg(test)]
impl ContainerRuntime for MockContainerRuntime {
    fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<ContainerInstance>> {
        if let Some(message) = &self.failure {
            return Err(DeployInputError::RuntimeProbeFailure(message.clone()).into());
        }
        Ok(self
            .instances
            .iter()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect())
    }

    fn inspect_instance(&self, name: &str) -> Result<ContainerInstance> {
        if let Some(message) = &self.failure {
            return Err(DeployInputError::RuntimeProbeFailure(message.clone()).into());
        }
        self.instances
            .iter()
            .find(|i| i.name == name)
            .cloned()
            .ok_or_else(|| DeployInputError::RuntimeProbeFailure(format!("no such container: {}", name)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::command::{MockCommandExecutor, MockCommandResult};

    #[test]
    fn test_parse_labels_keeps_commas_inside_values() {
        let labels = parse_labels(
            "com.docker.compose.project=sbx-dev,com.docker.compose.project.config_files=/a/docker-compose.yml,/a/docker-compose.containerd.yml,com.docker.compose.service=gateway",
        );
        assert_eq!(labels.get(PROJECT_LABEL).unwrap(), "sbx-dev");
        assert_eq!(labels.get(SERVICE_LABEL).unwrap(), "gateway");
        assert_eq!(
            labels.get(CONFIG_FILES_LABEL).unwrap(),
            "/a/docker-compose.yml,/a/docker-compose.containerd.yml"
        );
    }

    #[test]
    fn test_docker_runtime_parses_json_rows() {
        let stdout = concat!(
            r#"{"Names":"sbx-dev-gateway","Labels":"com.docker.compose.service=gateway,com.docker.compose.project=sbx-dev","State":"running"}"#,
            "\n",
            r#"{"Names":"/sbx-dev-agent","Labels":"com.docker.compose.service=agent","State":"exited"}"#,
            "\n"
        );
        let executor = Arc::new(MockCommandExecutor::with_outputs(vec![MockCommandResult::ok(
            "docker", stdout,
        )]));
        let runtime = DockerCliRuntime::new(executor.clone());

        let instances = runtime
            .list_instances(&InstanceFilter::all().with_label(PROJECT_LABEL, "sbx-dev"))
            .unwrap();

        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].name, "sbx-dev-gateway");
        assert!(instances[0].is_running());
        assert_eq!(instances[1].name, "sbx-dev-agent");
        assert_eq!(instances[1].label(SERVICE_LABEL), Some("agent"));

        let call = &executor.calls()[0];
        assert!(call.contains(&"-a".to_string()));
        assert!(call.contains(&"label=com.docker.compose.project=sbx-dev".to_string()));
    }

    #[test]
    fn test_docker_runtime_failure_is_probe_failure() {
        let executor = Arc::new(MockCommandExecutor::with_outputs(vec![MockCommandResult::failed(
            "docker",
            1,
            "Cannot connect to the Docker daemon",
        )]));
        let runtime = DockerCliRuntime::new(executor);

        let err = runtime.list_instances(&InstanceFilter::running()).unwrap_err();
        match err.downcast_ref::<DeployInputError>() {
            Some(DeployInputError::RuntimeProbeFailure(message)) => {
                assert!(message.contains("Cannot connect"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_docker_inspect_reads_env_and_mounts() {
        let stdout = r#"{"Name":"/sbx-dev-gateway","State":{"Status":"running"},"Config":{"Env":["ENV=qa","PATH=/usr/bin","BROKEN"],"Labels":{"com.docker.compose.service":"gateway"}},"Mounts":[{"Type":"bind","Source":"/repo/.sbx/qa/config","Destination":"/app/runtime-config"},{"Type":"volume","Source":"","Destination":"/data"}]}"#;
        let executor = Arc::new(MockCommandExecutor::with_outputs(vec![MockCommandResult::ok(
            "docker", stdout,
        )]));
        let runtime = DockerCliRuntime::new(executor.clone());

        let instance = runtime.inspect_instance("sbx-dev-gateway").unwrap();

        assert_eq!(instance.name, "sbx-dev-gateway");
        assert!(instance.is_running());
        assert_eq!(instance.env_var("ENV"), Some("qa"));
        assert_eq!(instance.env.len(), 2);
        assert_eq!(instance.label(SERVICE_LABEL), Some("gateway"));
        assert_eq!(
            instance.bind_mount("/app/runtime-config").map(|m| m.source.clone()),
            Some(PathBuf::from("/repo/.sbx/qa/config"))
        );
        assert_eq!(instance.bind_mount("/data"), None);
        assert_eq!(executor.calls()[0].last().map(String::as_str), Some("sbx-dev-gateway"));
    }

    #[test]
    fn test_docker_inspect_tolerates_null_env() {
        let instance =
            DockerCliRuntime::parse_inspect(r#"{"Name":"x","Config":{"Env":null,"Labels":null},"Mounts":[]}"#)
                .unwrap();
        assert!(instance.env.is_empty());
        assert!(instance.labels.is_empty());
    }

    #[test]
    fn test_compose_files_prefer_most_common_set_among_running() {
        let with_files = |name: &str, state: &str, files: &str| {
            ContainerInstance::new(name, state)
                .with_label(PROJECT_LABEL, "sbx-dev")
                .with_label(CONFIG_FILES_LABEL, files)
                .with_label(WORKING_DIR_LABEL, "/repo")
        };
        let runtime = MockContainerRuntime::new(vec![
            with_files("a", "running", "docker-compose.yml,docker-compose.containerd.yml"),
            with_files("b", "running", "docker-compose.yml,docker-compose.containerd.yml"),
            with_files("c", "running", "docker-compose.yml"),
            with_files("d", "exited", "other.yml"),
        ]);

        let files = runtime.resolve_compose_files("sbx-dev").unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("/repo/docker-compose.yml"),
                PathBuf::from("/repo/docker-compose.containerd.yml")
            ]
        );
    }

    #[test]
    fn test_filter_running_excludes_stopped() {
        let stopped = ContainerInstance::new("x", "exited");
        assert!(!InstanceFilter::running().matches(&stopped));
        assert!(InstanceFilter::all().matches(&stopped));
    }
}
