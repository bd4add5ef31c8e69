use crate::context::Context;
use crate::deploy::field::FieldValue;
use crate::deploy::inputs::given;
use crate::deploy::probe::infer_env_from_stack_name;
use crate::deploy::resolver::DEFAULT_OUTPUT_DIR;
use crate::deploy::template::{clean_path, expand_home, normalize_template_path};
use crate::deploy::{ContainerState, EnvOverrides, EnvironmentState, detect};
use crate::traits::InstanceFilter;
use crate::traits::runtime::PROJECT_LABEL;
use anyhow::{Context as AnyhowContext, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct StatusArgs {
    pub project: Option<String>,
    pub template: Option<String>,
    pub env: Option<String>,
    pub output: Option<String>,
}

/// What the status command could establish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    Known(EnvironmentState),
    /// The container runtime could not be reached
    Unknown,
}

const UNKNOWN_STATE: &str = "unknown";
const UNKNOWN_HINT: &str = "container runtime unreachable; cannot tell whether the environment is up";

/// Handles the 'status' command - reports an environment's operational state
pub struct StatusCommand;

impl StatusCommand {
    pub fn execute(ctx: &Context, args: &StatusArgs) -> Result<()> {
        let working_dir = std::env::current_dir().context("Failed to determine current directory")?;
        Self::run(ctx, args, &EnvOverrides::from_process(), &working_dir)?;
        Ok(())
    }

    pub fn run(
        ctx: &Context,
        args: &StatusArgs,
        overrides: &EnvOverrides,
        working_dir: &Path,
    ) -> Result<StatusOutcome> {
        let project = given(&args.project).or(given(&overrides.project));
        let env = given(&args.env)
            .or(given(&overrides.env))
            .map(str::to_string)
            .or_else(|| project.and_then(infer_env_from_stack_name));

        ctx.output.section("Environment status");
        ctx.output.key_value("Project", project.unwrap_or("(none)"));
        if let Some(env) = &env {
            ctx.output.environment_badge(env);
        }

        let containers = match project {
            Some(project) => Self::containers(ctx, project),
            None => Some(Vec::new()),
        };

        let staged = match &env {
            Some(env) => Some(Self::staged_config_dir(ctx, args, overrides, working_dir, env)?),
            None => None,
        };
        let has_artifacts = staged.as_ref().is_some_and(|dir| ctx.fs.is_dir(dir));
        if let Some(dir) = &staged {
            ctx.output.key_value("Staging config", &dir.render());
        }

        let Some(containers) = containers else {
            tracing::debug!(project = project.unwrap_or_default(), has_artifacts, "environment state unknown");
            ctx.output.state_badge(UNKNOWN_STATE, false);
            ctx.output.dimmed(UNKNOWN_HINT);
            return Ok(StatusOutcome::Unknown);
        };

        let state = detect(project.is_some(), &containers, has_artifacts);
        tracing::debug!(
            project = project.unwrap_or_default(),
            containers = containers.len(),
            has_artifacts,
            state = %state,
            "detected environment state"
        );

        let running = containers
            .iter()
            .filter(|c| c.state.trim().eq_ignore_ascii_case("running"))
            .count();
        if !containers.is_empty() {
            ctx.output.key_value(
                "Containers",
                &format!("{} running / {} total", running, containers.len()),
            );
        }
        ctx.output
            .state_badge(state.as_str(), state == EnvironmentState::Running);
        ctx.output.dimmed(state.hint());

        Ok(StatusOutcome::Known(state))
    }

    /// The project's containers; `None` when the runtime cannot be asked
    fn containers(ctx: &Context, project: &str) -> Option<Vec<ContainerState>> {
        let filter = InstanceFilter::all().with_label(PROJECT_LABEL, project);
        match ctx.runtime.list_instances(&filter) {
            Ok(instances) => Some(
                instances
                    .into_iter()
                    .map(|i| ContainerState::new(i.name, i.state))
                    .collect(),
            ),
            Err(err) => {
                ctx.output.warning(&format!(
                    "Could not inspect running containers: {:#}",
                    err
                ));
                None
            }
        }
    }

    /// `<output>/<env>/config`, with a relative output anchored at the template's directory
    fn staged_config_dir(
        ctx: &Context,
        args: &StatusArgs,
        overrides: &EnvOverrides,
        working_dir: &Path,
        env: &str,
    ) -> Result<PathBuf> {
        let base = match given(&args.template).or(given(&overrides.template)) {
            Some(template) => normalize_template_path(ctx.fs.as_ref(), template, working_dir)?
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| working_dir.to_path_buf()),
            None => working_dir.to_path_buf(),
        };
        let output = given(&args.output)
            .or(given(&overrides.output))
            .unwrap_or(DEFAULT_OUTPUT_DIR);
        let output = expand_home(output.trim_end_matches(['/', '\\']))?;
        Ok(clean_path(&base.join(output)).join(env).join("config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::output::OutputMessage;
    use crate::traits::{MockContainerRuntime, MockFileSystem, MockOutput, MockUserInput};
    use std::sync::Arc;

    fn ctx_with(fs: MockFileSystem, runtime: MockContainerRuntime) -> (Context, Arc<MockOutput>) {
        let output = Arc::new(MockOutput::new());
        let ctx = Context::test_with(
            Arc::new(fs),
            Arc::new(MockUserInput::new()),
            output.clone(),
            Arc::new(runtime),
        );
        (ctx, output)
    }

    fn args(project: Option<&str>) -> StatusArgs {
        StatusArgs {
            project: project.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_project_is_uninitialized() {
        let (ctx, output) = ctx_with(MockFileSystem::new(), MockContainerRuntime::empty());
        let state = StatusCommand::run(&ctx, &args(None), &EnvOverrides::default(), Path::new("/work")).unwrap();
        assert_eq!(state, StatusOutcome::Known(EnvironmentState::Uninitialized));
        assert!(output.contains_message(&OutputMessage::State("uninitialized".to_string())));
    }

    #[test]
    fn test_running_stack() {
        let runtime = MockContainerRuntime::new(vec![
            MockContainerRuntime::service("sbx-dev", "sbx-dev", "gateway", "running"),
            MockContainerRuntime::service("sbx-dev", "sbx-dev", "agent", "exited"),
        ]);
        let (ctx, output) = ctx_with(MockFileSystem::new(), runtime);

        let state =
            StatusCommand::run(&ctx, &args(Some("sbx-dev")), &EnvOverrides::default(), Path::new("/work")).unwrap();

        assert_eq!(state, StatusOutcome::Known(EnvironmentState::Running));
        assert_eq!(output.value_for("Environment").as_deref(), Some("dev"));
        assert_eq!(output.value_for("Containers").as_deref(), Some("1 running / 2 total"));
    }

    #[test]
    fn test_staged_config_without_containers_is_built() {
        let fs = MockFileSystem::new()
            .with_file("/work/app/template.yaml", "Resources: {}\n")
            .with_dir("/work/app/.sbx/qa/config");
        let (ctx, output) = ctx_with(fs, MockContainerRuntime::empty());
        let status = StatusArgs {
            project: Some("shop".into()),
            template: Some("app".into()),
            env: Some("qa".into()),
            output: None,
        };

        let state = StatusCommand::run(&ctx, &status, &EnvOverrides::default(), Path::new("/work")).unwrap();

        assert_eq!(state, StatusOutcome::Known(EnvironmentState::Built));
        assert_eq!(
            output.value_for("Staging config").as_deref(),
            Some("/work/app/.sbx/qa/config")
        );
    }

    #[test]
    fn test_project_from_env_var_without_artifacts_is_initialized() {
        let (ctx, _) = ctx_with(MockFileSystem::new(), MockContainerRuntime::empty());
        let overrides = EnvOverrides {
            project: Some("shop".into()),
            env: Some("dev".into()),
            ..Default::default()
        };
        let state = StatusCommand::run(&ctx, &args(None), &overrides, Path::new("/work")).unwrap();
        assert_eq!(state, StatusOutcome::Known(EnvironmentState::Initialized));
    }

    #[test]
    fn test_unreachable_runtime_reports_unknown() {
        let fs = MockFileSystem::new().with_dir("/work/.sbx/dev/config");
        let (ctx, output) = ctx_with(fs, MockContainerRuntime::unreachable("daemon down"));

        let state =
            StatusCommand::run(&ctx, &args(Some("sbx-dev")), &EnvOverrides::default(), Path::new("/work")).unwrap();

        assert_eq!(state, StatusOutcome::Unknown);
        assert_eq!(output.get_warnings().len(), 1);
        assert!(output.contains_message(&OutputMessage::State("unknown".to_string())));
        assert!(!output.contains_message(&OutputMessage::State("built".to_string())));
    }

    #[test]
    fn test_unreachable_runtime_without_project_is_uninitialized() {
        let (ctx, output) = ctx_with(MockFileSystem::new(), MockContainerRuntime::unreachable("daemon down"));
        let state = StatusCommand::run(&ctx, &args(None), &EnvOverrides::default(), Path::new("/work")).unwrap();
        assert_eq!(state, StatusOutcome::Known(EnvironmentState::Uninitialized));
        assert!(output.get_warnings().is_empty());
    }
}
