use crate::config;
use crate::context::Context;
use crate::deploy::{DeploymentInputSet, EnvOverrides, InitialFlags, InputResolver, ResolveRequest};
use crate::deploy::field::FieldValue;
use anyhow::{Context as AnyhowContext, Result};

/// Handles the 'deploy' command - negotiates the deployment inputs
pub struct DeployCommand;

impl DeployCommand {
    /// Execute the deploy command against the current process environment
    pub fn execute(ctx: &Context, flags: InitialFlags) -> Result<()> {
        let working_dir = std::env::current_dir().context("Failed to determine current directory")?;
        let config_path = match config::config_path(|key| std::env::var(key).ok()) {
            Ok(path) => Some(path),
            Err(err) => {
                ctx.output
                    .warning(&format!("Deploy defaults disabled: {:#}", err));
                None
            }
        };

        let request = ResolveRequest {
            flags,
            env_overrides: EnvOverrides::from_process(),
            working_dir,
            config_path,
        };
        Self::run(ctx, request)?;
        Ok(())
    }

    /// Resolve the inputs and print the plan
    pub fn run(ctx: &Context, request: ResolveRequest) -> Result<DeploymentInputSet> {
        tracing::debug!(interactive = request.flags.interactive, "resolving deployment inputs");
        let set = InputResolver::new(ctx, request).resolve()?;

        ctx.output.section("Deployment plan");
        ctx.output
            .key_value_highlight("Project", &set.project.value);
        ctx.output.environment_badge(&set.env.value);
        ctx.output.key_value("Mode", &format!(
            "{} ({})",
            set.mode.value,
            set.mode.value.runtime_name()
        ));
        if let Some(stack) = &set.stack {
            ctx.output.key_value("Live stack", stack);
        }
        ctx.output.key_value("Template", &set.template.value.render());
        ctx.output
            .key_value("Staging config", &set.staged_config_dir().render());
        ctx.output.blank();
        ctx.output.success("Deployment inputs confirmed");

        Ok(set)
    }
}
