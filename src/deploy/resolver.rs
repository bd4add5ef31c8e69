//! End-to-end negotiation of a deployment's inputs.

use crate::config::{ConfigStore, GlobalConfig, StoredDefaults};
use crate::context::Context;
use crate::deploy::config_diff::{self, DiffView};
use crate::deploy::field::{Candidate, Field, FieldResolver, FieldValue, Settle};
use crate::deploy::inputs::given;
use crate::deploy::probe::{self, RUNTIME_CONFIG_MOUNT, RuntimeProbe, RuntimeStack};
use crate::deploy::reconcile::{ConflictCase, Inference, Reconciler};
use crate::deploy::template::{
    self, MANUAL_ENTRY_OPTION, TemplateParameter, build_suggestions, discover_candidates,
    load_history, normalize_template_path,
};
use crate::deploy::{
    CarriedInputs, DeployInputError, DeploymentInputSet, EnvOverrides, InitialFlags, RuntimeMode,
    ValueChoice, ValueSource,
};
use crate::traits::{ContainerInstance, SelectOption};
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};

pub const DEFAULT_OUTPUT_DIR: &str = ".sbx";
const PROJECT_PREFIX: &str = "sbx";

/// Where the negotiation currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverPhase {
    CollectingTemplate,
    CollectingStack,
    CollectingEnv,
    CollectingMode,
    CollectingOutput,
    CollectingParameters,
    Confirming,
    Resolved,
}

/// Everything the resolver starts from
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    pub flags: InitialFlags,
    pub env_overrides: EnvOverrides,
    pub working_dir: PathBuf,
    /// Settings file; `None` disables stored defaults entirely
    pub config_path: Option<PathBuf>,
}

/// Default compose project for an environment
pub fn default_project(env: &str) -> String {
    let env = env.trim().to_lowercase();
    let env = if env.is_empty() { "default".to_string() } else { env };
    format!("{}-{}", PROJECT_PREFIX, env)
}

fn describe<T: FieldValue>(choice: &ValueChoice<T>) -> String {
    let value = choice.value.render();
    let value = if value.is_empty() { "''".to_string() } else { value };
    format!("{} ({})", value, choice.source)
}

pub struct InputResolver<'a> {
    ctx: &'a Context,
    request: ResolveRequest,
    phase: ResolverPhase,
    /// Config directory the live gateway serves, when it has one mounted
    live_config: Option<PathBuf>,
}

impl<'a> InputResolver<'a> {
    pub fn new(ctx: &'a Context, request: ResolveRequest) -> Self {
        Self {
            ctx,
            request,
            phase: ResolverPhase::CollectingTemplate,
            live_config: None,
        }
    }

    pub fn phase(&self) -> ResolverPhase {
        self.phase
    }

    fn enter(&mut self, phase: ResolverPhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "resolver phase");
        self.phase = phase;
    }

    fn interactive(&self) -> bool {
        self.request.flags.interactive
    }

    fn fields(&self) -> FieldResolver<'a> {
        FieldResolver::new(
            self.ctx.input.as_ref(),
            self.ctx.output.as_ref(),
            self.request.flags.interactive,
        )
    }

    fn reconciler(&self) -> Reconciler<'a> {
        Reconciler::new(self.ctx.input.as_ref(), self.ctx.output.as_ref())
    }

    /// Negotiate inputs until the operator proceeds.
    ///
    /// Stored defaults are read once up front and written once after the
    /// final confirmation; an abort at any step writes nothing.
    pub fn resolve(&mut self) -> Result<DeploymentInputSet> {
        let ctx = self.ctx;
        let store = self
            .request
            .config_path
            .clone()
            .map(|path| ConfigStore::new(ctx.fs.as_ref(), path));
        let (mut config, writable) = match &store {
            Some(store) => match store.load() {
                Ok(config) => (config, true),
                Err(err) => {
                    ctx.output.warning(&format!(
                        "Ignoring unreadable config {}: {:#}",
                        store.path().display(),
                        err
                    ));
                    (GlobalConfig::new(), false)
                }
            },
            None => (GlobalConfig::new(), false),
        };

        let mut carried = CarriedInputs::default();
        loop {
            let set = self.run_pass(&config, &carried)?;

            self.enter(ResolverPhase::Confirming);
            self.show_summary(&set);
            if self.confirm()? {
                self.enter(ResolverPhase::Resolved);
                if let Some(store) = &store
                    && writable
                    && !self.request.flags.no_save
                {
                    self.persist(store, &mut config, &set);
                }
                return Ok(set);
            }
            carried = CarriedInputs::from(&set);
        }
    }

    fn persist(&self, store: &ConfigStore<'_>, config: &mut GlobalConfig, set: &DeploymentInputSet) {
        config.remember(
            &set.template.value,
            StoredDefaults {
                env: set.env.value.clone(),
                mode: set.mode.value.as_str().to_string(),
                output_dir: set.output_dir.value.render(),
                params: set.param_values(),
            },
        );
        if let Err(err) = store.save(config) {
            self.ctx
                .output
                .warning(&format!("Failed to save deploy defaults: {:#}", err));
        }
    }

    fn run_pass(&mut self, config: &GlobalConfig, carried: &CarriedInputs) -> Result<DeploymentInputSet> {
        self.enter(ResolverPhase::CollectingTemplate);
        let template = self.resolve_template(config, carried)?;
        let stored = config.defaults_for(&template.value).cloned().unwrap_or_default();

        self.enter(ResolverPhase::CollectingStack);
        let stack = self.select_stack(carried)?;
        let gateway = stack.as_ref().and_then(|s| self.inspect_gateway(s));
        self.live_config = gateway
            .as_ref()
            .and_then(|g| g.bind_mount(RUNTIME_CONFIG_MOUNT))
            .map(|m| m.source.clone());

        self.enter(ResolverPhase::CollectingEnv);
        let staging_root = self.staging_root(&template.value, carried, &stored);
        let env = self.resolve_env(carried, &stored, stack.as_ref(), gateway.as_ref(), &staging_root)?;
        let project = self.resolve_project(carried, &env.value, stack.as_ref())?;

        self.enter(ResolverPhase::CollectingMode);
        let mode = self.resolve_mode(carried, &stored, stack.as_ref())?;

        self.enter(ResolverPhase::CollectingOutput);
        let output_dir = self.resolve_output(carried, &stored, &env.value)?;

        self.enter(ResolverPhase::CollectingParameters);
        let params = self.resolve_parameters(carried, &stored, &template.value)?;

        Ok(DeploymentInputSet {
            template,
            stack: stack.map(|s| s.name),
            project,
            env,
            mode,
            output_dir,
            params,
        })
    }

    /// A flag or env var value that had to be parsed; bad values fail
    /// unattended runs and are dropped with a warning otherwise
    fn sourced<T>(
        &self,
        raw: Option<&str>,
        source: ValueSource,
        parse: impl Fn(&str) -> Result<T>,
    ) -> Result<Option<ValueChoice<T>>> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        match parse(raw) {
            Ok(value) => Ok(Some(ValueChoice::new(value, source))),
            Err(err) if self.interactive() => {
                self.ctx.output.warning(&format!("{:#}", err));
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn resolve_template(&self, config: &GlobalConfig, carried: &CarriedInputs) -> Result<ValueChoice<PathBuf>> {
        let fs = self.ctx.fs.as_ref();
        let working_dir = self.request.working_dir.as_path();
        let parse = |raw: &str| normalize_template_path(fs, raw, working_dir);

        let mut chain: Vec<Candidate<PathBuf>> = Vec::new();
        if carried.is_editing() {
            chain.extend(carried.template.clone().map(Candidate::suggested));
        } else {
            let flags = &self.request.flags;
            let overrides = &self.request.env_overrides;
            chain.extend(
                self.sourced(given(&flags.template), ValueSource::Flag, parse)?
                    .map(Candidate::settled),
            );
            chain.extend(
                self.sourced(given(&overrides.template), ValueSource::EnvVar, parse)?
                    .map(Candidate::settled),
            );
        }
        let hit = chain.into_iter().next();

        let mut field = Field::new("template", "Template path", parse);
        let wants_prompt = hit.as_ref().is_none_or(|c| c.settle == Settle::Suggest);
        if self.interactive() && wants_prompt {
            let history = load_history(fs, &config.recent_templates, crate::config::RECENT_TEMPLATE_LIMIT);
            let candidates = discover_candidates(fs, working_dir);
            let previous = carried.template.as_ref().map(|t| t.value.render());
            let suggestions = build_suggestions(previous.as_deref(), &history, &candidates);
            if !suggestions.is_empty() {
                field = field
                    .options(suggestions.clone())
                    .manual_option(MANUAL_ENTRY_OPTION);
            }
            field = field.suggestions(suggestions);
        }
        self.fields().settle(field, hit)
    }

    fn select_stack(&self, carried: &CarriedInputs) -> Result<Option<RuntimeStack>> {
        let probe = RuntimeProbe::new(self.ctx.runtime.as_ref());
        let stacks = match probe.discover() {
            Ok(stacks) => stacks,
            Err(err) => {
                self.ctx.output.warning(&format!(
                    "Could not inspect running containers; assuming no live stack ({:#})",
                    err
                ));
                tracing::warn!(error = %format!("{:#}", err), "runtime probe failed");
                Vec::new()
            }
        };
        if stacks.is_empty() {
            return Ok(None);
        }

        if !carried.is_editing() {
            let asserted = given(&self.request.flags.project).or(given(&self.request.env_overrides.project));
            if let Some(project) = asserted {
                let found = stacks.iter().find(|s| s.matches(project)).cloned();
                if found.is_none() {
                    tracing::debug!(project, "asserted project has no live stack; deploying cold");
                }
                return Ok(found);
            }
        }

        if stacks.len() == 1 {
            let stack = stacks.into_iter().next();
            if let Some(found) = &stack {
                self.ctx
                    .output
                    .info(&format!("Found running stack {}", found.name));
            }
            return Ok(stack);
        }

        let names: Vec<String> = stacks.iter().map(|s| s.name.clone()).collect();
        if !self.interactive() {
            return Err(DeployInputError::MultipleLiveStacks { stacks: names }.into());
        }
        let mut options = names;
        if let Some(previous) = carried.stack.as_ref()
            && let Some(index) = options.iter().position(|n| n == previous)
        {
            let previous = options.remove(index);
            options.insert(0, previous);
        }
        let picked = self.ctx.input.select("Target stack (running)", options)?;
        Ok(stacks.into_iter().find(|s| s.name == picked))
    }

    fn inspect_gateway(&self, stack: &RuntimeStack) -> Option<ContainerInstance> {
        let probe = RuntimeProbe::new(self.ctx.runtime.as_ref());
        match probe.gateway(stack.project()) {
            Ok(gateway) => gateway,
            Err(err) => {
                self.ctx
                    .output
                    .warning(&format!("Failed to inspect running gateway: {:#}", err));
                None
            }
        }
    }

    /// Output root the environments are staged under, before the output
    /// field itself is settled: the asserted or stored directory, else the default
    fn staging_root(&self, template_path: &Path, carried: &CarriedInputs, stored: &StoredDefaults) -> PathBuf {
        let asserted = if carried.is_editing() {
            carried.output_dir.as_ref().map(|o| o.value.render())
        } else {
            given(&self.request.flags.output)
                .or(given(&self.request.env_overrides.output))
                .map(str::to_string)
        };
        let raw = asserted
            .or_else(|| Some(stored.output_dir.trim().to_string()).filter(|o| !o.is_empty()))
            .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string());
        let output = template::expand_home(&raw).unwrap_or_else(|_| PathBuf::from(&raw));
        let output = match template_path.parent() {
            Some(base) if !output.is_absolute() => base.join(output),
            _ => output,
        };
        template::clean_path(&output)
    }

    /// Resolve a field that the runtime may also have an opinion on.
    ///
    /// Without an inference this is an ordinary chain lookup. With one, the
    /// chain's value is weighed against it. On an edit pass the operator first
    /// gets to change the carried value; a kept value they already asserted
    /// is not questioned again.
    fn resolve_reconciled<T>(
        &self,
        mut field: Field<'_, T>,
        inferred: Option<Inference<T>>,
        editing: bool,
    ) -> Result<ValueChoice<T>>
    where
        T: FieldValue + Display,
    {
        let Some(inferred) = inferred else {
            return self.fields().resolve(field);
        };
        let name = field.name().to_string();
        let hit = field.lookup();

        let asserted = if editing {
            let carried = hit.as_ref().map(|c| c.choice.clone());
            let answer = self.fields().settle(field, hit)?;
            if answer.explicit && carried.as_ref() == Some(&answer) {
                return Ok(answer);
            }
            Some(answer)
        } else {
            hit.map(|c| c.choice)
        };

        self.reconciler()
            .reconcile(ConflictCase {
                field: &name,
                asserted,
                inferred: Some(inferred),
                interactive: self.interactive(),
                force: self.request.flags.force,
            })?
            .ok_or_else(|| DeployInputError::missing(&name).into())
    }

    fn resolve_env(
        &self,
        carried: &CarriedInputs,
        stored: &StoredDefaults,
        stack: Option<&RuntimeStack>,
        gateway: Option<&ContainerInstance>,
        staging_root: &Path,
    ) -> Result<ValueChoice<String>> {
        let text = |raw: &str| -> Result<String> { Ok(raw.to_string()) };
        let mut field = Field::new("env", "Environment name", text);

        if let Some(previous) = &carried.env {
            let previous = previous.clone();
            field = field.step(move || Some(Candidate::suggested(previous)));
        } else {
            let flag = given(&self.request.flags.env).map(str::to_string);
            let env_var = given(&self.request.env_overrides.env).map(str::to_string);
            let stored = Some(stored.env.trim().to_string()).filter(|e| !e.is_empty());
            field = field
                .step(move || flag.map(|v| Candidate::settled(ValueChoice::flag(v))))
                .step(move || env_var.map(|v| Candidate::settled(ValueChoice::env_var(v))))
                .step(move || stored.map(|v| Candidate::suggested(ValueChoice::stored(v))));
        }

        let inferred = stack.and_then(|s| {
            probe::infer_env(self.ctx.fs.as_ref(), s, gateway, staging_root)
                .map(|found| Inference::new(found.env, format!("stack {}, {}", s.name, found.provenance)))
        });
        self.resolve_reconciled(field, inferred, carried.is_editing())
    }

    fn resolve_project(
        &self,
        carried: &CarriedInputs,
        env: &str,
        stack: Option<&RuntimeStack>,
    ) -> Result<ValueChoice<String>> {
        let text = |raw: &str| -> Result<String> { Ok(raw.to_string()) };
        let mut field = Field::new("project", "Compose project", text);

        if let Some(previous) = &carried.project {
            let previous = previous.clone();
            field = field.step(move || Some(Candidate::suggested(previous)));
        } else {
            let flag = given(&self.request.flags.project).map(str::to_string);
            let env_var = given(&self.request.env_overrides.project).map(str::to_string);
            field = field
                .step(move || flag.map(|v| Candidate::settled(ValueChoice::flag(v))))
                .step(move || env_var.map(|v| Candidate::settled(ValueChoice::env_var(v))));
        }

        // Naming the stack instead of its project label is not a disagreement
        let inferred = stack.map(|s| {
            Inference::new(s.project().to_string(), format!("stack {}", s.name)).with_alias(s.name.clone())
        });
        if inferred.is_none() {
            let computed = default_project(env);
            field = field.step(move || Some(Candidate::suggested(ValueChoice::computed(computed))));
        }
        self.resolve_reconciled(field, inferred, carried.is_editing())
    }

    fn resolve_mode(
        &self,
        carried: &CarriedInputs,
        stored: &StoredDefaults,
        stack: Option<&RuntimeStack>,
    ) -> Result<ValueChoice<RuntimeMode>> {
        let parse = |raw: &str| -> Result<RuntimeMode> { Ok(raw.parse::<RuntimeMode>()?) };
        let options = RuntimeMode::ALL.iter().map(|m| m.to_string()).collect();
        let mut field = Field::new("mode", "Runtime mode", parse).options(options);

        if let Some(previous) = &carried.mode {
            let previous = previous.clone();
            field = field.step(move || Some(Candidate::suggested(previous)));
        } else {
            let flags = &self.request.flags;
            let overrides = &self.request.env_overrides;
            let flag = self.sourced(given(&flags.mode), ValueSource::Flag, parse)?;
            let env_var = self.sourced(given(&overrides.mode), ValueSource::EnvVar, parse)?;
            let stored = stored.mode.trim().parse::<RuntimeMode>().ok().map(ValueChoice::stored);
            field = field
                .step(move || flag.map(Candidate::settled))
                .step(move || env_var.map(Candidate::settled))
                .step(move || stored.map(Candidate::suggested));
        }

        let inferred = match stack {
            Some(stack) => self.infer_mode(stack),
            None => None,
        };
        if inferred.is_none() {
            field = field.step(|| {
                Some(Candidate::suggested(ValueChoice::computed(
                    RuntimeMode::ProcessIsolated,
                )))
            });
        }
        self.resolve_reconciled(field, inferred, carried.is_editing())
    }

    fn infer_mode(&self, stack: &RuntimeStack) -> Option<Inference<RuntimeMode>> {
        let probe = RuntimeProbe::new(self.ctx.runtime.as_ref());
        match probe.infer_mode(stack.project()) {
            Ok(found) => found.map(|m| Inference::new(m.mode, format!("stack {}, {}", stack.name, m.provenance))),
            Err(err) => {
                self.ctx
                    .output
                    .warning(&format!("Failed to infer runtime mode: {:#}", err));
                None
            }
        }
    }

    fn resolve_output(
        &self,
        carried: &CarriedInputs,
        stored: &StoredDefaults,
        env: &str,
    ) -> Result<ValueChoice<PathBuf>> {
        let parse = |raw: &str| -> Result<PathBuf> {
            let trimmed = raw.trim_end_matches(['/', '\\']);
            Ok(template::clean_path(&template::expand_home(trimmed)?))
        };
        let mut field = Field::new("output", "Output directory", parse);

        if let Some(previous) = &carried.output_dir {
            let previous = previous.clone();
            field = field.step(move || Some(Candidate::suggested(previous)));
        } else {
            let flags = &self.request.flags;
            let overrides = &self.request.env_overrides;
            let flag = self.sourced(given(&flags.output), ValueSource::Flag, parse)?;
            let env_var = self.sourced(given(&overrides.output), ValueSource::EnvVar, parse)?;
            field = field
                .step(move || flag.map(Candidate::settled))
                .step(move || env_var.map(Candidate::settled));
        }

        // A stored directory belongs to the environment it was stored with
        let stored_output = Some(stored.output_dir.trim())
            .filter(|o| !o.is_empty() && stored.env.trim() == env)
            .map(|o| ValueChoice::stored(PathBuf::from(o)));
        field = field
            .step(move || stored_output.map(Candidate::suggested))
            .step(|| {
                Some(Candidate::suggested(ValueChoice::computed(PathBuf::from(
                    DEFAULT_OUTPUT_DIR,
                ))))
            });

        self.fields().resolve(field)
    }

    fn resolve_parameters(
        &self,
        carried: &CarriedInputs,
        stored: &StoredDefaults,
        template: &Path,
    ) -> Result<BTreeMap<String, ValueChoice<String>>> {
        let params = template::load_parameters(self.ctx.fs.as_ref(), template)?;
        let editing = carried.is_editing();

        if !editing {
            for (name, _) in &self.request.flags.params {
                if !params.iter().any(|p| &p.name == name) {
                    self.ctx.output.warning(&format!(
                        "Ignoring --param {}: the template declares no such parameter",
                        name
                    ));
                }
            }
        }

        let mut values = BTreeMap::new();
        for param in &params {
            let flag = if editing {
                None
            } else {
                self.request
                    .flags
                    .params
                    .iter()
                    .rev()
                    .find(|(name, _)| name == &param.name)
                    .map(|(_, value)| value.trim().to_string())
            };
            let previous = carried.params.get(&param.name).cloned();
            let stored_value = stored.params.get(&param.name).map(|v| v.trim().to_string());
            let choice = self.resolve_parameter(param, flag, previous, stored_value)?;
            values.insert(param.name.clone(), choice);
        }
        Ok(values)
    }

    fn resolve_parameter(
        &self,
        param: &TemplateParameter,
        flag: Option<String>,
        previous: Option<ValueChoice<String>>,
        stored: Option<String>,
    ) -> Result<ValueChoice<String>> {
        let label = param.label();
        let has_default = param.default.is_some();
        let allows_empty = param.allows_empty();
        let template_default = param.default.clone();
        let optional = allows_empty && !has_default;

        let field = Field::new(format!("parameter {}", param.name), label.clone(), |raw: &str| {
            Ok(raw.to_string())
        })
        .titled(move |default: Option<&ValueChoice<String>>| match default {
            Some(d) if d.source == ValueSource::ComputedDefault && has_default => {
                let shown = if d.value.is_empty() { "''" } else { d.value.as_str() };
                format!("{} [Default: {}]", label, shown)
            }
            Some(d) if d.source == ValueSource::ComputedDefault => {
                format!("{} [Optional: empty allowed]", label)
            }
            Some(d) => format!("{} [Previous: {}]", label, d.value),
            None if allows_empty => format!("{} [Optional: empty allowed]", label),
            None => format!("{} [Required]", label),
        })
        .suggestions(param.allowed_values.iter().filter(|v| !v.is_empty()).cloned().collect())
        .check(|value: &String| Ok(param.validate(value)?))
        .step(move || flag.map(|v| Candidate::settled(ValueChoice::flag(v))))
        .step(move || previous.map(Candidate::suggested))
        .step(move || {
            stored
                .filter(|v| !v.is_empty())
                .map(|v| Candidate::suggested(ValueChoice::stored(v)))
        })
        .step(move || template_default.map(|v| Candidate::suggested(ValueChoice::computed(v))))
        .step(move || optional.then(|| Candidate::suggested(ValueChoice::computed(String::new()))));

        self.fields().resolve(field)
    }

    fn show_summary(&self, set: &DeploymentInputSet) {
        let out = self.ctx.output.as_ref();
        out.section("Review inputs");
        out.key_value("Stack", set.stack.as_deref().unwrap_or("(none)"));
        out.key_value("Project", &describe(&set.project));
        out.key_value("Env", &describe(&set.env));
        out.key_value("Mode", &describe(&set.mode));
        out.key_value("Template", &describe(&set.template));
        out.key_value("Output", &set.resolved_output_dir().render());

        let staged = set.staged_config_dir();
        out.key_value("Staging config", &staged.render());

        if !set.params.is_empty() {
            out.subsection("Parameters");
            for (name, choice) in &set.params {
                out.key_value(name, &describe(choice));
            }
        }

        if !self.ctx.fs.is_dir(&staged) {
            return;
        }
        let Some(live) = self.live_config.as_ref().filter(|dir| self.ctx.fs.is_dir(dir)) else {
            out.dimmed("No running config to compare the staged config against");
            return;
        };
        match config_diff::diff_config(self.ctx.fs.as_ref(), live, &staged) {
            Ok(diff) => {
                let view = DiffView::TemplateDelta;
                out.subsection(view.title());
                out.key_value("Running config", &live.render());
                for (key, counts) in diff.rows() {
                    out.key_value(&key, &view.format(&counts));
                }
            }
            Err(err) => out.warning(&format!("Could not compare staged config: {:#}", err)),
        }
    }

    fn confirm(&self) -> Result<bool> {
        if !self.interactive() {
            return Ok(true);
        }
        let choice = self.ctx.input.select_value(
            "Proceed with these inputs?",
            vec![
                SelectOption::new("Proceed", "proceed"),
                SelectOption::new("Edit", "edit"),
            ],
        )?;
        Ok(choice == "proceed")
    }
}
