mod commands;
mod config;
mod context;
mod deploy;
mod output;
mod traits;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use commands::{DeployCommand, DiffCommand, StatusArgs, StatusCommand};
use context::Context;
use deploy::InitialFlags;
use deploy::config_diff::DiffView;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sbx")]
#[command(about = "SBX - resolve and reconcile deployment inputs for local container stacks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve deployment inputs and confirm the plan
    Deploy {
        /// Template file or a directory containing template.yaml
        #[arg(short, long)]
        template: Option<String>,

        /// Environment name (e.g. dev, staging, prod)
        #[arg(short, long)]
        env: Option<String>,

        /// Runtime mode: process-isolated, kernel-isolated, micro-vm (or docker, containerd, firecracker)
        #[arg(short, long)]
        mode: Option<String>,

        /// Compose project name
        #[arg(short, long)]
        project: Option<String>,

        /// Output directory, relative to the template's directory
        #[arg(short, long)]
        output: Option<String>,

        /// Template parameter value (repeatable)
        #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Keep the given values even when the running stack disagrees
        #[arg(long)]
        force: bool,

        /// Do not remember the confirmed values as defaults
        #[arg(long)]
        no_save: bool,

        /// Never prompt; fail when a value is missing or conflicting
        #[arg(long)]
        non_interactive: bool,
    },

    /// Show the operational state of an environment
    Status {
        /// Compose project name
        #[arg(short, long)]
        project: Option<String>,

        /// Template file or directory the environment was generated from
        #[arg(short, long)]
        template: Option<String>,

        /// Environment name
        #[arg(short, long)]
        env: Option<String>,

        /// Output directory
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Summarize changes between two generated config directories
    Diff {
        /// Previously staged config directory
        before: PathBuf,

        /// Freshly generated config directory
        after: PathBuf,

        /// How to present the counts
        #[arg(long, value_enum, default_value_t = ViewArg::Merge)]
        view: ViewArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ViewArg {
    Merge,
    Template,
}

impl From<ViewArg> for DiffView {
    fn from(view: ViewArg) -> Self {
        match view {
            ViewArg::Merge => DiffView::Merge,
            ViewArg::Template => DiffView::TemplateDelta,
        }
    }
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("parameter name missing in '{}'", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SBX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    let ctx = Context::new();

    match cli.command {
        Commands::Deploy {
            template,
            env,
            mode,
            project,
            output,
            params,
            force,
            no_save,
            non_interactive,
        } => {
            let flags = InitialFlags {
                template,
                env,
                mode,
                project,
                output,
                params,
                force,
                no_save,
                interactive: !non_interactive && std::io::stdin().is_terminal(),
            };
            DeployCommand::execute(&ctx, flags)?;
        }
        Commands::Status {
            project,
            template,
            env,
            output,
        } => {
            let args = StatusArgs {
                project,
                template,
                env,
                output,
            };
            StatusCommand::execute(&ctx, &args)?;
        }
        Commands::Diff {
            before,
            after,
            view,
        } => {
            DiffCommand::execute(&ctx, &before, &after, view.into())?;
        }
    }

    Ok(())
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        output::error(&format!("{:#}", err));
        std::process::exit(1);
    }
}
