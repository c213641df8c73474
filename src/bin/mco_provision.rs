//! mco-provision command line
//!
//! ```bash
//! # Check a declaration without touching anything
//! mco-provision validate site.json
//!
//! # Show what a run would change
//! mco-provision plan site.json
//!
//! # Converge this host as a client
//! mco-provision apply site.json --catalog /srv/shared/mco-catalog
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use mco_provision::collab::{
    AptPackageInstaller, ClientCfgRenderer, LocalFileWriter, SystemCommandExecutor,
};
use mco_provision::credentials::KeyTool;
use mco_provision::plan::{DirectoryCatalog, Outcome};
use mco_provision::reconcile::{check_declaration, IdentityStatus};
use mco_provision::{Collaborators, JsonConfigStore, Reconciler, Role, RunOptions, RunReport};

const DEFAULT_CATALOG: &str = "/var/lib/mco-provision/catalog";

#[derive(Parser)]
#[command(name = "mco-provision")]
#[command(version)]
#[command(about = "Provision messaging client configuration and credentials")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RoleArg {
    Client,
    Server,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Client => Role::Client,
            RoleArg::Server => Role::Server,
        }
    }
}

#[derive(clap::Args)]
struct RunArgs {
    /// JSON declaration
    config: PathBuf,

    #[arg(long, value_enum, default_value = "client")]
    role: RoleArg,

    /// Service tier to apply (defaults to the role name)
    #[arg(long)]
    service_class: Option<String>,

    /// Shared publish/realize catalog directory
    #[arg(long, default_value = DEFAULT_CATALOG)]
    catalog: PathBuf,

    /// Report the plan without applying it
    #[arg(long)]
    noop: bool,

    /// Leave the package alone
    #[arg(long)]
    no_package: bool,

    /// Leave the system-wide client.cfg alone
    #[arg(long)]
    no_system_config: bool,

    /// Converge file owner and group (needs root)
    #[arg(long)]
    manage_ownership: bool,

    /// Key tool binary
    #[arg(long, default_value = "openssl")]
    key_tool: String,

    /// Catalog lookups before a realize is deferred
    #[arg(long, default_value_t = 3)]
    realize_attempts: u32,

    /// Seconds between catalog lookups
    #[arg(long, default_value_t = 5)]
    realize_interval: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and resolve a declaration
    Validate {
        config: PathBuf,

        #[arg(long, default_value = "client")]
        service_class: String,
    },

    /// Show what apply would do
    Plan(RunArgs),

    /// Converge this host
    Apply(RunArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::Validate {
            config,
            service_class,
        } => cmd_validate(&config, &service_class),
        Commands::Plan(args) => cmd_run(args, true).await,
        Commands::Apply(args) => cmd_run(args, false).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load(config: &Path) -> Result<JsonConfigStore> {
    JsonConfigStore::load(config).with_context(|| format!("loading {}", config.display()))
}

fn cmd_validate(config: &Path, service_class: &str) -> Result<bool> {
    let store = load(config)?;
    let checks = check_declaration(&store, service_class)?;

    let mut ok = true;
    for check in &checks {
        match &check.error {
            None => println!("ok      {}", check.name),
            Some(e) => {
                ok = false;
                println!("invalid {}: {}", check.name, e);
            }
        }
    }
    println!("{} identities checked", checks.len());
    Ok(ok)
}

async fn cmd_run(args: RunArgs, force_noop: bool) -> Result<bool> {
    let store = load(&args.config)?;

    let publisher = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    let collab = Collaborators {
        installer: Arc::new(AptPackageInstaller::new()),
        writer: Arc::new(LocalFileWriter::new().with_ownership(args.manage_ownership)),
        executor: Arc::new(SystemCommandExecutor::new()),
        catalog: Arc::new(DirectoryCatalog::new(args.catalog.clone(), &publisher)),
    };

    let options = RunOptions {
        role: args.role.into(),
        service_class: args.service_class,
        noop: force_noop || args.noop,
        manage_package: !args.no_package,
        manage_system_config: !args.no_system_config,
        realize_attempts: args.realize_attempts,
        realize_interval: Duration::from_secs(args.realize_interval),
        key_tool: KeyTool::new(&args.key_tool),
    };

    let reconciler = Reconciler::new(collab, Arc::new(ClientCfgRenderer::new()), options);
    let report = reconciler.run(&store).await?;
    print_report(&report);
    Ok(report.is_success())
}

fn print_report(report: &RunReport) {
    println!("run {} ({})", report.run_id, report.role);
    print_actions("system", &report.system.actions);
    for identity in &report.identities {
        let status = match &identity.status {
            IdentityStatus::Converged => "converged".to_string(),
            IdentityStatus::Pending => "pending".to_string(),
            IdentityStatus::Planned => "planned".to_string(),
            IdentityStatus::Failed(reason) => format!("failed: {}", reason),
            IdentityStatus::Invalid(e) => format!("invalid: {}", e),
            IdentityStatus::Conflict { with } => format!("conflicts with {}", with),
        };
        println!("{}: {}", identity.name, status);
        if let Some(apply) = &identity.apply {
            print_actions(&identity.name, &apply.actions);
        }
    }
    println!("{}", report.summary());
}

fn print_actions(scope: &str, actions: &[mco_provision::plan::ActionReport]) {
    for action in actions {
        let marker = match &action.outcome {
            Outcome::Planned => "plan",
            Outcome::Changed => "change",
            Outcome::Unchanged => continue,
            Outcome::Deferred(_) => "defer",
            Outcome::Failed(_) => "FAIL",
            Outcome::Skipped { .. } => "skip",
        };
        println!("  [{}] {} {}", scope, marker, action.description);
    }
}
