//! # oidc-deploy CLI
//!
//! Command tree and the pieces shared by every sub-command: run flags,
//! confirmation prompt, Ctrl-C cancellation and report printing.
//!
//! ## Usage
//!
//! ```bash
//! # Register applications, API and grants with Auth0
//! oidc-deploy setup-oidc --domain tenant.auth0.com --api-identifier https://mcp.example.com/mcp
//!
//! # Service account and read-only cluster role
//! oidc-deploy setup-rbac --namespace mcp
//!
//! # Credentials and signing-key Secrets for a Helm release
//! oidc-deploy create-secrets --namespace mcp --release-name mcp
//!
//! # Allow a user to sign in to the server application
//! oidc-deploy add-user --email ada@example.com --client-type server
//!
//! # Local config, Helm values and .env from an existing application
//! oidc-deploy make-config --server-name "My MCP Server" --domain tenant.auth0.com
//! ```

mod add_user;
mod create_secrets;
mod make_config;
mod setup_oidc;
mod setup_rbac;

use crate::config::{DeploymentConfig, Settings};
use crate::observability::LogFormat;
use crate::reconciler::{CancellationFlag, ReconcileOptions};
use crate::report::{ActionTaken, FailureKind, ReconciliationReport};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::warn;

/// Idempotent setup for OIDC-authenticated MCP servers on Kubernetes
#[derive(Debug, Parser)]
#[command(
    name = "oidc-deploy",
    version,
    long_version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("BUILD_GIT_HASH"),
        ", built ",
        env!("BUILD_DATETIME"),
        ")"
    ),
    about,
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format written to stderr
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Timeout for each remote call, in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Saved deployment config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure the identity provider and write oidc-config.json and Helm values
    SetupOidc(setup_oidc::SetupOidcArgs),
    /// Create (or delete) the server's ServiceAccount, role and binding
    SetupRbac(setup_rbac::SetupRbacArgs),
    /// Create the credentials and signing-key Secrets for a Helm release
    CreateSecrets(create_secrets::CreateSecretsArgs),
    /// Add client IDs to a user's allowed clients
    AddUser(add_user::AddUserArgs),
    /// Write config, Helm values and .env locally from existing credentials
    MakeConfig(make_config::MakeConfigArgs),
}

/// Flags shared by every command that touches remote state
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Look up remote state and report what would change without changing it
    #[arg(long)]
    pub dry_run: bool,

    /// Keep going when a lookup fails instead of aborting the run
    #[arg(long)]
    pub continue_on_error: bool,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Write the redacted run report as JSON to this path
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

impl RunArgs {
    /// Reconcile options with the cancellation flag wired to Ctrl-C
    #[must_use]
    pub fn options(&self, context: &CommandContext) -> ReconcileOptions {
        ReconcileOptions::new()
            .dry_run(self.dry_run)
            .continue_on_error(self.continue_on_error)
            .call_timeout(context.call_timeout)
            .cancel_with(context.cancel.clone())
    }

    /// Ask before mutating anything; dry runs never ask
    pub fn confirm(&self, question: &str) -> Result<bool> {
        if self.dry_run || self.yes {
            return Ok(true);
        }
        confirm(question)
    }
}

/// Settings resolved once before a command runs
#[derive(Debug)]
pub struct CommandContext {
    pub settings: Settings,
    pub config_file: PathBuf,
    pub call_timeout: Duration,
    pub cancel: CancellationFlag,
}

impl CommandContext {
    /// Saved deployment config, if one has been written
    pub fn load_config(&self) -> Result<Option<DeploymentConfig>> {
        DeploymentConfig::load(&self.config_file)
    }
}

/// Run the parsed command line
pub async fn run(cli: Cli, settings: Settings) -> Result<ExitCode> {
    let config_file = cli
        .config_file
        .clone()
        .unwrap_or_else(|| settings.config_file.clone());
    let call_timeout = Duration::from_secs(cli.timeout.unwrap_or(settings.call_timeout_secs));
    let context = CommandContext {
        settings,
        config_file,
        call_timeout,
        cancel: CancellationFlag::new(),
    };
    cancel_on_ctrl_c(context.cancel.clone());

    match cli.command {
        Command::SetupOidc(args) => setup_oidc::run(&args, &context).await,
        Command::SetupRbac(args) => setup_rbac::run(&args, &context).await,
        Command::CreateSecrets(args) => create_secrets::run(&args, &context).await,
        Command::AddUser(args) => add_user::run(&args, &context).await,
        Command::MakeConfig(args) => make_config::run(&args, &context),
    }
}

/// Set `cancel` on the first Ctrl-C; the run stops before its next step
fn cancel_on_ctrl_c(cancel: CancellationFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n⚠️  Interrupted: finishing the current step, then stopping");
            cancel.cancel();
        }
    });
}

/// Prompt on stdout and read a yes/no answer from stdin
pub fn confirm(question: &str) -> Result<bool> {
    print!("{question} (y/N): ");
    io::stdout().flush().context("Failed to flush stdout")?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read answer from stdin")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Namespace of the current kube context, or `default`
pub async fn current_namespace() -> String {
    match kube::Config::infer().await {
        Ok(config) => config.default_namespace,
        Err(e) => {
            warn!("Could not read kube config ({}), using namespace 'default'", e);
            "default".to_string()
        }
    }
}

fn action_icon(action: ActionTaken) -> &'static str {
    match action {
        ActionTaken::Created | ActionTaken::Updated | ActionTaken::Deleted => "✅",
        ActionTaken::SkippedExisting | ActionTaken::AlreadyAbsent => "⏭️ ",
        ActionTaken::WouldCreate
        | ActionTaken::WouldUpdate
        | ActionTaken::WouldSkip
        | ActionTaken::WouldDelete => "🔍",
        ActionTaken::Failed => "❌",
        ActionTaken::SkippedDependencyFailed => "⚠️ ",
        ActionTaken::None => "⏸️ ",
    }
}

/// Print one line per result, then failures with their detail and the totals
pub fn print_report(report: &ReconciliationReport) {
    println!();
    for result in &report.results {
        println!(
            "{} {:<26} {}",
            action_icon(result.action),
            result.action.as_str(),
            result.resource
        );
    }

    let problems: Vec<_> = report
        .results
        .iter()
        .filter(|r| r.error.is_some())
        .collect();
    if !problems.is_empty() {
        println!("\n❌ Problems:");
        for result in problems {
            if let Some(error) = &result.error {
                println!("   {} [{}]: {}", result.resource, error.kind, error.message);
            }
        }
        if report
            .failures()
            .iter()
            .any(|r| r.error.as_ref().is_some_and(|e| e.kind == FailureKind::AmbiguousPartialFailure))
        {
            println!("   ⚠️  Some changes may have been applied remotely; verify them before rerunning.");
        }
    }

    if report.canceled {
        println!("\n⏸️  Run canceled; {} resource(s) not attempted", report.pending.len());
    }

    let counts: Vec<String> = report
        .counts()
        .into_iter()
        .map(|(action, n)| format!("{action}: {n}"))
        .collect();
    println!("\n📊 {}", counts.join(", "));
}

/// Write the report if requested and map success to the exit status
pub fn finish(report: &ReconciliationReport, args: &RunArgs) -> Result<ExitCode> {
    print_report(report);
    if let Some(path) = &args.report {
        crate::output::write_report(path, report)?;
        println!("📝 Report written to {}", path.display());
    }
    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
