//! # oidc-deploy
//!
//! Command-line entry point. See [`oidc_deploy::cli`] for the commands.

use anyhow::Result;
use clap::Parser;
use oidc_deploy::cli::{self, Cli};
use oidc_deploy::config::Settings;
use oidc_deploy::observability::{init_tracing, LogFormat};
use std::process::ExitCode;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // kube and reqwest both use rustls; pick the ring provider before either connects
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_previous| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let cli = Cli::parse();
    let settings = Settings::from_env();

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.log_level.clone());
    let format = cli.log_format.unwrap_or_else(|| {
        settings.log_format.parse::<LogFormat>().unwrap_or_else(|e| {
            eprintln!("⚠️  {e}; using text logs");
            LogFormat::Text
        })
    });
    init_tracing(&level, format)?;
    debug!(?settings, "Loaded settings");

    cli::run(cli, settings).await
}
