//! `make-config`: write local configuration without touching any remote system.
//!
//! Produces the saved deployment config, Helm values and a `.env` file from
//! credentials obtained elsewhere (for example an application created by hand
//! in the Auth0 dashboard), then makes sure the credential files are ignored
//! by git.

use super::setup_oidc::validate_domain;
use super::CommandContext;
use crate::config::{pick, ClientCredentials, DeploymentConfig, ProviderKind, Settings};
use crate::constants::{
    DEFAULT_CONFIG_FILE, DEFAULT_ENV_FILE, DEFAULT_HELM_VALUES_FILE, DEFAULT_SERVER_PORT,
    GITIGNORE_ENTRIES,
};
use crate::output::{append_gitignore, render_env_file, write_helm_values, write_private, LocalEnv};
use anyhow::{Context, Result};
use clap::Args;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Debug, Args)]
pub struct MakeConfigArgs {
    /// Human-readable server name, e.g. "My MCP Server"
    #[arg(long)]
    pub server_name: String,

    /// Auth0 domain (falls back to AUTH0_DOMAIN, then the saved config)
    #[arg(long)]
    pub domain: Option<String>,

    /// Server application client ID (falls back to OIDC_CLIENT_ID)
    #[arg(long)]
    pub client_id: Option<String>,

    /// Server application client secret (falls back to OIDC_CLIENT_SECRET)
    #[arg(long)]
    pub client_secret: Option<String>,

    /// API audience; derived from the server name when nothing supplies one
    #[arg(long)]
    pub audience: Option<String>,

    /// Kubernetes namespace written to .env and the printed next steps
    #[arg(short = 'n', long, default_value = "default")]
    pub namespace: String,

    /// Helm release name; derived from the server name when omitted
    #[arg(long)]
    pub release_name: Option<String>,

    /// Port the server listens on locally
    #[arg(long, default_value_t = DEFAULT_SERVER_PORT)]
    pub port: u16,

    /// Directory for the generated files
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Do not write the .env file
    #[arg(long)]
    pub skip_env: bool,

    /// Do not write the Helm values file
    #[arg(long)]
    pub skip_helm: bool,
}

pub(super) fn run(args: &MakeConfigArgs, context: &CommandContext) -> Result<ExitCode> {
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;
    let config_name = context
        .config_file
        .file_name()
        .unwrap_or_else(|| OsStr::new(DEFAULT_CONFIG_FILE));
    let config_path = args.output_dir.join(config_name);

    println!("🧩 Generating configuration for {}", args.server_name);
    let previous = DeploymentConfig::load(&config_path)?.unwrap_or_default();
    let config = build_config(args, &context.settings, previous)?;
    let release_name = args
        .release_name
        .clone()
        .unwrap_or_else(|| slug(&args.server_name));

    config.save(&config_path)?;
    println!("✅ Created {} (owner read/write only)", config_path.display());

    if !args.skip_env {
        let path = args.output_dir.join(DEFAULT_ENV_FILE);
        let local = LocalEnv {
            server_name: args.server_name.clone(),
            namespace: args.namespace.clone(),
            port: args.port,
        };
        write_private(&path, render_env_file(&config, &local).as_bytes())?;
        println!("✅ Created {} (owner read/write only)", path.display());
    }

    if !args.skip_helm {
        let path = write_helm_values(&config, &args.output_dir)?;
        println!("✅ Created {}", path.display());
    }

    let mut entries: Vec<&str> = GITIGNORE_ENTRIES.to_vec();
    let config_entry = config_name.to_string_lossy();
    entries.insert(0, config_entry.as_ref());
    let gitignore = args.output_dir.join(".gitignore");
    let added = append_gitignore(&gitignore, &entries)?;
    if added.is_empty() {
        println!("⏭️  {} already ignores the credential files", gitignore.display());
    } else {
        println!("✅ Added {} to {}", added.join(", "), gitignore.display());
    }
    info!("Configuration written to {}", args.output_dir.display());

    println!("\nNext steps:");
    println!(
        "1. oidc-deploy create-secrets --namespace {} --release-name {release_name}",
        args.namespace
    );
    println!("2. helm install {release_name} ./chart -f {DEFAULT_HELM_VALUES_FILE}");
    if !args.skip_env {
        println!("3. For local development: set -a && source .env && set +a");
    }
    Ok(ExitCode::SUCCESS)
}

/// Saved config updated with the supplied Auth0 application
fn build_config(
    args: &MakeConfigArgs,
    settings: &Settings,
    mut config: DeploymentConfig,
) -> Result<DeploymentConfig> {
    let saved_client = config.server_client.clone().unwrap_or_default();
    let domain = pick(
        args.domain.clone(),
        settings.auth0_domain.clone(),
        config.domain.clone(),
    )
    .context("Auth0 domain is required (--domain, AUTH0_DOMAIN or the saved config)")?;
    let domain = validate_domain(&domain)?;
    let client_id = pick(
        args.client_id.clone(),
        settings.oidc_client_id.clone(),
        (!saved_client.client_id.is_empty()).then(|| saved_client.client_id.clone()),
    )
    .context("Client ID is required (--client-id, OIDC_CLIENT_ID or the saved config)")?;
    let client_secret = pick(
        args.client_secret.clone(),
        settings.oidc_client_secret.as_ref().map(|s| s.as_str().to_string()),
        saved_client.has_secret().then(|| saved_client.client_secret.clone()),
    )
    .context("Client secret is required (--client-secret, OIDC_CLIENT_SECRET or the saved config)")?;
    let audience = pick(
        args.audience.clone(),
        settings.oidc_audience.clone(),
        (!config.audience.is_empty()).then(|| config.audience.clone()),
    )
    .unwrap_or_else(|| format!("https://{}.example.com/mcp", slug(&args.server_name)));

    config.provider = Some(ProviderKind::Auth0);
    config.issuer = format!("https://{domain}");
    config.domain = Some(domain);
    config.audience = audience;
    config.deployment_name = Some(args.server_name.clone());
    config.server_client = Some(ClientCredentials::new(client_id, client_secret));
    Ok(config)
}

/// Lower-case name with every run of other characters turned into one `-`
fn slug(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Harness {
        #[command(flatten)]
        args: MakeConfigArgs,
    }

    fn args(extra: &[&str]) -> MakeConfigArgs {
        let mut argv = vec!["make-config", "--server-name", "My MCP Server"];
        argv.extend_from_slice(extra);
        Harness::parse_from(argv).args
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("My MCP Server"), "my-mcp-server");
        assert_eq!(slug("  cnpg_claude -- v2 "), "cnpg-claude-v2");
    }

    #[test]
    fn test_flags_fill_a_fresh_config() {
        let args = args(&[
            "--domain",
            "https://tenant.auth0.com/",
            "--client-id",
            "srv-1",
            "--client-secret",
            "shh",
        ]);
        let config = build_config(&args, &Settings::default(), DeploymentConfig::default()).unwrap();

        assert_eq!(config.domain.as_deref(), Some("tenant.auth0.com"));
        assert_eq!(config.issuer, "https://tenant.auth0.com");
        assert_eq!(config.audience, "https://my-mcp-server.example.com/mcp");
        assert_eq!(config.server_client, Some(ClientCredentials::new("srv-1", "shh")));
        assert_eq!(config.provider(), ProviderKind::Auth0);
    }

    #[test]
    fn test_saved_config_supplies_missing_values() {
        let previous = DeploymentConfig {
            domain: Some("tenant.auth0.com".to_string()),
            audience: "https://mcp.example.com/mcp".to_string(),
            management_api: Some(ClientCredentials::new("mgmt-1", "mgmt-secret")),
            server_client: Some(ClientCredentials::new("srv-1", "saved-secret")),
            ..DeploymentConfig::default()
        };
        let config = build_config(&args(&[]), &Settings::default(), previous).unwrap();

        assert_eq!(config.audience, "https://mcp.example.com/mcp");
        assert_eq!(config.server_client.unwrap().client_secret, "saved-secret");
        assert_eq!(config.management_api.unwrap().client_id, "mgmt-1");
    }

    #[test]
    fn test_missing_client_secret_is_an_error() {
        let args = args(&["--domain", "tenant.auth0.com", "--client-id", "srv-1"]);
        let err = build_config(&args, &Settings::default(), DeploymentConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("Client secret is required"));
    }
}
