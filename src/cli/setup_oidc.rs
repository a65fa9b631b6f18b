//! `setup-oidc`: configure the identity provider for the server.
//!
//! Auth0 tenants are converged through the Management API. Other providers are
//! configured by hand; for them the command validates the issuer, records the
//! supplied client and prints the redirect URLs to register.

use super::{current_namespace, finish, CommandContext, RunArgs};
use crate::auth::{fetch_management_token, normalize_domain, ManagementCredentials};
use crate::config::{pick, ClientCredentials, DeploymentConfig, ProviderKind};
use crate::constants::{
    CLAUDE_CALLBACK, DEFAULT_APP_NAME, DEFAULT_DEPLOYMENT_NAME,
    DISCOVERY_TIMEOUT_SECS, LOCAL_TEST_CALLBACKS, SERVER_CALLBACK_PATH,
};
use crate::descriptor::{ResourceKind, ResourceRef};
use crate::discovery::validate_issuer;
use crate::output::write_helm_values;
use crate::plans::oidc::audience_origin;
use crate::plans::{Auth0Plan, CredentialsTarget};
use crate::reconciler::reconcile;
use crate::report::ReconciliationReport;
use crate::store::{Auth0Store, KubernetesStore, RoutingStore};
use anyhow::{Context, Result};
use clap::{ArgAction, Args};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use zeroize::Zeroizing;

#[derive(Debug, Args)]
pub struct SetupOidcArgs {
    /// Identity provider flavour
    #[arg(long, value_enum, default_value_t = ProviderKind::Auth0)]
    pub provider: ProviderKind,

    /// Auth0 tenant domain (e.g. tenant.eu.auth0.com)
    #[arg(long)]
    pub domain: Option<String>,

    /// Management API token; fetched with the saved management client when omitted
    #[arg(long)]
    pub token: Option<String>,

    /// Prefix for application names (e.g. "MCP Prod")
    #[arg(long)]
    pub deployment_name: Option<String>,

    /// Display name of the API audience
    #[arg(long)]
    pub api_name: Option<String>,

    /// API identifier (audience); defaults to https://<domain>/mcp
    #[arg(long)]
    pub api_identifier: Option<String>,

    /// Login connection to promote to domain level and enable for the test application
    #[arg(long)]
    pub connection_id: Option<String>,

    /// Enable dynamic client registration on the tenant
    #[arg(long)]
    pub use_dcr: bool,

    /// Do not create the management application
    #[arg(long)]
    pub skip_management_app: bool,

    /// Delete and recreate the applications (rotates their secrets)
    #[arg(long)]
    pub recreate_client: bool,

    /// Do not write the deployment config file
    #[arg(long = "no-save-config", action = ArgAction::SetFalse)]
    pub save_config: bool,

    /// Directory for make.env and the generated Helm values
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Also write the server credentials into <release>-auth0-credentials
    #[arg(long)]
    pub release_name: Option<String>,

    /// Namespace for the credentials Secret (defaults to the current context)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Application name used for labels
    #[arg(long, default_value = DEFAULT_APP_NAME)]
    pub app_name: String,

    /// OIDC issuer URL (generic provider)
    #[arg(long)]
    pub issuer: Option<String>,

    /// API audience (generic provider)
    #[arg(long)]
    pub audience: Option<String>,

    /// OAuth client id (generic provider)
    #[arg(long)]
    pub client_id: Option<String>,

    /// OAuth client secret (generic provider)
    #[arg(long)]
    pub client_secret: Option<String>,

    /// Skip fetching the issuer's discovery document
    #[arg(long)]
    pub skip_validation: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

pub(super) async fn run(args: &SetupOidcArgs, context: &CommandContext) -> Result<ExitCode> {
    let saved = context.load_config()?;
    match args.provider {
        ProviderKind::Auth0 => setup_auth0(args, context, saved).await,
        ProviderKind::Generic => setup_generic(args, context, saved.unwrap_or_default()).await,
    }
}

pub(super) fn validate_domain(raw: &str) -> Result<String> {
    let domain = normalize_domain(raw);
    if domain.is_empty() || !domain.contains('.') {
        anyhow::bail!("Invalid Auth0 domain '{raw}'");
    }
    Ok(domain.to_string())
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Token from the saved management client, if it can still get one
async fn token_from_saved_client(
    domain: &str,
    saved: &DeploymentConfig,
    timeout: Duration,
) -> Option<Zeroizing<String>> {
    let management = saved.management_api.as_ref().filter(|m| m.has_secret())?;
    println!("🔑 Requesting a management token with the saved management client...");
    let credentials = ManagementCredentials {
        domain: domain.to_string(),
        client_id: management.client_id.clone(),
        client_secret: Zeroizing::new(management.client_secret.clone()),
    };
    match fetch_management_token(&credentials, timeout).await {
        Ok(token) => Some(token),
        Err(e) => {
            warn!("Could not obtain a management token from saved credentials: {}", e);
            None
        }
    }
}

async fn setup_auth0(
    args: &SetupOidcArgs,
    context: &CommandContext,
    saved: Option<DeploymentConfig>,
) -> Result<ExitCode> {
    let settings = &context.settings;
    let file = saved.clone().unwrap_or_default();

    let domain = pick(
        args.domain.clone(),
        settings.auth0_domain.clone(),
        file.domain.clone(),
    )
    .context("Auth0 domain is required (--domain, AUTH0_DOMAIN or the saved config)")?;
    let domain = validate_domain(&domain)?;
    let deployment_name = pick(
        args.deployment_name.clone(),
        settings.deployment_name.clone(),
        file.deployment_name.clone(),
    )
    .unwrap_or_else(|| DEFAULT_DEPLOYMENT_NAME.to_string());
    let api_name = pick(args.api_name.clone(), None, file.api_name.clone())
        .unwrap_or_else(|| format!("{deployment_name} - API"));
    let audience = pick(
        args.api_identifier.clone(),
        settings.auth0_api_identifier.clone(),
        non_empty(&file.audience),
    )
    .unwrap_or_else(|| format!("https://{domain}/mcp"));

    let token = match args
        .token
        .clone()
        .map(Zeroizing::new)
        .or_else(|| settings.auth0_mgmt_token.clone())
    {
        Some(token) => Some(token),
        None => token_from_saved_client(&domain, &file, context.call_timeout).await,
    };

    let Some(token) = token else {
        let has_saved = file.domain.is_some()
            && file
                .management_api
                .as_ref()
                .is_some_and(|m| !m.client_id.is_empty());
        if has_saved {
            println!("⚠️  No management token available; regenerating Helm values from the saved config only");
            let mut config = file;
            if config.audience.is_empty() {
                config.audience = audience;
            }
            let path = write_helm_values(&config, &args.output_dir)?;
            println!("✅ Created {}", path.display());
            return Ok(ExitCode::SUCCESS);
        }
        anyhow::bail!(
            "Management API token is required (--token or AUTH0_MGMT_TOKEN) when no saved management client is available"
        );
    };

    println!("🔐 Auth0 setup");
    println!("   Domain:          {domain}");
    println!("   API identifier:  {audience}");
    println!("   Deployment name: {deployment_name}");
    println!(
        "   Dynamic client registration: {}",
        if args.use_dcr { "enabled" } else { "unchanged" }
    );
    if args.run.dry_run {
        println!("   Mode:            dry run (no changes)");
    }
    if !args.run.confirm("Proceed with setup?")? {
        println!("Aborted.");
        return Ok(ExitCode::SUCCESS);
    }

    let auth0 = Auth0Store::new(&domain, token.as_str())
        .context("Failed to create Auth0 client")?
        .with_timeout(context.call_timeout);
    auth0
        .verify()
        .await
        .context("Management API token check failed")?;

    let mut plan = Auth0Plan::new(&deployment_name, &domain, &audience)?
        .api_name(api_name.clone())
        .enable_dcr(args.use_dcr)
        .management_app(!args.skip_management_app)
        .refresh_secrets(args.recreate_client)
        .connection_id(pick(args.connection_id.clone(), None, file.connection_id.clone()));

    let mut store = RoutingStore::new().with_identity_provider(Arc::new(auth0));
    if let Some(release_name) = &args.release_name {
        let namespace = match &args.namespace {
            Some(namespace) => namespace.clone(),
            None => current_namespace().await,
        };
        plan = plan.write_credentials(CredentialsTarget {
            namespace,
            release_name: release_name.clone(),
            app_name: args.app_name.clone(),
        });
        let cluster = KubernetesStore::try_default()
            .await
            .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;
        store = store.with_cluster(Arc::new(cluster));
    }

    let options = args
        .run
        .options(context)
        .replace(args.recreate_client)
        .replace_only([ResourceKind::OAuthApplication]);
    let report = reconcile(&plan.descriptors(), &store, &options).await?;

    if !args.run.dry_run {
        let mut config = saved_config_from(&plan, &report, saved.as_ref());
        config.deployment_name = Some(deployment_name);
        config.api_name = Some(api_name);
        if let Some(previous) = &saved {
            config.preserve_secrets_from(previous);
        }
        for (label, client) in [
            ("Management", &config.management_api),
            ("Server", &config.server_client),
        ] {
            if client.as_ref().is_some_and(|c| !c.has_secret()) {
                println!("⚠️  {label} client secret not available; rerun with --recreate-client to rotate it");
            }
        }

        if args.save_config {
            config.save(&context.config_file)?;
            println!("✅ Saved {}", context.config_file.display());
        } else {
            println!("⏭️  Skipping {} (--no-save-config)", context.config_file.display());
        }
        let path = write_helm_values(&config, &args.output_dir)?;
        println!("✅ Created {}", path.display());
        println!("   Ready to deploy: helm install mcp-server ./chart -f {}", path.display());
    }

    finish(&report, &args.run)
}

/// Client credentials resolved for `app`, falling back to the saved ones
fn resolved_client(
    report: &ReconciliationReport,
    app: &ResourceRef,
    fallback: Option<&ClientCredentials>,
) -> Option<ClientCredentials> {
    match report.resolved_str(app, "client_id") {
        Some(client_id) => Some(ClientCredentials::new(
            client_id,
            report.resolved_str(app, "client_secret").unwrap_or_default(),
        )),
        None => fallback.cloned(),
    }
}

/// Deployment config describing what the run converged
fn saved_config_from(
    plan: &Auth0Plan,
    report: &ReconciliationReport,
    previous: Option<&DeploymentConfig>,
) -> DeploymentConfig {
    let management = plan.management_app.then(|| {
        resolved_client(
            report,
            &plan.management_app_ref(),
            previous.and_then(|p| p.management_api.as_ref()),
        )
    });
    let test_client = resolved_client(
        report,
        &plan.test_app_ref(),
        previous.and_then(|p| p.test_client.as_ref()),
    )
    .map(|c| ClientCredentials::new(c.client_id, ""));

    DeploymentConfig {
        provider: Some(ProviderKind::Auth0),
        domain: Some(plan.domain.clone()),
        issuer: format!("https://{}", plan.domain),
        audience: plan.audience.clone(),
        management_api: management
            .flatten()
            .or_else(|| previous.and_then(|p| p.management_api.clone())),
        server_client: resolved_client(
            report,
            &plan.server_app_ref(),
            previous.and_then(|p| p.server_client.as_ref()),
        ),
        test_client,
        connection_id: plan.connection_id.clone(),
        dcr_enabled: plan.enable_dcr,
        ..DeploymentConfig::default()
    }
}

async fn setup_generic(
    args: &SetupOidcArgs,
    context: &CommandContext,
    file: DeploymentConfig,
) -> Result<ExitCode> {
    let settings = &context.settings;
    let saved_client = file.server_client.clone().unwrap_or_default();

    let issuer = pick(
        args.issuer.clone(),
        settings.oidc_issuer.clone(),
        non_empty(&file.issuer),
    )
    .context("OIDC issuer is required (--issuer, OIDC_ISSUER or the saved config)")?
    .trim_end_matches('/')
    .to_string();
    let audience = pick(
        args.audience.clone(),
        settings.oidc_audience.clone(),
        non_empty(&file.audience),
    )
    .context("API audience is required (--audience, OIDC_AUDIENCE or the saved config)")?
    .trim_end_matches('/')
    .to_string();
    let client_id = pick(
        args.client_id.clone(),
        settings.oidc_client_id.clone(),
        non_empty(&saved_client.client_id),
    )
    .context("OAuth client id is required (--client-id, OIDC_CLIENT_ID or the saved config)")?;
    let client_secret = pick(
        args.client_secret.clone().map(Zeroizing::new),
        settings.oidc_client_secret.clone(),
        non_empty(&saved_client.client_secret).map(Zeroizing::new),
    )
    .context("OAuth client secret is required (--client-secret, OIDC_CLIENT_SECRET or the saved config)")?;

    let base_url = audience_origin(&audience)?;
    let discovered = if args.skip_validation {
        println!("⏭️  Skipping issuer validation");
        None
    } else {
        println!("🔍 Validating issuer {issuer}...");
        let document = validate_issuer(&issuer, Duration::from_secs(DISCOVERY_TIMEOUT_SECS))
            .await
            .context("OIDC issuer validation failed (use --skip-validation to bypass)")?;
        println!("   ✅ Discovery document found");
        Some(document)
    };

    println!("\n📋 Register these redirect URLs with your provider:");
    println!("   - {base_url}{SERVER_CALLBACK_PATH}");
    println!("   - {CLAUDE_CALLBACK}");
    if let Some(local) = LOCAL_TEST_CALLBACKS.first() {
        println!("   - {local} (local testing)");
    }

    let config = DeploymentConfig {
        provider: Some(ProviderKind::Generic),
        authorization_endpoint: Some(
            discovered
                .as_ref()
                .map_or_else(|| format!("{issuer}/auth"), |d| d.authorization_endpoint.clone()),
        ),
        token_endpoint: Some(
            discovered
                .as_ref()
                .map_or_else(|| format!("{issuer}/token"), |d| d.token_endpoint.clone()),
        ),
        jwks_uri: Some(
            discovered
                .as_ref()
                .map_or_else(|| format!("{issuer}/.well-known/jwks.json"), |d| d.jwks_uri.clone()),
        ),
        server_client: Some(ClientCredentials::new(client_id, client_secret.as_str())),
        issuer,
        audience,
        ..DeploymentConfig::default()
    };

    if args.run.dry_run {
        println!("\n🔍 Dry run: not writing {}", context.config_file.display());
        return Ok(ExitCode::SUCCESS);
    }
    if args.save_config {
        config.save(&context.config_file)?;
        println!("\n✅ Saved {}", context.config_file.display());
    }
    let path = write_helm_values(&config, &args.output_dir)?;
    println!("✅ Created {}", path.display());
    info!("Generic OIDC setup complete for {}", config.issuer);

    println!("\nNext steps:");
    println!("1. Ensure the redirect URLs above are configured in your provider");
    println!("2. oidc-deploy create-secrets --namespace <namespace> --release-name <release-name>");
    println!("3. helm install mcp-server ./chart -f {}", path.display());
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ActionTaken, ReconciliationResult};
    use serde_json::json;

    fn plan() -> Auth0Plan {
        Auth0Plan::new("Demo", "tenant.auth0.com", "https://mcp.example.com/mcp").unwrap()
    }

    #[test]
    fn test_validate_domain() {
        assert_eq!(
            validate_domain("https://tenant.auth0.com/").unwrap(),
            "tenant.auth0.com"
        );
        assert!(validate_domain("localhost").is_err());
    }

    #[test]
    fn test_saved_config_takes_resolved_clients() {
        let plan = plan();
        let report = ReconciliationReport {
            results: vec![ReconciliationResult::new(plan.server_app_ref(), ActionTaken::Created)
                .with_attributes(
                    [
                        ("client_id".to_string(), json!("srv-new")),
                        ("client_secret".to_string(), json!("fresh")),
                    ]
                    .into(),
                )],
            ..ReconciliationReport::default()
        };
        let previous = DeploymentConfig {
            management_api: Some(ClientCredentials::new("mgmt-old", "kept")),
            test_client: Some(ClientCredentials::new("tst-old", "")),
            ..DeploymentConfig::default()
        };

        let config = saved_config_from(&plan, &report, Some(&previous));
        let server = config.server_client.unwrap();
        assert_eq!(server.client_id, "srv-new");
        assert_eq!(server.client_secret, "fresh");
        assert_eq!(config.management_api.unwrap().client_id, "mgmt-old");
        assert_eq!(config.test_client.unwrap().client_id, "tst-old");
        assert_eq!(config.issuer, "https://tenant.auth0.com");
    }
}
