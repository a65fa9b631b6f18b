//! `create-secrets`: credentials and signing-key Secrets for a Helm release.
//!
//! Generated key material goes straight into the Secret and is never printed.

use super::{current_namespace, finish, CommandContext, RunArgs};
use crate::constants::DEFAULT_APP_NAME;
use crate::descriptor::ResourceKind;
use crate::plans::SecretsPlan;
use crate::reconciler::reconcile;
use crate::store::KubernetesStore;
use anyhow::{Context, Result};
use clap::Args;
use std::process::ExitCode;
use tracing::warn;

#[derive(Debug, Args)]
pub struct CreateSecretsArgs {
    /// Target namespace (defaults to the current context)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Helm release name; Secrets are named <release>-...
    #[arg(long)]
    pub release_name: String,

    /// Application name used for labels
    #[arg(long, default_value = DEFAULT_APP_NAME)]
    pub app_name: String,

    /// Overwrite existing Secrets, regenerating the signing keys
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

pub(super) async fn run(args: &CreateSecretsArgs, context: &CommandContext) -> Result<ExitCode> {
    let config = context.load_config()?.with_context(|| {
        format!(
            "{} not found; run setup-oidc first",
            context.config_file.display()
        )
    })?;
    let namespace = match &args.namespace {
        Some(namespace) => namespace.clone(),
        None => current_namespace().await,
    };

    let plan = SecretsPlan::from_config(&config, &args.release_name, &namespace, &args.app_name)?;
    for key in plan.empty_credentials() {
        warn!("Saved config has no value for '{}'; any existing value is kept", key);
        println!("⚠️  No value for {key}; keeping the value already in the Secret, if any");
    }

    println!("🔐 Secrets for release '{}' in namespace '{namespace}'", args.release_name);
    println!("   Provider:    {}", plan.provider);
    println!("   Credentials: {}", plan.credentials_ref().key.name);
    println!("   Signing key: {}", plan.signing_key_ref().key.name);
    if args.force {
        println!("   ⚠️  --force replaces both Secrets and rotates the signing keys");
    }
    if !args.run.confirm("Create these Secrets?")? {
        println!("Aborted.");
        return Ok(ExitCode::SUCCESS);
    }

    let store = KubernetesStore::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;
    // Only the Secrets are ever replaced, never the namespace holding them
    let options = args
        .run
        .options(context)
        .replace(args.force)
        .replace_only([ResourceKind::SecretStore]);
    let report = reconcile(&plan.descriptors(), &store, &options).await?;

    let code = finish(&report, &args.run)?;
    if report.is_success() && !args.run.dry_run {
        println!("\nVerify with:");
        println!("   kubectl get secrets -n {namespace} -l app={}", args.app_name);
    }
    Ok(code)
}
