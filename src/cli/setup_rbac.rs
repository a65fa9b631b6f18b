//! `setup-rbac`: ServiceAccount, role and binding for the server.

use super::{current_namespace, finish, CommandContext, RunArgs};
use crate::constants::DEFAULT_APP_NAME;
use crate::descriptor::ResourceDescriptor;
use crate::output::{rbac_manifests, write_public};
use crate::plans::rbac::parse_rules;
use crate::plans::secrets::namespace_descriptor;
use crate::plans::{RbacPlan, RbacScope};
use crate::reconciler::{reconcile, teardown};
use crate::store::KubernetesStore;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Args)]
pub struct SetupRbacArgs {
    /// Namespace for the ServiceAccount (defaults to the current context)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Application name used for labels and the default ServiceAccount name
    #[arg(long, default_value = DEFAULT_APP_NAME)]
    pub app_name: String,

    /// ServiceAccount name (defaults to <app-name>-server)
    #[arg(long)]
    pub service_account: Option<String>,

    /// Grant permissions cluster-wide or in the namespace only
    #[arg(long, value_enum, default_value_t = RbacScope::Cluster)]
    pub scope: RbacScope,

    /// JSON or YAML list of policy rules replacing the read-only defaults
    #[arg(long, value_name = "PATH")]
    pub rules_file: Option<PathBuf>,

    /// Remove the binding, role and ServiceAccount instead
    #[arg(long)]
    pub delete: bool,

    /// Also write the manifests to this path
    #[arg(long, value_name = "PATH")]
    pub manifest_out: Option<PathBuf>,

    /// Resource used in the printed `kubectl auth can-i` check
    #[arg(long, default_value = "pods")]
    pub verify_resource: String,

    #[command(flatten)]
    pub run: RunArgs,
}

pub(super) async fn run(args: &SetupRbacArgs, context: &CommandContext) -> Result<ExitCode> {
    let namespace = match &args.namespace {
        Some(namespace) => namespace.clone(),
        None => current_namespace().await,
    };

    let mut plan = RbacPlan::new(&args.app_name, &namespace).scope(args.scope);
    if let Some(name) = &args.service_account {
        plan = plan.service_account(name);
    }
    if let Some(path) = &args.rules_file {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file {}", path.display()))?;
        plan = plan.rules(parse_rules(&raw)?);
    }

    println!("🛡️  RBAC for ServiceAccount {namespace}/{}", plan.service_account);
    println!("   {}:        {}", plan.role_kind(), plan.role_name());
    println!("   {}: {}", plan.binding_kind(), plan.binding_name());

    if let Some(path) = &args.manifest_out {
        write_public(path, rbac_manifests(&plan)?.as_bytes())?;
        println!("✅ Manifests written to {}", path.display());
    }

    let question = if args.delete {
        "Delete these RBAC resources?"
    } else {
        "Create these RBAC resources?"
    };
    if !args.run.confirm(question)? {
        println!("Aborted.");
        return Ok(ExitCode::SUCCESS);
    }

    let store = KubernetesStore::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;
    let options = args.run.options(context);

    if args.delete {
        // The namespace is left in place
        let report = teardown(&plan.descriptors(), &store, &options).await?;
        return finish(&report, &args.run);
    }

    let report = reconcile(&with_namespace(&plan), &store, &options).await?;
    let code = finish(&report, &args.run)?;
    if report.is_success() && !args.run.dry_run {
        println!("\nVerify with:");
        println!("   {}", plan.can_i_command(&args.verify_resource));
    }
    Ok(code)
}

/// Plan descriptors preceded by the namespace they live in
fn with_namespace(plan: &RbacPlan) -> Vec<ResourceDescriptor> {
    let Some(namespace) = namespace_descriptor(&plan.namespace, &plan.app_name) else {
        return plan.descriptors();
    };
    let namespace_ref = namespace.resource_ref();
    let mut descriptors = vec![namespace];
    descriptors.extend(
        plan.descriptors()
            .into_iter()
            .map(|d| d.depends_on(namespace_ref.clone())),
    );
    descriptors
}
