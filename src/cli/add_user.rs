//! `add-user`: let a user sign in to the server or test application.

use super::{finish, CommandContext, RunArgs};
use crate::auth::{fetch_management_token, ManagementCredentials};
use crate::config::ProviderKind;
use crate::plans::users::{allowed_client_ids, user_grant};
use crate::plans::ClientType;
use crate::reconciler::reconcile;
use crate::store::{Auth0Store, RoutingStore};
use anyhow::{Context, Result};
use clap::Args;
use std::process::ExitCode;
use std::sync::Arc;
use zeroize::Zeroizing;

#[derive(Debug, Args)]
pub struct AddUserArgs {
    /// E-mail address of an existing user
    #[arg(long)]
    pub email: String,

    /// Applications the user may sign in to
    #[arg(long, value_enum, default_value_t = ClientType::Server)]
    pub client_type: ClientType,

    /// Management API token; fetched with the saved management client when omitted
    #[arg(long)]
    pub token: Option<String>,

    #[command(flatten)]
    pub run: RunArgs,
}

pub(super) async fn run(args: &AddUserArgs, context: &CommandContext) -> Result<ExitCode> {
    let config = context.load_config()?.with_context(|| {
        format!(
            "{} not found; run setup-oidc first",
            context.config_file.display()
        )
    })?;
    if config.provider() != ProviderKind::Auth0 {
        anyhow::bail!("add-user requires an Auth0 deployment; manage users in your provider's console");
    }
    let domain = config
        .domain
        .clone()
        .context("Saved config has no Auth0 domain")?;
    let client_ids = allowed_client_ids(&config, args.client_type)?;
    let grant = user_grant(&args.email, &client_ids)?;

    let token = match args
        .token
        .clone()
        .map(Zeroizing::new)
        .or_else(|| context.settings.auth0_mgmt_token.clone())
    {
        Some(token) => token,
        None => {
            let management = config
                .management_api
                .as_ref()
                .filter(|m| m.has_secret())
                .context("Management API token is required (--token, AUTH0_MGMT_TOKEN or a saved management client)")?;
            let credentials = ManagementCredentials {
                domain: domain.clone(),
                client_id: management.client_id.clone(),
                client_secret: Zeroizing::new(management.client_secret.clone()),
            };
            fetch_management_token(&credentials, context.call_timeout)
                .await
                .context("Failed to obtain a management token")?
        }
    };

    println!("👤 Allowing {} to use: {}", grant.key.name, client_ids.join(", "));
    if !args.run.confirm("Update this user?")? {
        println!("Aborted.");
        return Ok(ExitCode::SUCCESS);
    }

    let auth0 = Auth0Store::new(&domain, token.as_str())
        .context("Failed to create Auth0 client")?
        .with_timeout(context.call_timeout);
    let store = RoutingStore::new().with_identity_provider(Arc::new(auth0));
    let report = reconcile(&[grant], &store, &args.run.options(context)).await?;
    finish(&report, &args.run)
}
