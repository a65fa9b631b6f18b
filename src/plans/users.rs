//! User access plan: add client IDs to a user's `app_metadata.allowedClients`.

use crate::config::DeploymentConfig;
use crate::descriptor::{AttributeValue, IdentityKey, ResourceDescriptor, ResourceKind};
use anyhow::Result;
use clap::ValueEnum;
use serde_json::json;

/// Which applications the user may sign in to
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClientType {
    /// The server application (OAuth proxy)
    Server,
    /// The test harness application
    Test,
    Both,
}

impl ClientType {
    fn includes_server(self) -> bool {
        matches!(self, ClientType::Server | ClientType::Both)
    }

    fn includes_test(self) -> bool {
        matches!(self, ClientType::Test | ClientType::Both)
    }
}

/// Client IDs from the saved config for `client_type`
pub fn allowed_client_ids(config: &DeploymentConfig, client_type: ClientType) -> Result<Vec<String>> {
    let id_of = |client: Option<&crate::config::ClientCredentials>, label: &str| {
        client
            .map(|c| c.client_id.clone())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow::anyhow!("saved config has no {label} client id; run setup-oidc first"))
    };

    let mut ids = Vec::new();
    if client_type.includes_server() {
        ids.push(id_of(config.server_client.as_ref(), "server")?);
    }
    if client_type.includes_test() {
        ids.push(id_of(config.test_client.as_ref(), "test")?);
    }
    Ok(ids)
}

/// Descriptor ensuring `email`'s allowed clients include `client_ids`
pub fn user_grant(email: &str, client_ids: &[String]) -> Result<ResourceDescriptor> {
    let email = email.trim();
    if !email.contains('@') {
        anyhow::bail!("'{email}' is not an e-mail address");
    }
    Ok(
        ResourceDescriptor::new(ResourceKind::UserGrant, IdentityKey::named(email)).with(
            "app_metadata",
            AttributeValue::include(json!({ "allowedClients": client_ids })),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientCredentials;

    fn config() -> DeploymentConfig {
        DeploymentConfig {
            server_client: Some(ClientCredentials::new("srv", "secret")),
            test_client: Some(ClientCredentials::new("tst", "")),
            ..DeploymentConfig::default()
        }
    }

    #[test]
    fn test_client_ids_by_type() {
        assert_eq!(allowed_client_ids(&config(), ClientType::Server).unwrap(), vec!["srv"]);
        assert_eq!(allowed_client_ids(&config(), ClientType::Test).unwrap(), vec!["tst"]);
        assert_eq!(
            allowed_client_ids(&config(), ClientType::Both).unwrap(),
            vec!["srv", "tst"]
        );
    }

    #[test]
    fn test_missing_client_is_an_error() {
        let config = DeploymentConfig {
            server_client: Some(ClientCredentials::new("srv", "")),
            ..DeploymentConfig::default()
        };
        assert!(allowed_client_ids(&config, ClientType::Both).is_err());
    }

    #[test]
    fn test_user_grant_descriptor() {
        let desc = user_grant(" ada@example.com ", &["srv".to_string()]).unwrap();
        assert_eq!(desc.key.name, "ada@example.com");
        assert!(desc.validate().is_ok());
        assert_eq!(
            desc.desired["app_metadata"],
            AttributeValue::include(json!({"allowedClients": ["srv"]}))
        );
        assert!(user_grant("not-an-email", &[]).is_err());
    }
}
