//! # Secrets Plan
//!
//! Kubernetes Secrets consumed by the server at runtime:
//!
//! - `<release>-auth0-credentials` or `<release>-oidc-credentials`, built from
//!   the saved deployment config
//! - `<release>-jwt-signing-key`, holding a generated token signing key and a
//!   Fernet-compatible storage encryption key
//!
//! Generated keys are only produced when the Secret lacks them, so reruns keep
//! existing keys unless the caller asks for a replace.

use super::standard_labels;
use crate::config::{DeploymentConfig, ProviderKind};
use crate::descriptor::{AttributeValue, IdentityKey, ResourceDescriptor, ResourceKind, ResourceRef};
use crate::generator::SecretAlgorithm;
use anyhow::Result;
use std::collections::BTreeMap;

/// Namespaces that always exist and are never created
const BUILTIN_NAMESPACE: &str = "default";

/// Namespace descriptor for `namespace`, or `None` for the default namespace
#[must_use]
pub fn namespace_descriptor(namespace: &str, app_name: &str) -> Option<ResourceDescriptor> {
    if namespace == BUILTIN_NAMESPACE {
        return None;
    }
    Some(
        ResourceDescriptor::new(ResourceKind::Namespace, IdentityKey::named(namespace))
            .with_labels(&standard_labels(app_name, "namespace"))
            .label("name", namespace),
    )
}

#[derive(Debug, Clone)]
pub struct SecretsPlan {
    pub release_name: String,
    pub namespace: String,
    pub app_name: String,
    pub provider: ProviderKind,
    credentials: BTreeMap<String, String>,
}

impl SecretsPlan {
    /// Build the plan from a saved config, rejecting configs that lack required fields
    pub fn from_config(
        config: &DeploymentConfig,
        release_name: impl Into<String>,
        namespace: impl Into<String>,
        app_name: impl Into<String>,
    ) -> Result<Self> {
        let missing = config.missing_fields();
        if !missing.is_empty() {
            anyhow::bail!(
                "{} config is missing required field(s): {}",
                config.provider(),
                missing.join(", ")
            );
        }

        let provider = config.provider();
        let server = config.server_client.clone().unwrap_or_default();
        let mut credentials = BTreeMap::from([
            ("server-client-id".to_string(), server.client_id),
            ("server-client-secret".to_string(), server.client_secret),
        ]);
        match provider {
            ProviderKind::Auth0 => {
                let management = config.management_api.clone().unwrap_or_default();
                credentials.insert("mgmt-client-id".to_string(), management.client_id);
                credentials.insert("mgmt-client-secret".to_string(), management.client_secret);
                credentials.insert(
                    "auth0-domain".to_string(),
                    config.domain.clone().unwrap_or_default(),
                );
                if let Some(connection_id) = &config.connection_id {
                    credentials.insert("connection-id".to_string(), connection_id.clone());
                }
            }
            ProviderKind::Generic => {
                credentials.insert("issuer".to_string(), config.issuer.clone());
                credentials.insert("audience".to_string(), config.audience.clone());
            }
        }

        Ok(Self {
            release_name: release_name.into(),
            namespace: namespace.into(),
            app_name: app_name.into(),
            provider,
            credentials,
        })
    }

    #[must_use]
    pub fn credentials_component(&self) -> &'static str {
        match self.provider {
            ProviderKind::Auth0 => "auth0-credentials",
            ProviderKind::Generic => "oidc-credentials",
        }
    }

    #[must_use]
    pub fn credentials_ref(&self) -> ResourceRef {
        ResourceRef::new(
            ResourceKind::SecretStore,
            IdentityKey::scoped(
                &self.namespace,
                format!("{}-{}", self.release_name, self.credentials_component()),
            ),
        )
    }

    #[must_use]
    pub fn signing_key_ref(&self) -> ResourceRef {
        ResourceRef::new(
            ResourceKind::SecretStore,
            IdentityKey::scoped(&self.namespace, format!("{}-jwt-signing-key", self.release_name)),
        )
    }

    /// Credential keys whose value is empty (e.g. a secret the provider never returned)
    #[must_use]
    pub fn empty_credentials(&self) -> Vec<&str> {
        self.credentials
            .iter()
            .filter(|(_, v)| v.is_empty())
            .map(|(k, _)| k.as_str())
            .collect()
    }

    #[must_use]
    pub fn descriptors(&self) -> Vec<ResourceDescriptor> {
        let namespace = namespace_descriptor(&self.namespace, &self.app_name);
        let namespace_ref = namespace.as_ref().map(ResourceDescriptor::resource_ref);

        let mut credentials = ResourceDescriptor::new(
            ResourceKind::SecretStore,
            self.credentials_ref().key,
        )
        .with_labels(&standard_labels(&self.app_name, self.credentials_component()));
        for (key, value) in &self.credentials {
            // An empty value keeps whatever the Secret already holds
            let desired = if value.is_empty() {
                AttributeValue::preserve()
            } else {
                AttributeValue::literal(value.as_str())
            };
            credentials = credentials.with(key.as_str(), desired);
        }

        let signing = ResourceDescriptor::new(ResourceKind::SecretStore, self.signing_key_ref().key)
            .with_labels(&standard_labels(&self.app_name, "jwt-signing-key"))
            .with(
                "jwt-signing-key",
                AttributeValue::generate(SecretAlgorithm::Hex256),
            )
            .with(
                "storage-encryption-key",
                AttributeValue::generate(SecretAlgorithm::SymmetricKey),
            );

        let mut descriptors: Vec<ResourceDescriptor> = namespace.into_iter().collect();
        for secret in [credentials, signing] {
            descriptors.push(match &namespace_ref {
                Some(ns) => secret.depends_on(ns.clone()),
                None => secret,
            });
        }
        descriptors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientCredentials;

    fn auth0_config() -> DeploymentConfig {
        DeploymentConfig {
            domain: Some("tenant.auth0.com".to_string()),
            issuer: "https://tenant.auth0.com".to_string(),
            audience: "https://mcp.example.com/mcp".to_string(),
            management_api: Some(ClientCredentials::new("mgmt", "")),
            server_client: Some(ClientCredentials::new("srv", "srv-secret")),
            connection_id: Some("con_123".to_string()),
            ..DeploymentConfig::default()
        }
    }

    #[test]
    fn test_auth0_plan_names_and_keys() {
        let plan = SecretsPlan::from_config(&auth0_config(), "demo", "mcp", "mcp-server").unwrap();
        assert_eq!(plan.credentials_ref().key.name, "demo-auth0-credentials");
        assert_eq!(plan.signing_key_ref().key.name, "demo-jwt-signing-key");
        assert_eq!(plan.empty_credentials(), vec!["mgmt-client-secret"]);

        let descs = plan.descriptors();
        assert_eq!(descs.len(), 3);
        assert_eq!(descs[0].kind, ResourceKind::Namespace);
        assert!(descs.iter().all(|d| d.validate().is_ok()));
        let creds = &descs[1];
        assert_eq!(
            creds.desired["connection-id"],
            AttributeValue::literal("con_123")
        );
        assert_eq!(creds.labels["component"], "auth0-credentials");
        assert_eq!(creds.desired["mgmt-client-secret"], AttributeValue::preserve());
    }

    #[test]
    fn test_generic_plan_in_default_namespace() {
        let config = DeploymentConfig {
            provider: Some(ProviderKind::Generic),
            issuer: "https://dex.example.com".to_string(),
            audience: "https://mcp.example.com/mcp".to_string(),
            server_client: Some(ClientCredentials::new("srv", "s")),
            ..DeploymentConfig::default()
        };
        let plan = SecretsPlan::from_config(&config, "demo", "default", "mcp-server").unwrap();
        let descs = plan.descriptors();
        assert_eq!(descs.len(), 2);
        assert_eq!(descs[0].key.name, "demo-oidc-credentials");
        assert!(descs[0].desired.contains_key("issuer"));
        assert!(!descs[0].desired.contains_key("mgmt-client-id"));
        assert!(descs.iter().all(|d| d.dependencies.is_empty()));
    }

    #[test]
    fn test_signing_keys_are_generated() {
        let plan = SecretsPlan::from_config(&auth0_config(), "demo", "mcp", "mcp-server").unwrap();
        let signing = plan
            .descriptors()
            .into_iter()
            .find(|d| d.resource_ref() == plan.signing_key_ref())
            .unwrap();
        assert_eq!(
            signing.desired["jwt-signing-key"],
            AttributeValue::Generate(SecretAlgorithm::Hex256)
        );
        assert_eq!(
            signing.desired["storage-encryption-key"],
            AttributeValue::Generate(SecretAlgorithm::SymmetricKey)
        );
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        let config = DeploymentConfig {
            domain: Some("tenant.auth0.com".to_string()),
            ..DeploymentConfig::default()
        };
        let err = SecretsPlan::from_config(&config, "demo", "mcp", "mcp-server").unwrap_err();
        assert!(err.to_string().contains("management_api"));
    }
}
