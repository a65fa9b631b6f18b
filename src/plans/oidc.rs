//! # Identity Provider Plan
//!
//! Descriptors for an Auth0 tenant serving one MCP deployment:
//!
//! 1. tenant flags for dynamic client registration (optional)
//! 2. the API audience and its scopes
//! 3. the management application and its Management API grant (optional)
//! 4. the server application (regular web app used by the OAuth proxy)
//! 5. the test harness application (SPA with PKCE)
//! 6. client grants from both applications to the API audience
//! 7. the login connection, promoted to domain level and enabled for the test
//!    application (optional)
//! 8. the credentials Secret, filled from the applications created in the
//!    same run (optional)
//!
//! Callback URLs, grant types, scopes and origins use include semantics, so
//! entries an operator added by hand are never removed.

use super::standard_labels;
use crate::auth::management_audience;
use crate::constants::{
    API_TOKEN_LIFETIME_FOR_WEB_SECS, API_TOKEN_LIFETIME_SECS, CLAUDE_CALLBACK, CLAUDE_ORIGIN,
    DEFAULT_API_SCOPES, LOCAL_TEST_CALLBACKS, LOCAL_TEST_ORIGINS, MANAGEMENT_SCOPES,
    SERVER_CALLBACK_PATH, SERVER_GRANT_TYPES, TENANT_SETTINGS_KEY,
};
use crate::descriptor::{AttributeValue, IdentityKey, ResourceDescriptor, ResourceKind, ResourceRef};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use url::Url;

/// Where the server credentials are written inside the cluster
#[derive(Debug, Clone)]
pub struct CredentialsTarget {
    pub namespace: String,
    pub release_name: String,
    pub app_name: String,
}

impl CredentialsTarget {
    #[must_use]
    pub fn secret_name(&self) -> String {
        format!("{}-auth0-credentials", self.release_name)
    }
}

/// Everything needed to converge one Auth0 deployment
#[derive(Debug, Clone)]
pub struct Auth0Plan {
    pub deployment_name: String,
    pub api_name: String,
    pub domain: String,
    /// API identifier, also the `aud` claim of issued tokens
    pub audience: String,
    pub enable_dcr: bool,
    pub management_app: bool,
    pub connection_id: Option<String>,
    pub credentials: Option<CredentialsTarget>,
    /// Take client secrets from this run's applications even when the
    /// credentials Secret already holds them
    pub refresh_secrets: bool,
    /// scheme://host[:port] of the audience
    base_url: String,
}

impl Auth0Plan {
    pub fn new(
        deployment_name: impl Into<String>,
        domain: impl Into<String>,
        audience: impl Into<String>,
    ) -> Result<Self> {
        let deployment_name = deployment_name.into();
        let audience = audience.into();
        let base_url = audience_origin(&audience)?;
        Ok(Self {
            api_name: format!("{deployment_name} - API"),
            deployment_name,
            domain: domain.into(),
            audience,
            enable_dcr: false,
            management_app: true,
            connection_id: None,
            credentials: None,
            refresh_secrets: false,
            base_url,
        })
    }

    #[must_use]
    pub fn api_name(mut self, api_name: impl Into<String>) -> Self {
        self.api_name = api_name.into();
        self
    }

    #[must_use]
    pub fn enable_dcr(mut self, enable: bool) -> Self {
        self.enable_dcr = enable;
        self
    }

    #[must_use]
    pub fn management_app(mut self, create: bool) -> Self {
        self.management_app = create;
        self
    }

    #[must_use]
    pub fn connection_id(mut self, connection_id: Option<String>) -> Self {
        self.connection_id = connection_id;
        self
    }

    /// Set when the applications are recreated and their secrets change
    #[must_use]
    pub fn refresh_secrets(mut self, refresh: bool) -> Self {
        self.refresh_secrets = refresh;
        self
    }

    #[must_use]
    pub fn write_credentials(mut self, target: CredentialsTarget) -> Self {
        self.credentials = Some(target);
        self
    }

    /// Redirect URI used by the server's OAuth proxy
    #[must_use]
    pub fn server_callback(&self) -> String {
        format!("{}{SERVER_CALLBACK_PATH}", self.base_url)
    }

    #[must_use]
    pub fn tenant_ref() -> ResourceRef {
        ResourceRef::new(
            ResourceKind::TenantSettings,
            IdentityKey::named(TENANT_SETTINGS_KEY),
        )
    }

    #[must_use]
    pub fn api_ref(&self) -> ResourceRef {
        ResourceRef::new(ResourceKind::ApiResource, IdentityKey::named(&self.audience))
    }

    #[must_use]
    pub fn management_app_ref(&self) -> ResourceRef {
        application(format!("{} - Management API", self.deployment_name))
    }

    #[must_use]
    pub fn server_app_ref(&self) -> ResourceRef {
        application(format!("{} - Server", self.deployment_name))
    }

    #[must_use]
    pub fn test_app_ref(&self) -> ResourceRef {
        application(format!("{} - Test Harness", self.deployment_name))
    }

    #[must_use]
    pub fn connection_ref(&self) -> Option<ResourceRef> {
        self.connection_id.as_ref().map(|id| {
            ResourceRef::new(ResourceKind::Connection, IdentityKey::named(id))
        })
    }

    #[must_use]
    pub fn credentials_ref(&self) -> Option<ResourceRef> {
        self.credentials.as_ref().map(|target| {
            ResourceRef::new(
                ResourceKind::SecretStore,
                IdentityKey::scoped(&target.namespace, target.secret_name()),
            )
        })
    }

    /// Descriptors in declaration order; the reconciler orders them by dependency
    #[must_use]
    pub fn descriptors(&self) -> Vec<ResourceDescriptor> {
        let mut descriptors = Vec::new();

        if self.enable_dcr {
            descriptors.push(
                ResourceDescriptor::new(ResourceKind::TenantSettings, Self::tenant_ref().key)
                    .with(
                        "flags",
                        AttributeValue::include(json!({
                            "enable_dynamic_client_registration": true,
                            "enable_client_connections": true,
                        })),
                    ),
            );
        }

        descriptors.push(self.api());

        if self.management_app {
            let app = self.management_app_ref();
            descriptors.push(
                ResourceDescriptor::new(ResourceKind::OAuthApplication, app.key.clone())
                    .with("app_type", AttributeValue::literal("non_interactive"))
                    .with(
                        "grant_types",
                        AttributeValue::include(json!(["client_credentials"])),
                    )
                    .with(
                        "token_endpoint_auth_method",
                        AttributeValue::literal("client_secret_post"),
                    )
                    .with(
                        "description",
                        AttributeValue::literal("Management API access for setup automation"),
                    ),
            );
            descriptors.push(
                grant(&app, &management_audience(&self.domain), MANAGEMENT_SCOPES.iter()),
            );
        }

        descriptors.push(self.server_app());
        descriptors.push(self.test_app());

        let api = self.api_ref();
        let api_scopes = DEFAULT_API_SCOPES.iter().map(|(value, _)| value);
        for app in [self.server_app_ref(), self.test_app_ref()] {
            descriptors.push(grant(&app, &self.audience, api_scopes.clone()).depends_on(api.clone()));
        }

        if let Some(connection) = self.connection_ref() {
            let test_app = self.test_app_ref();
            descriptors.push(
                ResourceDescriptor::new(ResourceKind::Connection, connection.key)
                    .with("is_domain_connection", AttributeValue::literal(true))
                    .with(
                        "enabled_clients",
                        AttributeValue::include_reference(test_app.clone(), "client_id"),
                    )
                    .depends_on(test_app),
            );
        }

        if let Some(target) = &self.credentials {
            descriptors.extend(self.credentials_secret(target));
        }
        descriptors
    }

    fn api(&self) -> ResourceDescriptor {
        let scopes: Vec<Value> = DEFAULT_API_SCOPES
            .iter()
            .map(|(value, description)| json!({"value": value, "description": description}))
            .collect();
        ResourceDescriptor::new(ResourceKind::ApiResource, self.api_ref().key)
            .with("name", AttributeValue::literal(self.api_name.as_str()))
            .with("signing_alg", AttributeValue::literal("RS256"))
            .with("scopes", AttributeValue::include(scopes))
            .with("allow_offline_access", AttributeValue::literal(true))
            .with("token_lifetime", AttributeValue::literal(API_TOKEN_LIFETIME_SECS))
            .with(
                "token_lifetime_for_web",
                AttributeValue::literal(API_TOKEN_LIFETIME_FOR_WEB_SECS),
            )
    }

    fn server_app(&self) -> ResourceDescriptor {
        ResourceDescriptor::new(ResourceKind::OAuthApplication, self.server_app_ref().key)
            .with("app_type", AttributeValue::literal("regular_web"))
            .with("grant_types", AttributeValue::include(json!(SERVER_GRANT_TYPES)))
            .with(
                "token_endpoint_auth_method",
                AttributeValue::literal("client_secret_post"),
            )
            .with("callbacks", AttributeValue::include(json!([self.server_callback()])))
            .with("web_origins", AttributeValue::include(json!([self.base_url])))
            .with("allowed_origins", AttributeValue::include(json!([self.base_url])))
            .with("oidc_conformant", AttributeValue::literal(true))
            .with(
                "description",
                AttributeValue::literal("OAuth proxy for the MCP server"),
            )
    }

    fn test_app(&self) -> ResourceDescriptor {
        let mut callbacks: Vec<String> = LOCAL_TEST_CALLBACKS.iter().map(ToString::to_string).collect();
        callbacks.push(self.server_callback());
        callbacks.push(CLAUDE_CALLBACK.to_string());

        let mut origins: Vec<String> = LOCAL_TEST_ORIGINS.iter().map(ToString::to_string).collect();
        origins.push(self.base_url.clone());
        origins.push(CLAUDE_ORIGIN.to_string());

        ResourceDescriptor::new(ResourceKind::OAuthApplication, self.test_app_ref().key)
            .with("app_type", AttributeValue::literal("spa"))
            .with(
                "grant_types",
                AttributeValue::include(json!(["authorization_code", "refresh_token"])),
            )
            .with("token_endpoint_auth_method", AttributeValue::literal("none"))
            .with("callbacks", AttributeValue::include(json!(callbacks)))
            .with("web_origins", AttributeValue::include(json!(origins)))
            .with("allowed_origins", AttributeValue::include(json!(origins)))
            .with("oidc_conformant", AttributeValue::literal(true))
    }

    fn credentials_secret(&self, target: &CredentialsTarget) -> Vec<ResourceDescriptor> {
        let labels = standard_labels(&target.app_name, "auth0-credentials");
        let server = self.server_app_ref();
        let mut secret = ResourceDescriptor::new(
            ResourceKind::SecretStore,
            IdentityKey::scoped(&target.namespace, target.secret_name()),
        )
        .with_labels(&labels)
        .with(
            "server-client-id",
            AttributeValue::reference(server.clone(), "client_id"),
        )
        .with(
            "server-client-secret",
            self.client_secret(&server),
        )
        .with("auth0-domain", AttributeValue::literal(self.domain.as_str()))
        .depends_on(server);

        if self.management_app {
            let management = self.management_app_ref();
            secret = secret
                .with(
                    "mgmt-client-id",
                    AttributeValue::reference(management.clone(), "client_id"),
                )
                .with("mgmt-client-secret", self.client_secret(&management))
                .depends_on(management);
        }
        if let Some(connection_id) = &self.connection_id {
            secret = secret.with("connection-id", AttributeValue::literal(connection_id.as_str()));
        }

        let mut descriptors = Vec::new();
        if let Some(namespace) = super::secrets::namespace_descriptor(&target.namespace, &target.app_name) {
            secret = secret.depends_on(namespace.resource_ref());
            descriptors.push(namespace);
        }
        descriptors.push(secret);
        descriptors
    }
}

impl Auth0Plan {
    /// Listings omit `client_secret` without `read:client_keys`, so a stored
    /// secret wins unless the applications are being recreated
    fn client_secret(&self, app: &ResourceRef) -> AttributeValue {
        let fresh = AttributeValue::reference(app.clone(), "client_secret");
        if self.refresh_secrets {
            fresh
        } else {
            AttributeValue::preserve_or(fresh)
        }
    }
}

fn application(name: String) -> ResourceRef {
    ResourceRef::new(ResourceKind::OAuthApplication, IdentityKey::named(name))
}

fn grant<'a>(
    app: &ResourceRef,
    audience: &str,
    scopes: impl Iterator<Item = &'a &'a str>,
) -> ResourceDescriptor {
    let scopes: Vec<&str> = scopes.copied().collect();
    ResourceDescriptor::new(
        ResourceKind::ClientGrant,
        IdentityKey::scoped(audience, &app.key.name),
    )
    .with("scope", AttributeValue::include(json!(scopes)))
    .depends_on(app.clone())
}

/// `scheme://host[:port]` of an audience URL
pub fn audience_origin(audience: &str) -> Result<String> {
    let url = Url::parse(audience)
        .with_context(|| format!("API audience '{audience}' is not a valid URL"))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        anyhow::bail!("API audience '{audience}' must be an http(s) URL with a host");
    }
    Ok(url.origin().ascii_serialization())
}
