//! # Auth0 Store
//!
//! [`RemoteStore`] over the Auth0 Management API v2.
//!
//! | Kind | Identity key | Endpoint |
//! |---|---|---|
//! | `OAuthApplication` | client name | `/clients` |
//! | `ApiResource` | API identifier (audience) | `/resource-servers` |
//! | `ClientGrant` | client name, scoped by audience | `/client-grants` |
//! | `TenantSettings` | any (singleton) | `/tenants/settings` |
//! | `UserGrant` | user e-mail | `/users-by-email`, `/users/{id}` |
//! | `Connection` | connection id | `/connections/{id}` |
//!
//! Tenant settings always exist, while users and login connections are managed
//! elsewhere. None of them can be created or deleted here, only updated.

use super::{RemoteState, RemoteStore, StoreError, StoreOperation};
use crate::constants::PROVIDER_PAGE_SIZE;
use crate::descriptor::{Attributes, Labels, ResourceKind, ResourceRef};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, info_span, Instrument};
use zeroize::Zeroizing;

const STORE_NAME: &str = "auth0";

/// Error body returned by the Management API
#[derive(Debug, Deserialize)]
struct Auth0ErrorResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: String,
}

/// Auth0 Management API client holding a pre-acquired bearer token
#[derive(Clone)]
pub struct Auth0Store {
    http_client: Client,
    base_url: String,
    access_token: Zeroizing<String>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Auth0Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth0Store")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Auth0Store {
    /// Create a client for `https://{domain}/api/v2`
    pub fn new(domain: &str, access_token: impl Into<String>) -> Result<Self, StoreError> {
        let domain = domain
            .trim_start_matches("https://")
            .trim_end_matches('/');
        Self::with_base_url(format!("https://{domain}/api/v2"), access_token)
    }

    /// Create a client against an explicit API base URL
    pub fn with_base_url(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let http_client = Client::builder()
            .build()
            .map_err(|e| StoreError::Connect(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: Zeroizing::new(access_token.into()),
            timeout: None,
        })
    }

    /// Per-request timeout applied by the HTTP client
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Check that the token is accepted, telling an expired token from an invalid one
    pub async fn verify(&self) -> Result<(), StoreError> {
        match self
            .send(Method::GET, "/clients", &[("per_page", "1".into())], None)
            .await
        {
            Ok(_) => Ok(()),
            Err(StoreError::Unauthorized(message)) if message.to_lowercase().contains("expired") => {
                Err(StoreError::Unauthorized(format!(
                    "management API token has expired ({message}); generate a new token and rerun"
                )))
            }
            Err(StoreError::Unauthorized(message)) => Err(StoreError::Unauthorized(format!(
                "management API token is invalid or lacks required permissions ({message})"
            ))),
            Err(e) => Err(e),
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, StoreError> {
        let url = format!("{}{path}", self.base_url);
        debug!("{} {}", method, url);

        let mut request = self
            .http_client
            .request(method, &url)
            .bearer_auth(self.access_token.as_str())
            .query(query);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| self.transport_error(&e))?;
        let status = response.status();

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<Auth0ErrorResponse>(&error_text) {
                Ok(body) if !body.message.is_empty() => body.message,
                Ok(body) if !body.error.is_empty() => body.error,
                _ => error_text,
            };
            return Err(StoreError::from_status(status.as_u16(), message));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| StoreError::Payload(format!("invalid JSON from {url}: {e}")))
    }

    fn transport_error(&self, error: &reqwest::Error) -> StoreError {
        if error.is_timeout() {
            StoreError::Timeout(self.timeout.unwrap_or_default())
        } else if error.is_connect() {
            StoreError::Connect(error.to_string())
        } else {
            StoreError::Transport(error.to_string())
        }
    }

    /// Walk a paginated list endpoint until `matches` finds an entry
    async fn find_in_pages(
        &self,
        path: &str,
        matches: impl Fn(&Value) -> bool + Send,
    ) -> Result<Option<Value>, StoreError> {
        for page in 0.. {
            let query = [
                ("page", page.to_string()),
                ("per_page", PROVIDER_PAGE_SIZE.to_string()),
            ];
            let items = self.send(Method::GET, path, &query, None).await?;
            let Value::Array(items) = items else {
                return Err(StoreError::Payload(format!("expected a list from {path}")));
            };
            let last_page = items.len() < PROVIDER_PAGE_SIZE;
            if let Some(found) = items.into_iter().find(|item| matches(item)) {
                return Ok(Some(found));
            }
            if last_page {
                break;
            }
        }
        Ok(None)
    }

    async fn find_client(&self, name: &str) -> Result<Option<Value>, StoreError> {
        self.find_in_pages("/clients", |c| c["name"].as_str() == Some(name))
            .await
    }

    async fn find_resource_server(&self, identifier: &str) -> Result<Option<Value>, StoreError> {
        self.find_in_pages("/resource-servers", |rs| {
            rs["identifier"].as_str() == Some(identifier)
        })
        .await
    }

    async fn find_client_grant(
        &self,
        client_name: &str,
        audience: &str,
    ) -> Result<Option<Value>, StoreError> {
        let Some(client) = self.find_client(client_name).await? else {
            return Ok(None);
        };
        let client_id = string_field(&client, "client_id")?;
        let grants = self
            .send(
                Method::GET,
                "/client-grants",
                &[("client_id", client_id), ("audience", audience.to_string())],
                None,
            )
            .await?;
        Ok(match grants {
            Value::Array(grants) => grants.into_iter().next(),
            _ => None,
        })
    }

    async fn find_user(&self, email: &str) -> Result<Option<Value>, StoreError> {
        let users = self
            .send(
                Method::GET,
                "/users-by-email",
                &[("email", email.to_string())],
                None,
            )
            .await?;
        Ok(match users {
            Value::Array(users) => users.into_iter().next(),
            _ => None,
        })
    }

    async fn find_connection(&self, id: &str) -> Result<Option<Value>, StoreError> {
        match self
            .send(Method::GET, &Self::item_path(ResourceKind::Connection, id), &[], None)
            .await
        {
            Ok(connection) => Ok(Some(connection)),
            Err(StoreError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Current object for `resource` together with its provider-side id
    async fn locate(&self, resource: &ResourceRef) -> Result<Option<(String, Value)>, StoreError> {
        let name = resource.key.name.as_str();
        let (object, id_field) = match resource.kind {
            ResourceKind::OAuthApplication => (self.find_client(name).await?, "client_id"),
            ResourceKind::ApiResource => (self.find_resource_server(name).await?, "id"),
            ResourceKind::ClientGrant => (
                self.find_client_grant(name, audience(resource)?).await?,
                "id",
            ),
            ResourceKind::UserGrant => (self.find_user(name).await?, "user_id"),
            ResourceKind::Connection => (self.find_connection(name).await?, "id"),
            ResourceKind::TenantSettings => {
                let settings = self
                    .send(Method::GET, "/tenants/settings", &[], None)
                    .await?;
                return Ok(Some((String::new(), settings)));
            }
            kind => return Err(unsupported_kind(kind)),
        };
        object
            .map(|object| Ok((string_field(&object, id_field)?, object)))
            .transpose()
    }

    /// Path addressing one object of `kind` by its provider-side id
    fn item_path(kind: ResourceKind, id: &str) -> String {
        match kind {
            ResourceKind::OAuthApplication => format!("/clients/{id}"),
            ResourceKind::ApiResource => format!("/resource-servers/{id}"),
            ResourceKind::ClientGrant => format!("/client-grants/{id}"),
            ResourceKind::UserGrant => format!("/users/{id}"),
            ResourceKind::Connection => format!("/connections/{id}"),
            _ => "/tenants/settings".to_string(),
        }
    }
}

#[async_trait]
impl RemoteStore for Auth0Store {
    fn name(&self) -> &'static str {
        STORE_NAME
    }

    async fn find(&self, resource: &ResourceRef) -> Result<RemoteState, StoreError> {
        let span = info_span!("auth0.find", resource = %resource);
        async move {
            Ok(match self.locate(resource).await? {
                Some((_, object)) => RemoteState::present(into_attributes(object)),
                None => RemoteState::absent(),
            })
        }
        .instrument(span)
        .await
    }

    async fn create(
        &self,
        resource: &ResourceRef,
        attributes: &Attributes,
        _labels: &Labels,
    ) -> Result<RemoteState, StoreError> {
        let span = info_span!("auth0.create", resource = %resource);
        async move {
            let name = resource.key.name.as_str();
            let mut body = Value::Object(attributes.clone().into_iter().collect());
            let path = match resource.kind {
                ResourceKind::OAuthApplication => {
                    body["name"] = json!(name);
                    "/clients"
                }
                ResourceKind::ApiResource => {
                    body["identifier"] = json!(name);
                    "/resource-servers"
                }
                ResourceKind::ClientGrant => {
                    let client = self.find_client(name).await?.ok_or_else(|| StoreError::Api {
                        status: 404,
                        message: format!("client '{name}' does not exist"),
                    })?;
                    body["client_id"] = json!(string_field(&client, "client_id")?);
                    body["audience"] = json!(audience(resource)?);
                    "/client-grants"
                }
                ResourceKind::TenantSettings | ResourceKind::UserGrant | ResourceKind::Connection => {
                    return Err(StoreError::UnsupportedOperation {
                        kind: resource.kind,
                        operation: StoreOperation::Create,
                        store: STORE_NAME,
                    });
                }
                kind => return Err(unsupported_kind(kind)),
            };

            let created = self.send(Method::POST, path, &[], Some(&body)).await?;
            info!("Created {} '{}'", resource.kind, name);
            Ok(RemoteState::present(into_attributes(created)))
        }
        .instrument(span)
        .await
    }

    async fn update(
        &self,
        resource: &ResourceRef,
        attributes: &Attributes,
    ) -> Result<RemoteState, StoreError> {
        let span = info_span!("auth0.update", resource = %resource);
        async move {
            let (id, _) = self.locate(resource).await?.ok_or_else(|| StoreError::Api {
                status: 404,
                message: format!("{resource} does not exist"),
            })?;
            let body = Value::Object(attributes.clone().into_iter().collect());
            let updated = self
                .send(
                    Method::PATCH,
                    &Self::item_path(resource.kind, &id),
                    &[],
                    Some(&body),
                )
                .await?;
            info!("Updated {} '{}'", resource.kind, resource.key.name);
            Ok(RemoteState::present(into_attributes(updated)))
        }
        .instrument(span)
        .await
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<bool, StoreError> {
        let span = info_span!("auth0.delete", resource = %resource);
        async move {
            if matches!(
                resource.kind,
                ResourceKind::TenantSettings | ResourceKind::UserGrant | ResourceKind::Connection
            ) {
                return Err(StoreError::UnsupportedOperation {
                    kind: resource.kind,
                    operation: StoreOperation::Delete,
                    store: STORE_NAME,
                });
            }
            let Some((id, _)) = self.locate(resource).await? else {
                return Ok(false);
            };
            match self
                .send(Method::DELETE, &Self::item_path(resource.kind, &id), &[], None)
                .await
            {
                Ok(_) => {
                    info!("Deleted {} '{}'", resource.kind, resource.key.name);
                    Ok(true)
                }
                Err(StoreError::Api { status: 404, .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }
        .instrument(span)
        .await
    }
}

fn unsupported_kind(kind: ResourceKind) -> StoreError {
    StoreError::UnsupportedKind {
        kind,
        store: STORE_NAME,
    }
}

fn audience(resource: &ResourceRef) -> Result<&str, StoreError> {
    resource
        .key
        .scope
        .as_deref()
        .ok_or_else(|| StoreError::Payload(format!("{resource} has no audience")))
}

fn string_field(object: &Value, field: &str) -> Result<String, StoreError> {
    object[field]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| StoreError::Payload(format!("response is missing '{field}'")))
}

fn into_attributes(object: Value) -> Attributes {
    match object {
        Value::Object(fields) => fields.into_iter().collect(),
        _ => Attributes::new(),
    }
}
