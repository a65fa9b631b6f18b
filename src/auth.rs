//! # Management Token Acquisition
//!
//! Obtains an Auth0 Management API token with the client-credentials grant,
//! using the management application's saved credentials. Stores receive the
//! resulting token; they never refresh it themselves.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("token endpoint rejected the client credentials (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("token response did not contain an access token: {0}")]
    InvalidResponse(String),
}

#[derive(Serialize)]
struct ClientCredentialsRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    audience: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Credentials of the machine-to-machine management application
#[derive(Clone)]
pub struct ManagementCredentials {
    pub domain: String,
    pub client_id: String,
    pub client_secret: Zeroizing<String>,
}

impl std::fmt::Debug for ManagementCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagementCredentials")
            .field("domain", &self.domain)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Management API audience for a tenant domain
#[must_use]
pub fn management_audience(domain: &str) -> String {
    format!("https://{}/api/v2/", normalize_domain(domain))
}

/// Strip scheme and trailing slash from a tenant domain
#[must_use]
pub fn normalize_domain(domain: &str) -> &str {
    domain
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
}

/// Exchange management client credentials for a Management API token
pub async fn fetch_management_token(
    credentials: &ManagementCredentials,
    timeout: Duration,
) -> Result<Zeroizing<String>, AuthError> {
    let domain = normalize_domain(&credentials.domain);
    fetch_token_from(
        &format!("https://{domain}/oauth/token"),
        credentials,
        timeout,
    )
    .await
}

/// Same as [`fetch_management_token`] against an explicit token URL
pub async fn fetch_token_from(
    token_url: &str,
    credentials: &ManagementCredentials,
    timeout: Duration,
) -> Result<Zeroizing<String>, AuthError> {
    let request_error = |source| AuthError::Request {
        url: token_url.to_string(),
        source,
    };
    let client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(request_error)?;

    debug!("Requesting management token from {}", token_url);
    let response = client
        .post(token_url)
        .json(&ClientCredentialsRequest {
            grant_type: "client_credentials",
            client_id: &credentials.client_id,
            client_secret: &credentials.client_secret,
            audience: management_audience(&credentials.domain),
        })
        .send()
        .await
        .map_err(request_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::Rejected {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        });
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
    if token.access_token.is_empty() {
        return Err(AuthError::InvalidResponse("empty access_token".to_string()));
    }
    info!(
        "Obtained management API token (expires in {}s)",
        token.expires_in.unwrap_or_default()
    );
    Ok(Zeroizing::new(token.access_token))
}
