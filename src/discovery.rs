//! # OIDC Discovery
//!
//! Validates a generic OIDC issuer by fetching
//! `{issuer}/.well-known/openid-configuration` and checking the fields a
//! server needs to validate tokens.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

/// Fields every usable discovery document carries
pub const REQUIRED_FIELDS: &[&str] = &[
    "issuer",
    "authorization_endpoint",
    "token_endpoint",
    "jwks_uri",
];

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid issuer URL '{issuer}': {reason}")]
    InvalidIssuer { issuer: String, reason: String },
    #[error("could not fetch {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("discovery document at {url} is missing required fields: {}", missing.join(", "))]
    MissingFields { url: String, missing: Vec<String> },
}

/// The parts of a discovery document the tooling records
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
}

/// Discovery URL for an issuer
pub fn discovery_url(issuer: &str) -> Result<Url, DiscoveryError> {
    let trimmed = issuer.trim().trim_end_matches('/');
    let invalid = |reason: String| DiscoveryError::InvalidIssuer {
        issuer: issuer.to_string(),
        reason,
    };
    let base = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
    if !matches!(base.scheme(), "https" | "http") {
        return Err(invalid(format!("unsupported scheme '{}'", base.scheme())));
    }
    Url::parse(&format!("{trimmed}/.well-known/openid-configuration"))
        .map_err(|e| invalid(e.to_string()))
}

/// Check a raw discovery document for the required fields
pub fn parse_document(url: &str, raw: &serde_json::Value) -> Result<DiscoveryDocument, DiscoveryError> {
    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| raw.get(**field).and_then(|v| v.as_str()).is_none())
        .map(|field| (*field).to_string())
        .collect();
    if !missing.is_empty() {
        return Err(DiscoveryError::MissingFields {
            url: url.to_string(),
            missing,
        });
    }
    serde_json::from_value(raw.clone()).map_err(|e| DiscoveryError::Fetch {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// Fetch and validate the discovery document of `issuer`
pub async fn validate_issuer(
    issuer: &str,
    timeout: Duration,
) -> Result<DiscoveryDocument, DiscoveryError> {
    let url = discovery_url(issuer)?;
    let fetch_error = |message: String| DiscoveryError::Fetch {
        url: url.to_string(),
        message,
    };

    let client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| fetch_error(e.to_string()))?;
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| fetch_error(e.to_string()))?;
    if !response.status().is_success() {
        return Err(fetch_error(format!("HTTP {}", response.status())));
    }
    let raw: serde_json::Value = response
        .json()
        .await
        .map_err(|e| fetch_error(e.to_string()))?;

    let document = parse_document(url.as_str(), &raw)?;
    if document.issuer.trim_end_matches('/') != issuer.trim().trim_end_matches('/') {
        warn!(
            "Discovery document issuer '{}' differs from configured issuer '{}'",
            document.issuer, issuer
        );
    }
    info!("Validated OIDC issuer {}", document.issuer);
    Ok(document)
}
