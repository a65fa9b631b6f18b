//! # Configuration
//!
//! Three sources feed every command:
//!
//! - the saved deployment config (`oidc-config.json`), written by `setup-oidc`
//!   and read by the other commands
//! - environment variables, read once into [`Settings`]
//! - command-line flags
//!
//! Precedence is flag > environment > saved file > default ([`pick`]).
//!
//! `make.env` (REGISTRY, IMAGE_NAME, TAG) describes the container image that the
//! generated Helm values point at.

use crate::constants::{DEFAULT_CALL_TIMEOUT_SECS, DEFAULT_CONFIG_FILE};
use crate::output::write_private;
use anyhow::{Context, Result};
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Release tags (v1.2.3, v2.0.0-rc.1) are immutable and can be cached
static RELEASE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v\d+\.\d+\.\d+")
        .expect("Failed to compile RELEASE_TAG pattern - this should never happen")
});

/// Default image registry when make.env does not name one
const DEFAULT_REGISTRY: &str = "your-registry.example.com";

/// Identity provider flavour recorded in the saved config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Auth0 tenant managed through the Management API
    #[default]
    Auth0,
    /// Any OIDC provider configured by hand (Dex, Keycloak, Okta, ...)
    Generic,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Auth0 => f.write_str("auth0"),
            ProviderKind::Generic => f.write_str("generic"),
        }
    }
}

/// OAuth client id and (optional) secret
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentials {
    #[serde(default)]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    #[must_use]
    pub fn has_secret(&self) -> bool {
        !self.client_secret.is_empty()
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("has_secret", &self.has_secret())
            .finish()
    }
}

/// Contents of the saved deployment config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_api: Option<ClientCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_client: Option<ClientCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_client: Option<ClientCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub dcr_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
}

impl DeploymentConfig {
    /// Read the saved config; a missing file is not an error
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            debug!("No saved config at {}", path.display());
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(config))
    }

    /// Write the config with owner-only permissions; it holds client secrets
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        write_private(path, raw.as_bytes())
    }

    /// Configs without a provider field that name a domain are Auth0 configs
    #[must_use]
    pub fn provider(&self) -> ProviderKind {
        if self.domain.is_some() {
            return ProviderKind::Auth0;
        }
        self.provider.unwrap_or_default()
    }

    /// Keep secrets from `previous` wherever this config has none for the same client
    pub fn preserve_secrets_from(&mut self, previous: &DeploymentConfig) {
        fn keep(current: Option<&mut ClientCredentials>, previous: Option<&ClientCredentials>) {
            if let (Some(current), Some(previous)) = (current, previous) {
                if !current.has_secret() && current.client_id == previous.client_id {
                    current.client_secret.clone_from(&previous.client_secret);
                }
            }
        }
        keep(self.management_api.as_mut(), previous.management_api.as_ref());
        keep(self.server_client.as_mut(), previous.server_client.as_ref());
    }

    /// Fields a credentials Secret cannot be built without
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.issuer.is_empty() {
            missing.push("issuer");
        }
        if self.audience.is_empty() {
            missing.push("audience");
        }
        match self.provider() {
            ProviderKind::Auth0 => {
                if self.domain.as_deref().is_none_or(str::is_empty) {
                    missing.push("domain");
                }
                if self.management_api.is_none() {
                    missing.push("management_api");
                }
            }
            ProviderKind::Generic => {
                if self.server_client.is_none() {
                    missing.push("server_client");
                }
            }
        }
        missing
    }
}

/// Settings read from the environment
#[derive(Clone)]
pub struct Settings {
    pub config_file: PathBuf,
    pub call_timeout_secs: u64,
    pub log_level: String,
    pub log_format: String,
    pub auth0_domain: Option<String>,
    pub auth0_mgmt_token: Option<Zeroizing<String>>,
    pub auth0_api_identifier: Option<String>,
    pub deployment_name: Option<String>,
    pub oidc_issuer: Option<String>,
    pub oidc_audience: Option<String>,
    pub oidc_client_id: Option<String>,
    pub oidc_client_secret: Option<Zeroizing<String>>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("config_file", &self.config_file)
            .field("call_timeout_secs", &self.call_timeout_secs)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("auth0_domain", &self.auth0_domain)
            .field("auth0_api_identifier", &self.auth0_api_identifier)
            .field("oidc_issuer", &self.oidc_issuer)
            .field("oidc_audience", &self.oidc_audience)
            .finish_non_exhaustive()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            auth0_domain: None,
            auth0_mgmt_token: None,
            auth0_api_identifier: None,
            deployment_name: None,
            oidc_issuer: None,
            oidc_audience: None,
            oidc_client_id: None,
            oidc_client_secret: None,
        }
    }
}

impl Settings {
    /// Load settings from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through `lookup`, which returns the raw value of a variable
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            config_file: PathBuf::from(var_or_default(&var, "OIDC_DEPLOY_CONFIG_FILE", DEFAULT_CONFIG_FILE.to_string())),
            call_timeout_secs: var_or_default(&var, "CALL_TIMEOUT_SECS", DEFAULT_CALL_TIMEOUT_SECS),
            log_level: var_or_default(&var, "LOG_LEVEL", "info".to_string()),
            log_format: var_or_default(&var, "LOG_FORMAT", "text".to_string()),
            auth0_domain: var("AUTH0_DOMAIN"),
            auth0_mgmt_token: var("AUTH0_MGMT_TOKEN").map(Zeroizing::new),
            auth0_api_identifier: var("AUTH0_API_IDENTIFIER"),
            deployment_name: var("DEPLOYMENT_NAME"),
            oidc_issuer: var("OIDC_ISSUER"),
            oidc_audience: var("OIDC_AUDIENCE"),
            oidc_client_id: var("OIDC_CLIENT_ID"),
            oidc_client_secret: var("OIDC_CLIENT_SECRET").map(Zeroizing::new),
        }
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Read a variable through `var` or return the default
fn var_or_default<T: std::str::FromStr>(var: impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: fmt::Debug,
{
    match var(key).map(|v| v.parse::<T>()) {
        Some(Ok(value)) => value,
        Some(Err(e)) => {
            warn!("Ignoring invalid {}: {:?}", key, e);
            default
        }
        None => default,
    }
}

/// First value present, in flag > environment > file order
pub fn pick<T>(flag: Option<T>, env: Option<T>, file: Option<T>) -> Option<T> {
    flag.or(env).or(file)
}

/// Container image the Helm values point at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSettings {
    pub repository: String,
    pub tag: String,
}

impl ImageSettings {
    /// Read `make.env` from `dir`; missing files and keys fall back to defaults
    pub fn from_make_env(dir: &Path) -> Result<Self> {
        let path = dir.join("make.env");
        let mut values = HashMap::new();
        if path.exists() {
            for item in dotenvy::from_path_iter(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?
            {
                let (key, value) =
                    item.with_context(|| format!("Failed to parse {}", path.display()))?;
                values.insert(key, value);
            }
        }
        Ok(Self::from_values(&values))
    }

    #[must_use]
    pub fn from_values(values: &HashMap<String, String>) -> Self {
        let registry = values
            .get("REGISTRY")
            .map_or(DEFAULT_REGISTRY, String::as_str);
        let image_name = values
            .get("IMAGE_NAME")
            .map_or(crate::constants::DEFAULT_APP_NAME, String::as_str);
        Self {
            repository: format!("{registry}/{image_name}"),
            tag: values.get("TAG").cloned().unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn is_release_tag(&self) -> bool {
        RELEASE_TAG.is_match(&self.tag)
    }

    /// `IfNotPresent` for release tags, `Always` for moving dev tags
    #[must_use]
    pub fn pull_policy(&self) -> &'static str {
        if self.is_release_tag() {
            "IfNotPresent"
        } else {
            "Always"
        }
    }
}
