//! # Output Files
//!
//! Artifacts written after a run:
//!
//! - Helm values for the MCP server chart (`oidc-values.yaml`)
//! - a `.env` file for running the server locally
//! - `.gitignore` entries for the files above that hold credentials
//! - RBAC manifests equivalent to what `setup-rbac` applies
//! - the redacted report JSON
//!
//! Anything that may contain secret material goes through [`write_private`],
//! which restricts the file to its owner on Unix.

use crate::config::{DeploymentConfig, ImageSettings, ProviderKind};
use crate::constants::{DEFAULT_HELM_VALUES_FILE, LOCAL_REDIS_URL};
use crate::plans::RbacPlan;
use crate::report::ReconciliationReport;
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use serde_json::{json, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

/// Ingress host used when the audience has none
const FALLBACK_INGRESS_HOST: &str = "mcp-api.example.com";

/// Write `contents` readable by the owner only (mode 0600 on Unix)
pub fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("Failed to open {} for writing", path.display()))?;

    // `mode` only applies to newly created files
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict permissions on {}", path.display()))?;
    }

    file.write_all(contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!("Wrote {} bytes to {} (owner only)", contents.len(), path.display());
    Ok(())
}

/// Write a file that holds no secret material
pub fn write_public(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

/// Helm values for deploying the server against the configured provider
#[must_use]
pub fn helm_values(config: &DeploymentConfig, image: &ImageSettings) -> Value {
    let ingress_host = Url::parse(&config.audience)
        .ok()
        .and_then(|url| url.host_str().map(ToString::to_string))
        .unwrap_or_else(|| FALLBACK_INGRESS_HOST.to_string());
    let client_id = config
        .server_client
        .as_ref()
        .map(|c| c.client_id.clone())
        .unwrap_or_default();

    let mut values = json!({
        "image": {
            "repository": image.repository,
            "pullPolicy": image.pull_policy(),
            "tag": image.tag,
        },
        "replicaCount": 1,
        "oidc": {
            "issuer": config.issuer,
            "audience": config.audience,
            "clientId": client_id,
        },
        "service": {"type": "ClusterIP"},
        "ingress": {
            "enabled": true,
            "className": "nginx",
            "annotations": {"cert-manager.io/cluster-issuer": "letsencrypt"},
            "host": ingress_host,
            "path": "/",
            "pathType": "Prefix",
            "tls": {"enabled": true},
        },
        "resources": {
            "requests": {"memory": "256Mi", "cpu": "100m"},
            "limits": {"memory": "512Mi", "cpu": "500m"},
        },
        "podSecurityContext": {
            "runAsNonRoot": true,
            "runAsUser": 1000,
            "fsGroup": 1000,
        },
        "securityContext": {
            "allowPrivilegeEscalation": false,
            "capabilities": {"drop": ["ALL"]},
        },
    });

    if let Some(jwks_uri) = &config.jwks_uri {
        values["oidc"]["jwksUri"] = json!(jwks_uri);
    }
    if config.provider() == ProviderKind::Auth0 {
        values["testSidecar"] = json!({
            "enabled": true,
            "repository": format!("{}-test-server", image.repository),
            "pullPolicy": image.pull_policy(),
            "tag": image.tag,
        });
    }
    values
}

/// Helm values as YAML with a short header naming the credentials Secret
pub fn render_helm_values(config: &DeploymentConfig, image: &ImageSettings) -> Result<String> {
    let secret_suffix = match config.provider() {
        ProviderKind::Auth0 => "auth0-credentials",
        ProviderKind::Generic => "oidc-credentials",
    };
    let body = serde_yaml::to_string(&helm_values(config, image))
        .context("Failed to render Helm values")?;
    Ok(format!(
        "# Helm values for the MCP server ({provider} provider)\n\
         # The client secret is read from the <release-name>-{secret_suffix} Secret.\n\
         # Deploy with: helm install mcp-server ./chart -f oidc-values.yaml\n{body}",
        provider = config.provider(),
    ))
}

/// Render the Helm values into `output_dir`, taking image settings from its `make.env`
pub fn write_helm_values(config: &DeploymentConfig, output_dir: &Path) -> Result<PathBuf> {
    let image = ImageSettings::from_make_env(output_dir)?;
    let rendered = render_helm_values(config, &image)?;
    let path = output_dir.join(DEFAULT_HELM_VALUES_FILE);
    write_public(&path, rendered.as_bytes())?;
    Ok(path)
}

/// Local settings that are not part of the saved deployment config
#[derive(Debug, Clone)]
pub struct LocalEnv {
    pub server_name: String,
    pub namespace: String,
    pub port: u16,
}

/// `.env` contents for running the server outside the cluster
#[must_use]
pub fn render_env_file(config: &DeploymentConfig, local: &LocalEnv) -> String {
    let (client_id, client_secret) = config
        .server_client
        .as_ref()
        .map(|c| (c.client_id.as_str(), c.client_secret.as_str()))
        .unwrap_or_default();
    let mut lines = vec![
        format!("# {} MCP server: local development settings", local.server_name),
        "# Generated by oidc-deploy make-config. Do not commit this file.".to_string(),
        String::new(),
        format!("OIDC_ISSUER={}", config.issuer),
        format!("OIDC_AUDIENCE={}", config.audience),
    ];
    if let Some(domain) = &config.domain {
        lines.push(format!("AUTH0_DOMAIN={domain}"));
    }
    lines.extend([
        format!("OIDC_CLIENT_ID={client_id}"),
        format!("OIDC_CLIENT_SECRET={client_secret}"),
        String::new(),
        format!("K8S_NAMESPACE={}", local.namespace),
        format!("PORT={}", local.port),
        format!("REDIS_URL={LOCAL_REDIS_URL}"),
    ]);
    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

/// Append the `entries` missing from the ignore file at `path`; returns the ones added
pub fn append_gitignore(path: &Path, entries: &[&str]) -> Result<Vec<String>> {
    let existing = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };
    let present: Vec<&str> = existing.lines().map(str::trim).collect();
    let missing: Vec<String> = entries
        .iter()
        .filter(|entry| !present.contains(*entry))
        .map(ToString::to_string)
        .collect();
    if missing.is_empty() {
        return Ok(missing);
    }

    let mut addition = String::new();
    if !existing.is_empty() && !existing.ends_with('\n') {
        addition.push('\n');
    }
    addition.push_str("# oidc-deploy: files holding credentials\n");
    for entry in &missing {
        addition.push_str(entry);
        addition.push('\n');
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {} for appending", path.display()))?;
    file.write_all(addition.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!("Added {} entries to {}", missing.len(), path.display());
    Ok(missing)
}

/// Multi-document YAML for the ServiceAccount, role and binding of `plan`
pub fn rbac_manifests(plan: &RbacPlan) -> Result<String> {
    let labels = crate::plans::standard_labels(&plan.app_name, "rbac");
    let meta = |name: String, namespaced: bool| ObjectMeta {
        name: Some(name),
        namespace: namespaced.then(|| plan.namespace.clone()),
        labels: Some(labels.clone()),
        ..ObjectMeta::default()
    };
    let rules: Vec<PolicyRule> =
        serde_json::from_value(plan.rules_value()).context("Invalid policy rules")?;
    let role_ref: RoleRef =
        serde_json::from_value(plan.role_ref_value()).context("Invalid roleRef")?;
    let subjects: Vec<Subject> =
        serde_json::from_value(plan.subjects_value()).context("Invalid subjects")?;

    let service_account = ServiceAccount {
        metadata: meta(plan.service_account.clone(), true),
        ..ServiceAccount::default()
    };

    let mut documents = vec![to_yaml(&service_account)?];
    match plan.scope {
        crate::plans::RbacScope::Cluster => {
            documents.push(to_yaml(&ClusterRole {
                metadata: meta(plan.role_name(), false),
                rules: Some(rules),
                ..ClusterRole::default()
            })?);
            documents.push(to_yaml(&ClusterRoleBinding {
                metadata: meta(plan.binding_name(), false),
                role_ref,
                subjects: Some(subjects),
            })?);
        }
        crate::plans::RbacScope::Namespace => {
            documents.push(to_yaml(&Role {
                metadata: meta(plan.role_name(), true),
                rules: Some(rules),
            })?);
            documents.push(to_yaml(&RoleBinding {
                metadata: meta(plan.binding_name(), true),
                role_ref,
                subjects: Some(subjects),
            })?);
        }
    }
    Ok(documents.join("---\n"))
}

fn to_yaml(object: &impl Serialize) -> Result<String> {
    serde_yaml::to_string(object).context("Failed to render manifest")
}

/// Write the redacted report summary as pretty JSON (mode 0600)
pub fn write_report(path: &Path, report: &ReconciliationReport) -> Result<()> {
    let raw = serde_json::to_string_pretty(&report.summary()).context("Failed to serialize report")?;
    write_private(path, raw.as_bytes())
}
