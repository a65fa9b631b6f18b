//! # Output File Tests
//!
//! Saved config, Helm values, `.env`, `.gitignore`, RBAC manifests and report
//! files written to a temporary directory.

use oidc_deploy::config::{ClientCredentials, DeploymentConfig, ImageSettings, ProviderKind};
use oidc_deploy::constants::GITIGNORE_ENTRIES;
use oidc_deploy::output::{
    append_gitignore, rbac_manifests, render_env_file, render_helm_values, write_helm_values,
    write_private, write_report, LocalEnv,
};
use oidc_deploy::plans::{RbacPlan, RbacScope};
use oidc_deploy::report::{ActionTaken, ReconciliationReport, ReconciliationResult};
use oidc_deploy::{IdentityKey, ResourceKind, ResourceRef};
use serde_json::json;
use tempfile::TempDir;

fn auth0_config() -> DeploymentConfig {
    DeploymentConfig {
        provider: Some(ProviderKind::Auth0),
        domain: Some("tenant.auth0.com".to_string()),
        issuer: "https://tenant.auth0.com".to_string(),
        audience: "https://mcp.example.com/mcp".to_string(),
        management_api: Some(ClientCredentials::new("mgmt-1", "mgmt-secret")),
        server_client: Some(ClientCredentials::new("srv-1", "srv-secret")),
        test_client: Some(ClientCredentials::new("tst-1", "")),
        ..DeploymentConfig::default()
    }
}

#[cfg(unix)]
fn mode(path: &std::path::Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).unwrap().permissions().mode() & 0o777
}

#[test]
fn test_config_round_trip_is_owner_only() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("oidc-config.json");

    assert_eq!(DeploymentConfig::load(&path).unwrap(), None);
    auth0_config().save(&path).unwrap();

    assert_eq!(DeploymentConfig::load(&path).unwrap(), Some(auth0_config()));
    #[cfg(unix)]
    assert_eq!(mode(&path), 0o600);
}

#[cfg(unix)]
#[test]
fn test_private_write_tightens_existing_file() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("report.json");
    std::fs::write(&path, "old").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

    write_private(&path, b"new").unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    assert_eq!(mode(&path), 0o600);
}

#[test]
fn test_corrupt_config_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("oidc-config.json");
    std::fs::write(&path, "{not json").unwrap();

    let err = DeploymentConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse"));
}

#[test]
fn test_helm_values_use_make_env() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("make.env"),
        "REGISTRY=ghcr.io/acme\nIMAGE_NAME=mcp\nTAG=v1.4.0\n",
    )
    .unwrap();

    let image = ImageSettings::from_make_env(dir.path()).unwrap();
    let rendered = render_helm_values(&auth0_config(), &image).unwrap();
    let values: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();

    assert!(rendered.starts_with("# Helm values"));
    assert_eq!(values["image"]["repository"], "ghcr.io/acme/mcp");
    assert_eq!(values["image"]["pullPolicy"], "IfNotPresent");
    assert_eq!(values["ingress"]["host"], "mcp.example.com");
    assert_eq!(values["oidc"]["clientId"], "srv-1");
    assert!(!rendered.contains("srv-secret"));
}

#[test]
fn test_missing_make_env_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let image = ImageSettings::from_make_env(dir.path()).unwrap();
    assert!(image.repository.ends_with("/mcp-server"));
    assert_eq!(image.pull_policy(), "Always");
}

#[test]
fn test_manifests_parse_as_kubernetes_objects() {
    let plan = RbacPlan::new("mcp-server", "tools").scope(RbacScope::Namespace);
    let rendered = rbac_manifests(&plan).unwrap();

    let namespaces: Vec<String> = rendered
        .split("---\n")
        .map(|doc| {
            let value: serde_yaml::Value = serde_yaml::from_str(doc).unwrap();
            value["metadata"]["namespace"].as_str().map_or_else(String::new, ToString::to_string)
        })
        .collect();
    assert_eq!(namespaces, vec!["tools", "tools", "tools"]);
}

#[test]
fn test_report_file_redacts_secrets() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("report.json");
    let app = ResourceRef::new(ResourceKind::OAuthApplication, IdentityKey::named("Demo - Server"));
    let secret = ResourceRef::new(ResourceKind::SecretStore, IdentityKey::scoped("mcp", "demo-jwt-signing-key"));
    let report = ReconciliationReport {
        results: vec![
            ReconciliationResult::new(app, ActionTaken::Created).with_attributes(
                [
                    ("client_id".to_string(), json!("srv-1")),
                    ("client_secret".to_string(), json!("srv-secret")),
                ]
                .into(),
            ),
            ReconciliationResult::new(secret, ActionTaken::Created)
                .with_attributes([("jwt-signing-key".to_string(), json!("ab".repeat(32)))].into()),
        ],
        ..ReconciliationReport::default()
    };

    write_report(&path, &report).unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("srv-1"));
    assert!(!raw.contains("srv-secret"));
    assert!(!raw.contains(&"ab".repeat(32)));
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["success"], json!(true));
    assert_eq!(parsed["results"][0]["action"], json!("created"));
    #[cfg(unix)]
    assert_eq!(mode(&path), 0o600);
}

#[test]
fn test_local_files_for_an_existing_application() {
    let dir = TempDir::new().unwrap();
    let config = auth0_config();
    config.save(&dir.path().join("oidc-config.json")).unwrap();

    let local = LocalEnv {
        server_name: "Demo".to_string(),
        namespace: "tools".to_string(),
        port: 4208,
    };
    let env_path = dir.path().join(".env");
    write_private(&env_path, render_env_file(&config, &local).as_bytes()).unwrap();
    let values_path = write_helm_values(&config, dir.path()).unwrap();

    let env = std::fs::read_to_string(&env_path).unwrap();
    assert!(env.starts_with("# Demo MCP server"));
    assert!(env.contains("OIDC_ISSUER=https://tenant.auth0.com\n"));
    assert!(env.contains("AUTH0_DOMAIN=tenant.auth0.com\n"));
    assert!(env.contains("OIDC_CLIENT_ID=srv-1\n"));
    assert!(env.contains("OIDC_CLIENT_SECRET=srv-secret\n"));
    assert!(env.contains("K8S_NAMESPACE=tools\n"));
    assert!(env.contains("PORT=4208\n"));
    #[cfg(unix)]
    assert_eq!(mode(&env_path), 0o600);

    assert!(values_path.ends_with("oidc-values.yaml"));
    assert!(!std::fs::read_to_string(&values_path).unwrap().contains("srv-secret"));
}

#[test]
fn test_gitignore_entries_are_appended_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".gitignore");
    std::fs::write(&path, "target/\n.env").unwrap();

    let mut entries = vec!["oidc-config.json"];
    entries.extend_from_slice(GITIGNORE_ENTRIES);
    let added = append_gitignore(&path, &entries).unwrap();

    assert!(added.contains(&"oidc-config.json".to_string()));
    assert!(!added.contains(&".env".to_string()));
    assert_eq!(added.len(), entries.len() - 1);

    let again = append_gitignore(&path, &entries).unwrap();
    assert!(again.is_empty());

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.starts_with("target/\n.env\n# oidc-deploy"));
    assert_eq!(raw.lines().filter(|l| *l == "oidc-config.json").count(), 1);
    assert_eq!(raw.lines().filter(|l| *l == ".env").count(), 1);
}

#[test]
fn test_gitignore_is_created_when_missing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".gitignore");

    let added = append_gitignore(&path, &["oidc-config.json"]).unwrap();

    assert_eq!(added, vec!["oidc-config.json".to_string()]);
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "# oidc-deploy: files holding credentials\noidc-config.json\n"
    );
}
