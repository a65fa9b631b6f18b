//! # RBAC Plan
//!
//! ServiceAccount, Role (or ClusterRole) and the binding that grants the role
//! to the service account. The binding depends on both, so teardown removes it
//! first.

use super::standard_labels;
use crate::descriptor::{AttributeValue, IdentityKey, ResourceDescriptor, ResourceKind, ResourceRef};
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Whether permissions apply cluster-wide or inside one namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RbacScope {
    /// ClusterRole + ClusterRoleBinding
    #[default]
    Cluster,
    /// Role + RoleBinding in the target namespace
    Namespace,
}

impl fmt::Display for RbacScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RbacScope::Cluster => f.write_str("cluster"),
            RbacScope::Namespace => f.write_str("namespace"),
        }
    }
}

/// One entry of a rules file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub verbs: Vec<String>,
}

impl PolicyRule {
    fn new(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> Self {
        let owned = |items: &[&str]| -> Vec<String> { items.iter().map(ToString::to_string).collect() };
        Self {
            api_groups: owned(api_groups),
            resources: owned(resources),
            verbs: owned(verbs),
        }
    }

    /// The rule in Kubernetes field naming
    #[must_use]
    pub fn to_kubernetes(&self) -> Value {
        json!({
            "apiGroups": self.api_groups,
            "resources": self.resources,
            "verbs": self.verbs,
        })
    }
}

/// Read-only access to the workload kinds the server inspects
#[must_use]
pub fn default_rules() -> Vec<PolicyRule> {
    let read = ["get", "list", "watch"];
    vec![
        PolicyRule::new(&[""], &["pods", "services", "configmaps", "secrets"], &read),
        PolicyRule::new(&["apps"], &["deployments", "statefulsets", "replicasets"], &read),
        PolicyRule::new(&["batch"], &["jobs", "cronjobs"], &read),
    ]
}

/// Parse a rules file: a YAML (or JSON) list of `{api_groups, resources, verbs}`
pub fn parse_rules(raw: &str) -> Result<Vec<PolicyRule>> {
    let rules: Vec<PolicyRule> = serde_yaml::from_str(raw)
        .context("rules file must be a YAML or JSON list of {api_groups, resources, verbs}")?;
    if rules.is_empty() {
        anyhow::bail!("rules file contains no rules");
    }
    if let Some(index) = rules
        .iter()
        .position(|r| r.resources.is_empty() || r.verbs.is_empty())
    {
        anyhow::bail!("rule {index} needs at least one resource and one verb");
    }
    Ok(rules)
}

/// Identity and permissions of the server inside the cluster
#[derive(Debug, Clone)]
pub struct RbacPlan {
    pub app_name: String,
    pub namespace: String,
    pub service_account: String,
    pub scope: RbacScope,
    pub rules: Vec<PolicyRule>,
}

impl RbacPlan {
    pub fn new(app_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let app_name = app_name.into();
        Self {
            service_account: format!("{app_name}-server"),
            app_name,
            namespace: namespace.into(),
            scope: RbacScope::default(),
            rules: default_rules(),
        }
    }

    #[must_use]
    pub fn service_account(mut self, name: impl Into<String>) -> Self {
        self.service_account = name.into();
        self
    }

    #[must_use]
    pub fn scope(mut self, scope: RbacScope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn rules(mut self, rules: Vec<PolicyRule>) -> Self {
        self.rules = rules;
        self
    }

    #[must_use]
    pub fn role_name(&self) -> String {
        format!("{}-role", self.service_account)
    }

    #[must_use]
    pub fn binding_name(&self) -> String {
        format!("{}-binding", self.service_account)
    }

    /// `Role` or `ClusterRole`
    #[must_use]
    pub fn role_kind(&self) -> &'static str {
        match self.scope {
            RbacScope::Cluster => "ClusterRole",
            RbacScope::Namespace => "Role",
        }
    }

    #[must_use]
    pub fn binding_kind(&self) -> &'static str {
        match self.scope {
            RbacScope::Cluster => "ClusterRoleBinding",
            RbacScope::Namespace => "RoleBinding",
        }
    }

    fn key(&self, name: String) -> IdentityKey {
        match self.scope {
            RbacScope::Cluster => IdentityKey::named(name),
            RbacScope::Namespace => IdentityKey::scoped(&self.namespace, name),
        }
    }

    #[must_use]
    pub fn service_account_ref(&self) -> ResourceRef {
        ResourceRef::new(
            ResourceKind::ServiceAccount,
            IdentityKey::scoped(&self.namespace, &self.service_account),
        )
    }

    #[must_use]
    pub fn role_ref(&self) -> ResourceRef {
        ResourceRef::new(ResourceKind::RoleDefinition, self.key(self.role_name()))
    }

    #[must_use]
    pub fn binding_ref(&self) -> ResourceRef {
        ResourceRef::new(ResourceKind::RoleBinding, self.key(self.binding_name()))
    }

    /// `roleRef` of the binding
    #[must_use]
    pub fn role_ref_value(&self) -> Value {
        json!({
            "apiGroup": RBAC_API_GROUP,
            "kind": self.role_kind(),
            "name": self.role_name(),
        })
    }

    /// `subjects` of the binding
    #[must_use]
    pub fn subjects_value(&self) -> Value {
        json!([{
            "kind": "ServiceAccount",
            "name": self.service_account,
            "namespace": self.namespace,
        }])
    }

    #[must_use]
    pub fn rules_value(&self) -> Value {
        Value::Array(self.rules.iter().map(PolicyRule::to_kubernetes).collect())
    }

    #[must_use]
    pub fn descriptors(&self) -> Vec<ResourceDescriptor> {
        let labels = standard_labels(&self.app_name, "rbac");
        let service_account = self.service_account_ref();
        let role = self.role_ref();

        vec![
            ResourceDescriptor::new(ResourceKind::ServiceAccount, service_account.key.clone())
                .with_labels(&labels),
            ResourceDescriptor::new(ResourceKind::RoleDefinition, role.key.clone())
                .with("rules", AttributeValue::Literal(self.rules_value()))
                .with_labels(&labels),
            ResourceDescriptor::new(ResourceKind::RoleBinding, self.binding_ref().key)
                .with("roleRef", AttributeValue::Literal(self.role_ref_value()))
                .with("subjects", AttributeValue::Literal(self.subjects_value()))
                .with_labels(&labels)
                .depends_on(service_account)
                .depends_on(role),
        ]
    }

    /// kubectl command that checks the service account can act on `resource`
    #[must_use]
    pub fn can_i_command(&self, resource: &str) -> String {
        let command = format!(
            "kubectl auth can-i list {resource} --as=system:serviceaccount:{}:{}",
            self.namespace, self.service_account
        );
        match self.scope {
            RbacScope::Cluster => command,
            RbacScope::Namespace => format!("{command} -n {}", self.namespace),
        }
    }
}
