//! # Resource Descriptors
//!
//! A [`ResourceDescriptor`] declares one desired remote object: its kind, the key
//! used to look it up, the attributes it should carry and the resources that must
//! be reconciled before it.
//!
//! Attribute values are declarative. Besides plain literals they can ask for a
//! freshly generated secret, keep whatever the remote side already holds, require
//! that a list or object merely *contains* some entries, or point at an attribute
//! of another resource resolved earlier in the same run.

use crate::generator::SecretAlgorithm;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Attribute name to JSON value
pub type Attributes = BTreeMap<String, Value>;

/// Kubernetes labels applied when a resource is created
pub type Labels = BTreeMap<String, String>;

/// Marker prefix for generated attributes (`generate:hex256`)
pub const GENERATE_MARKER: &str = "generate:";

/// Marker for attributes that keep the remote value when one exists
pub const PRESERVE_MARKER: &str = "preserve-if-present";

/// Kinds of remote resources the reconciler knows how to converge
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// OAuth application (client) registered with the identity provider
    OAuthApplication,
    /// API audience ("resource server") registered with the identity provider
    ApiResource,
    /// API access granted to an OAuth application
    ClientGrant,
    /// Tenant-wide identity provider flags
    TenantSettings,
    /// A user's list of authorised clients
    UserGrant,
    /// Existing identity provider login connection (e.g. a user database)
    Connection,
    /// Kubernetes Namespace
    Namespace,
    /// Kubernetes ServiceAccount
    ServiceAccount,
    /// Kubernetes Role, or ClusterRole when the key has no namespace
    RoleDefinition,
    /// Kubernetes RoleBinding, or ClusterRoleBinding when the key has no namespace
    RoleBinding,
    /// Kubernetes Secret
    SecretStore,
}

/// The backing system that owns a resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    IdentityProvider,
    Cluster,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 11] = [
        ResourceKind::OAuthApplication,
        ResourceKind::ApiResource,
        ResourceKind::ClientGrant,
        ResourceKind::TenantSettings,
        ResourceKind::UserGrant,
        ResourceKind::Connection,
        ResourceKind::Namespace,
        ResourceKind::ServiceAccount,
        ResourceKind::RoleDefinition,
        ResourceKind::RoleBinding,
        ResourceKind::SecretStore,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::OAuthApplication => "oauth-application",
            ResourceKind::ApiResource => "api-resource",
            ResourceKind::ClientGrant => "client-grant",
            ResourceKind::TenantSettings => "tenant-settings",
            ResourceKind::UserGrant => "user-grant",
            ResourceKind::Connection => "connection",
            ResourceKind::Namespace => "namespace",
            ResourceKind::ServiceAccount => "service-account",
            ResourceKind::RoleDefinition => "role-definition",
            ResourceKind::RoleBinding => "role-binding",
            ResourceKind::SecretStore => "secret-store",
        }
    }

    #[must_use]
    pub fn backend(self) -> Backend {
        match self {
            ResourceKind::OAuthApplication
            | ResourceKind::ApiResource
            | ResourceKind::ClientGrant
            | ResourceKind::TenantSettings
            | ResourceKind::UserGrant
            | ResourceKind::Connection => Backend::IdentityProvider,
            ResourceKind::Namespace
            | ResourceKind::ServiceAccount
            | ResourceKind::RoleDefinition
            | ResourceKind::RoleBinding
            | ResourceKind::SecretStore => Backend::Cluster,
        }
    }

    /// Kinds whose identity key must carry a scope (namespace or audience)
    #[must_use]
    pub fn requires_scope(self) -> bool {
        matches!(
            self,
            ResourceKind::ServiceAccount | ResourceKind::SecretStore | ResourceKind::ClientGrant
        )
    }

    /// Attributes that must be present on every descriptor of this kind
    #[must_use]
    pub fn required_attributes(self) -> &'static [&'static str] {
        match self {
            ResourceKind::OAuthApplication => &["app_type"],
            ResourceKind::ApiResource => &["name"],
            ResourceKind::ClientGrant => &["scope"],
            ResourceKind::UserGrant => &["app_metadata"],
            ResourceKind::RoleDefinition => &["rules"],
            ResourceKind::RoleBinding => &["roleRef", "subjects"],
            ResourceKind::TenantSettings
            | ResourceKind::Connection
            | ResourceKind::Namespace
            | ResourceKind::ServiceAccount
            | ResourceKind::SecretStore => &[],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownKind(s.to_string()))
    }
}

/// Key used to look a resource up in its remote store
///
/// `scope` is the namespace for namespaced Kubernetes kinds and the API audience
/// for client grants. Cluster-scoped objects and provider objects leave it empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl IdentityKey {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: None,
        }
    }

    pub fn scoped(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: Some(scope.into()),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.scope.as_deref()
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{scope}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A resource kind together with its identity key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub key: IdentityKey,
}

impl ResourceRef {
    #[must_use]
    pub fn new(kind: ResourceKind, key: IdentityKey) -> Self {
        Self { kind, key }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// Pointer to an attribute of another resource in the same run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRef {
    pub resource: ResourceRef,
    pub attribute: String,
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.resource, self.attribute)
    }
}

/// Desired value of a single attribute
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Must equal the remote value
    Literal(Value),
    /// Generated when the remote side has no value yet, or on replace
    Generate(SecretAlgorithm),
    /// Keep the remote value when present; otherwise resolve the inner value
    /// (or leave the attribute out when there is none)
    PreserveIfPresent(Option<Box<AttributeValue>>),
    /// Remote value must contain this one; updates send the merged value
    Include(Value),
    /// Copy an attribute of a dependency resolved earlier in the run
    Reference(AttributeRef),
    /// Remote list must contain the referenced attribute of a dependency
    IncludeReference(AttributeRef),
}

impl AttributeValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        AttributeValue::Literal(value.into())
    }

    pub fn include(value: impl Into<Value>) -> Self {
        AttributeValue::Include(value.into())
    }

    #[must_use]
    pub fn generate(algorithm: SecretAlgorithm) -> Self {
        AttributeValue::Generate(algorithm)
    }

    #[must_use]
    pub fn preserve() -> Self {
        AttributeValue::PreserveIfPresent(None)
    }

    #[must_use]
    pub fn preserve_or(fallback: AttributeValue) -> Self {
        AttributeValue::PreserveIfPresent(Some(Box::new(fallback)))
    }

    pub fn reference(resource: ResourceRef, attribute: impl Into<String>) -> Self {
        AttributeValue::Reference(AttributeRef {
            resource,
            attribute: attribute.into(),
        })
    }

    pub fn include_reference(resource: ResourceRef, attribute: impl Into<String>) -> Self {
        AttributeValue::IncludeReference(AttributeRef {
            resource,
            attribute: attribute.into(),
        })
    }

    /// Parse the textual form used in configuration input.
    ///
    /// `generate:<algorithm>` and `preserve-if-present[:<inner>]` are markers;
    /// anything else is a string literal.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if let Some(algorithm) = raw.strip_prefix(GENERATE_MARKER) {
            let algorithm = algorithm
                .parse::<SecretAlgorithm>()
                .map_err(|e| ValidationError::InvalidMarker {
                    marker: raw.to_string(),
                    reason: e.to_string(),
                })?;
            return Ok(AttributeValue::Generate(algorithm));
        }
        if let Some(rest) = raw.strip_prefix(PRESERVE_MARKER) {
            if rest.is_empty() {
                return Ok(AttributeValue::preserve());
            }
            if let Some(inner) = rest.strip_prefix(':') {
                return Ok(AttributeValue::preserve_or(AttributeValue::parse(inner)?));
            }
        }
        Ok(AttributeValue::Literal(Value::String(raw.to_string())))
    }

    /// References contained in this value, including inside a preserve fallback
    #[must_use]
    pub fn reference_target(&self) -> Option<&AttributeRef> {
        match self {
            AttributeValue::Reference(target) | AttributeValue::IncludeReference(target) => {
                Some(target)
            }
            AttributeValue::PreserveIfPresent(Some(inner)) => inner.reference_target(),
            _ => None,
        }
    }
}

/// Declarative specification of one desired remote resource
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub key: IdentityKey,
    pub desired: BTreeMap<String, AttributeValue>,
    pub dependencies: Vec<ResourceRef>,
    pub labels: Labels,
}

impl ResourceDescriptor {
    #[must_use]
    pub fn new(kind: ResourceKind, key: IdentityKey) -> Self {
        Self {
            kind,
            key,
            desired: BTreeMap::new(),
            dependencies: Vec::new(),
            labels: Labels::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, attribute: impl Into<String>, value: AttributeValue) -> Self {
        self.desired.insert(attribute.into(), value);
        self
    }

    #[must_use]
    pub fn depends_on(mut self, resource: ResourceRef) -> Self {
        if !self.dependencies.contains(&resource) {
            self.dependencies.push(resource);
        }
        self
    }

    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_labels(mut self, labels: &Labels) -> Self {
        self.labels
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    #[must_use]
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(self.kind, self.key.clone())
    }

    /// Checks on the identity key alone, enough to address the remote object
    pub fn validate_identity(&self) -> Result<(), ValidationError> {
        let resource = self.resource_ref();
        if self.key.name.trim().is_empty() {
            return Err(ValidationError::EmptyName { resource });
        }
        if self.kind.requires_scope()
            && self.key.scope.as_deref().is_none_or(|s| s.trim().is_empty())
        {
            return Err(ValidationError::MissingScope { resource });
        }
        Ok(())
    }

    /// Structural checks that need no remote call
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_identity()?;
        let resource = self.resource_ref();

        if let Some(missing) = self
            .kind
            .required_attributes()
            .iter()
            .find(|attr| !self.desired.contains_key(**attr))
        {
            return Err(ValidationError::MissingAttribute {
                resource,
                attribute: (*missing).to_string(),
            });
        }
        if matches!(
            self.kind,
            ResourceKind::SecretStore | ResourceKind::TenantSettings | ResourceKind::Connection
        ) && self.desired.is_empty()
        {
            return Err(ValidationError::MissingAttribute {
                resource,
                attribute: "<any>".to_string(),
            });
        }

        for (name, value) in &self.desired {
            if let Some(target) = value.reference_target() {
                if !self.dependencies.contains(&target.resource) {
                    return Err(ValidationError::UndeclaredReference {
                        resource,
                        target: target.to_string(),
                    });
                }
            }
            if self.kind == ResourceKind::SecretStore {
                let non_string = match value {
                    AttributeValue::Literal(v) | AttributeValue::Include(v) => !v.is_string(),
                    AttributeValue::IncludeReference(_) => true,
                    _ => false,
                };
                if non_string {
                    return Err(ValidationError::InvalidAttribute {
                        resource,
                        attribute: name.clone(),
                        reason: "secret data values must be strings".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Structural problems found in a descriptor before any remote call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{resource}: identity key has an empty name")]
    EmptyName { resource: ResourceRef },
    #[error("{resource}: identity key requires a namespace or audience")]
    MissingScope { resource: ResourceRef },
    #[error("{resource}: missing required attribute '{attribute}'")]
    MissingAttribute {
        resource: ResourceRef,
        attribute: String,
    },
    #[error("{resource}: attribute '{attribute}' is invalid: {reason}")]
    InvalidAttribute {
        resource: ResourceRef,
        attribute: String,
        reason: String,
    },
    #[error("{resource}: references {target} which is not a declared dependency")]
    UndeclaredReference {
        resource: ResourceRef,
        target: String,
    },
    #[error("{resource}: cannot resolve {target}")]
    UnresolvedReference {
        resource: ResourceRef,
        target: String,
    },
    #[error("invalid attribute marker '{marker}': {reason}")]
    InvalidMarker { marker: String, reason: String },
    #[error("unknown resource kind '{0}'")]
    UnknownKind(String),
}

/// Whether `current` already contains everything in `desired`.
///
/// Arrays must hold every desired element, objects every desired key (checked
/// recursively); anything else must be equal.
#[must_use]
pub fn includes(current: &Value, desired: &Value) -> bool {
    match (current, desired) {
        (Value::Array(have), Value::Array(want)) => want.iter().all(|w| have.contains(w)),
        (Value::Object(have), Value::Object(want)) => want
            .iter()
            .all(|(k, w)| have.get(k).is_some_and(|h| includes(h, w))),
        _ => current == desired,
    }
}

/// Merge `desired` into `current` so that the result satisfies [`includes`].
///
/// Existing array entries keep their order and missing ones are appended.
#[must_use]
pub fn merge_include(current: &Value, desired: &Value) -> Value {
    match (current, desired) {
        (Value::Array(have), Value::Array(want)) => {
            let mut merged = have.clone();
            for w in want {
                if !merged.contains(w) {
                    merged.push(w.clone());
                }
            }
            Value::Array(merged)
        }
        (Value::Object(have), Value::Object(want)) => {
            let mut merged = have.clone();
            for (k, w) in want {
                let value = match have.get(k) {
                    Some(h) => merge_include(h, w),
                    None => w.clone(),
                };
                merged.insert(k.clone(), value);
            }
            Value::Object(merged)
        }
        _ => desired.clone(),
    }
}
