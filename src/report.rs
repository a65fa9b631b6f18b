//! # Outcome Reporter
//!
//! Aggregates per-resource results of a reconciliation or teardown run.
//!
//! The report is the only channel through which resolved attribute values,
//! including freshly generated secrets, leave the reconciler. Callers persist
//! them from [`ReconciliationReport::resolved`]. The serialisable
//! [`ReportSummary`] redacts secret material so it can be printed or written
//! to disk.

use crate::descriptor::{Attributes, ResourceKind, ResourceRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

const HIDDEN: &str = "***hidden***";
const EMPTY: &str = "***empty***";

/// Attribute name fragments whose values are always redacted
const SENSITIVE_FRAGMENTS: &[&str] = &["secret", "key", "token", "password"];

/// What the reconciler did for one descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionTaken {
    /// Not attempted (run aborted or canceled first)
    None,
    Created,
    Updated,
    SkippedExisting,
    Failed,
    SkippedDependencyFailed,
    WouldCreate,
    WouldUpdate,
    WouldSkip,
    Deleted,
    AlreadyAbsent,
    WouldDelete,
}

impl ActionTaken {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionTaken::None => "none",
            ActionTaken::Created => "created",
            ActionTaken::Updated => "updated",
            ActionTaken::SkippedExisting => "skipped-existing",
            ActionTaken::Failed => "failed",
            ActionTaken::SkippedDependencyFailed => "skipped-dependency-failed",
            ActionTaken::WouldCreate => "would-create",
            ActionTaken::WouldUpdate => "would-update",
            ActionTaken::WouldSkip => "would-skip",
            ActionTaken::Deleted => "deleted",
            ActionTaken::AlreadyAbsent => "already-absent",
            ActionTaken::WouldDelete => "would-delete",
        }
    }

    /// Failed, or not attempted because a dependency failed
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ActionTaken::Failed | ActionTaken::SkippedDependencyFailed
        )
    }
}

impl fmt::Display for ActionTaken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a per-descriptor failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Transport, auth or permission failure talking to the backing system
    Remote,
    /// A create or update failed and its side effects could not be ruled out
    AmbiguousPartialFailure,
    /// The descriptor failed a structural check before any remote call
    Validation,
    /// A dependency failed, so this descriptor was not attempted
    DependencyFailed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Remote => "remote error",
            FailureKind::AmbiguousPartialFailure => "ambiguous partial failure",
            FailureKind::Validation => "validation error",
            FailureKind::DependencyFailed => "dependency failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureDetail {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome for one descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationResult {
    pub resource: ResourceRef,
    pub action: ActionTaken,
    pub error: Option<FailureDetail>,
    /// Final attribute values, including generated secrets
    pub resolved_attributes: Attributes,
}

impl ReconciliationResult {
    #[must_use]
    pub fn new(resource: ResourceRef, action: ActionTaken) -> Self {
        Self {
            resource,
            action,
            error: None,
            resolved_attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn failed(resource: ResourceRef, detail: FailureDetail) -> Self {
        Self {
            resource,
            action: ActionTaken::Failed,
            error: Some(detail),
            resolved_attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.resolved_attributes = attributes;
        self
    }
}

/// Results of one run, in descriptor declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationReport {
    pub results: Vec<ReconciliationResult>,
    /// The run was canceled before every descriptor was processed
    pub canceled: bool,
    /// Descriptors that were never attempted
    pub pending: Vec<ResourceRef>,
}

impl ReconciliationReport {
    /// Number of results per action
    #[must_use]
    pub fn counts(&self) -> BTreeMap<ActionTaken, usize> {
        let mut counts = BTreeMap::new();
        for result in &self.results {
            *counts.entry(result.action).or_insert(0) += 1;
        }
        counts
    }

    #[must_use]
    pub fn count(&self, action: ActionTaken) -> usize {
        self.results.iter().filter(|r| r.action == action).count()
    }

    /// Results that failed or were skipped because a dependency failed
    #[must_use]
    pub fn failures(&self) -> Vec<&ReconciliationResult> {
        self.results
            .iter()
            .filter(|r| r.action.is_failure())
            .collect()
    }

    /// No descriptor failed and the run was not canceled
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.canceled && self.results.iter().all(|r| r.action != ActionTaken::Failed)
    }

    #[must_use]
    pub fn result(&self, resource: &ResourceRef) -> Option<&ReconciliationResult> {
        self.results.iter().find(|r| &r.resource == resource)
    }

    /// Resolved attributes of one resource
    #[must_use]
    pub fn resolved(&self, resource: &ResourceRef) -> Option<&Attributes> {
        self.result(resource).map(|r| &r.resolved_attributes)
    }

    /// Single resolved attribute as a string
    #[must_use]
    pub fn resolved_str(&self, resource: &ResourceRef, attribute: &str) -> Option<&str> {
        self.resolved(resource)
            .and_then(|attrs| attrs.get(attribute))
            .and_then(Value::as_str)
    }

    /// Combine the results of two runs (e.g. identity provider then cluster)
    pub fn merge(&mut self, other: ReconciliationReport) {
        self.results.extend(other.results);
        self.pending.extend(other.pending);
        self.canceled |= other.canceled;
    }

    /// Serialisable view with secret material redacted
    #[must_use]
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            generated_at: Utc::now(),
            success: self.is_success(),
            canceled: self.canceled,
            counts: self
                .counts()
                .into_iter()
                .map(|(action, n)| (action.as_str().to_string(), n))
                .collect(),
            results: self
                .results
                .iter()
                .map(|r| ResultSummary {
                    kind: r.resource.kind,
                    key: r.resource.key.to_string(),
                    action: r.action,
                    error: r.error.clone(),
                    attributes: redact(r.resource.kind, &r.resolved_attributes),
                })
                .collect(),
            pending: self.pending.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Redacted, serialisable form of a report
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub generated_at: DateTime<Utc>,
    pub success: bool,
    pub canceled: bool,
    pub counts: BTreeMap<String, usize>,
    pub results: Vec<ResultSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultSummary {
    pub kind: ResourceKind,
    pub key: String,
    pub action: ActionTaken,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureDetail>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

/// Whether an attribute of `kind` holds secret material
#[must_use]
pub fn is_sensitive(kind: ResourceKind, attribute: &str) -> bool {
    if kind == ResourceKind::SecretStore {
        return true;
    }
    let lower = attribute.to_lowercase();
    SENSITIVE_FRAGMENTS.iter().any(|f| lower.contains(f))
}

/// Mask sensitive values, keeping only whether they are empty
#[must_use]
pub fn redact(kind: ResourceKind, attributes: &Attributes) -> BTreeMap<String, Value> {
    attributes
        .iter()
        .map(|(name, value)| {
            let shown = if is_sensitive(kind, name) {
                let empty = match value {
                    Value::Null => true,
                    Value::String(s) => s.is_empty(),
                    _ => false,
                };
                Value::String(if empty { EMPTY } else { HIDDEN }.to_string())
            } else {
                value.clone()
            };
            (name.clone(), shown)
        })
        .collect()
}
