//! # Remote Stores
//!
//! Adapters over the systems that hold the actual state of a resource kind.
//!
//! Every adapter implements [`RemoteStore`]:
//! - `find` reports a missing object as `RemoteState { exists: false }`, never as
//!   an error. Errors are reserved for transport, auth and permission failures.
//! - `create` and `update` return the state the backing system reports after the
//!   call, which the reconciler folds into its resolved attributes.
//! - `delete` returns `false` when the object was already gone.
//!
//! Adapters receive pre-authenticated transport handles. Token acquisition lives
//! in [`crate::auth`].

use crate::descriptor::{Attributes, Backend, Labels, ResourceKind, ResourceRef};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod auth0;
pub mod kubernetes;
pub mod memory;

pub use auth0::Auth0Store;
pub use kubernetes::KubernetesStore;
pub use memory::MemoryStore;

/// Remote state of a single resource as seen by `find`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteState {
    pub exists: bool,
    pub current_attributes: Attributes,
}

impl RemoteState {
    #[must_use]
    pub fn absent() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn present(current_attributes: Attributes) -> Self {
        Self {
            exists: true,
            current_attributes,
        }
    }
}

/// Operations a store exposes, used for error reporting and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreOperation {
    Find,
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StoreOperation::Find => "find",
            StoreOperation::Create => "create",
            StoreOperation::Update => "update",
            StoreOperation::Delete => "delete",
        })
    }
}

/// Failure talking to a backing system
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{store} store does not manage {kind} resources")]
    UnsupportedKind {
        kind: ResourceKind,
        store: &'static str,
    },
    #[error("{store} store cannot {operation} {kind} resources")]
    UnsupportedOperation {
        kind: ResourceKind,
        operation: StoreOperation,
        store: &'static str,
    },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not connect: {0}")]
    Connect(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
    #[error("unexpected payload: {0}")]
    Payload(String),
}

impl StoreError {
    /// Whether the remote side may have applied the change despite the error.
    ///
    /// A refused connection never reached the server, so it is not ambiguous.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        match self {
            StoreError::Timeout(_) | StoreError::Transport(_) => true,
            StoreError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Map an HTTP status and body to the matching variant
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => StoreError::Unauthorized(message),
            403 => StoreError::Forbidden(message),
            409 => StoreError::Conflict(message),
            _ => StoreError::Api { status, message },
        }
    }
}

/// Capability set every backing system exposes to the reconciler
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short adapter name used in logs and errors
    fn name(&self) -> &'static str;

    /// Look a resource up by kind and identity key
    async fn find(&self, resource: &ResourceRef) -> Result<RemoteState, StoreError>;

    /// Create a resource with the given attributes and labels
    async fn create(
        &self,
        resource: &ResourceRef,
        attributes: &Attributes,
        labels: &Labels,
    ) -> Result<RemoteState, StoreError>;

    /// Apply a partial update; attributes not listed are left untouched
    async fn update(
        &self,
        resource: &ResourceRef,
        attributes: &Attributes,
    ) -> Result<RemoteState, StoreError>;

    /// Delete a resource. Returns `false` when it did not exist.
    async fn delete(&self, resource: &ResourceRef) -> Result<bool, StoreError>;
}

/// Sends identity-provider kinds to one store and cluster kinds to another
#[derive(Clone, Default)]
pub struct RoutingStore {
    identity_provider: Option<Arc<dyn RemoteStore>>,
    cluster: Option<Arc<dyn RemoteStore>>,
}

impl std::fmt::Debug for RoutingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingStore")
            .field(
                "identity_provider",
                &self.identity_provider.as_ref().map(|s| s.name()),
            )
            .field("cluster", &self.cluster.as_ref().map(|s| s.name()))
            .finish()
    }
}

impl RoutingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_identity_provider(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.identity_provider = Some(store);
        self
    }

    #[must_use]
    pub fn with_cluster(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.cluster = Some(store);
        self
    }

    fn route(&self, kind: ResourceKind) -> Result<&dyn RemoteStore, StoreError> {
        let target = match kind.backend() {
            Backend::IdentityProvider => self.identity_provider.as_deref(),
            Backend::Cluster => self.cluster.as_deref(),
        };
        target.ok_or(StoreError::UnsupportedKind {
            kind,
            store: "routing",
        })
    }
}

#[async_trait]
impl RemoteStore for RoutingStore {
    fn name(&self) -> &'static str {
        "routing"
    }

    async fn find(&self, resource: &ResourceRef) -> Result<RemoteState, StoreError> {
        self.route(resource.kind)?.find(resource).await
    }

    async fn create(
        &self,
        resource: &ResourceRef,
        attributes: &Attributes,
        labels: &Labels,
    ) -> Result<RemoteState, StoreError> {
        self.route(resource.kind)?
            .create(resource, attributes, labels)
            .await
    }

    async fn update(
        &self,
        resource: &ResourceRef,
        attributes: &Attributes,
    ) -> Result<RemoteState, StoreError> {
        self.route(resource.kind)?.update(resource, attributes).await
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<bool, StoreError> {
        self.route(resource.kind)?.delete(resource).await
    }
}
