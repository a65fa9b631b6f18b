//! # oidc-deploy
//!
//! Idempotent setup tooling for OIDC-authenticated MCP servers on Kubernetes.
//!
//! Every command builds a list of [`descriptor::ResourceDescriptor`]s (a *plan*)
//! and hands it to the [`reconciler`], which converges each resource against a
//! [`store::RemoteStore`]:
//!
//! - [`store::Auth0Store`] for applications, APIs, grants, tenant flags and users
//! - [`store::KubernetesStore`] for namespaces, Secrets and RBAC objects
//! - [`store::MemoryStore`] as an in-process double for tests
//!
//! Reruns are safe: existing resources are skipped or patched, generated keys
//! are kept, and dependents of a failed resource are never attempted.

pub mod auth;
pub mod cli;
pub mod config;
pub mod constants;
pub mod descriptor;
pub mod discovery;
pub mod generator;
pub mod observability;
pub mod output;
pub mod plans;
pub mod reconciler;
pub mod report;
pub mod store;

pub use descriptor::{AttributeValue, IdentityKey, ResourceDescriptor, ResourceKind, ResourceRef};
pub use reconciler::{reconcile, teardown, ReconcileError, ReconcileOptions};
pub use report::{ActionTaken, FailureKind, ReconciliationReport, ReconciliationResult};
pub use store::{RemoteState, RemoteStore, StoreError};
