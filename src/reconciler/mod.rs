//! # Reconciler
//!
//! Converges a batch of [`ResourceDescriptor`]s against a [`RemoteStore`].
//!
//! ## Run Flow
//!
//! 1. **Pre-flight**: duplicate descriptors, unknown dependencies and dependency
//!    cycles abort the run before any store call ([`ReconcileError`]).
//! 2. **Per descriptor**, in dependency order:
//!    - stop if the run was canceled or aborted
//!    - skip when a dependency failed
//!    - validate the descriptor
//!    - `find`, then create, replace, update or skip
//! 3. **Report**: one result per descriptor, in declaration order.
//!
//! Per-descriptor failures are recorded in the report and never returned as
//! errors. Only a failed lookup aborts the run, unless `continue_on_error` is
//! set. Create and update failures never stop unrelated descriptors.
//!
//! [`ResourceDescriptor`]: crate::descriptor::ResourceDescriptor
//! [`RemoteStore`]: crate::store::RemoteStore

mod engine;
mod options;
mod order;
mod teardown;

pub use engine::reconcile;
pub use options::{CancellationFlag, ReconcileOptions};
pub use order::dependency_order;
pub use teardown::teardown;

use crate::descriptor::ResourceRef;
use crate::store::StoreError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Fatal errors that end a run before any store call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("{0} is declared more than once")]
    DuplicateDescriptor(ResourceRef),
    #[error("{resource} depends on {dependency}, which is not part of this run")]
    UnknownDependency {
        resource: ResourceRef,
        dependency: ResourceRef,
    },
    #[error("dependency cycle between {}", format_members(members))]
    CyclicDependency { members: Vec<ResourceRef> },
}

fn format_members(members: &[ResourceRef]) -> String {
    members
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Run one store call under the caller-supplied timeout
pub(crate) async fn with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_elapsed) => Err(StoreError::Timeout(timeout)),
    }
}
