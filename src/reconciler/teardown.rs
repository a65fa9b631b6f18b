//! Reverse-order deletion.
//!
//! Deletes in reverse dependency order (bindings before roles before service
//! accounts). A failed delete never stops the run: a resource is kept only when
//! something that depends on it could not be deleted, and unrelated resources
//! are still removed. `continue_on_error` has no effect here.

use super::{dependency_order, with_timeout, ReconcileError, ReconcileOptions};
use crate::descriptor::{Attributes, ResourceDescriptor, ResourceRef};
use crate::report::{
    ActionTaken, FailureDetail, FailureKind, ReconciliationReport, ReconciliationResult,
};
use crate::store::RemoteStore;
use std::collections::HashMap;
use tracing::{info, info_span, warn, Instrument};

/// Delete every resource named by `descriptors`
pub async fn teardown(
    descriptors: &[ResourceDescriptor],
    store: &dyn RemoteStore,
    options: &ReconcileOptions,
) -> Result<ReconciliationReport, ReconcileError> {
    let order = dependency_order(descriptors)?;
    info!(
        descriptors = descriptors.len(),
        store = store.name(),
        dry_run = options.dry_run,
        "Starting teardown"
    );

    // dependents[r] lists the descriptors that depend on r
    let mut dependents: HashMap<ResourceRef, Vec<ResourceRef>> = HashMap::new();
    for desc in descriptors {
        for dep in &desc.dependencies {
            dependents
                .entry(dep.clone())
                .or_default()
                .push(desc.resource_ref());
        }
    }

    let mut outcomes: HashMap<ResourceRef, ActionTaken> = HashMap::new();
    let mut slots: Vec<Option<ReconciliationResult>> = vec![None; descriptors.len()];
    let mut canceled = false;

    for index in order.into_iter().rev() {
        let desc = &descriptors[index];
        let resource = desc.resource_ref();

        if !canceled && options.cancel.is_canceled() {
            warn!("Teardown canceled before {}", resource);
            canceled = true;
        }

        let result = if canceled {
            ReconciliationResult::new(resource, ActionTaken::None)
        } else if let Some(blocker) = dependents.get(&resource).and_then(|deps| {
            deps.iter().find(|d| {
                outcomes
                    .get(*d)
                    .is_none_or(|a| a.is_failure() || *a == ActionTaken::None)
            })
        }) {
            ReconciliationResult {
                action: ActionTaken::SkippedDependencyFailed,
                error: Some(FailureDetail::new(
                    FailureKind::DependencyFailed,
                    format!("{blocker} still depends on {resource}"),
                )),
                resource,
                resolved_attributes: Attributes::new(),
            }
        } else if let Err(e) = desc.validate_identity() {
            ReconciliationResult::failed(
                resource,
                FailureDetail::new(FailureKind::Validation, e.to_string()),
            )
        } else {
            let span = info_span!("teardown", resource = %resource);
            let result = delete_one(&resource, store, options).instrument(span).await;
            if result.action == ActionTaken::Failed {
                warn!("Delete of {} failed; continuing with independent resources", resource);
            }
            result
        };

        outcomes.insert(result.resource.clone(), result.action);
        slots[index] = Some(result);
    }

    let results: Vec<ReconciliationResult> = slots.into_iter().flatten().collect();
    let pending = results
        .iter()
        .filter(|r| r.action == ActionTaken::None)
        .map(|r| r.resource.clone())
        .collect();
    Ok(ReconciliationReport {
        results,
        canceled,
        pending,
    })
}

async fn delete_one(
    resource: &ResourceRef,
    store: &dyn RemoteStore,
    options: &ReconcileOptions,
) -> ReconciliationResult {
    if options.dry_run {
        return match with_timeout(options.call_timeout, store.find(resource)).await {
            Ok(state) if state.exists => {
                ReconciliationResult::new(resource.clone(), ActionTaken::WouldDelete)
            }
            Ok(_) => ReconciliationResult::new(resource.clone(), ActionTaken::AlreadyAbsent),
            Err(e) => ReconciliationResult::failed(
                resource.clone(),
                FailureDetail::new(FailureKind::Remote, format!("lookup failed: {e}")),
            ),
        };
    }

    match with_timeout(options.call_timeout, store.delete(resource)).await {
        Ok(true) => {
            info!("Deleted {}", resource);
            ReconciliationResult::new(resource.clone(), ActionTaken::Deleted)
        }
        Ok(false) => {
            info!("{} was already absent", resource);
            ReconciliationResult::new(resource.clone(), ActionTaken::AlreadyAbsent)
        }
        Err(e) => {
            let kind = if e.is_ambiguous() {
                FailureKind::AmbiguousPartialFailure
            } else {
                FailureKind::Remote
            };
            ReconciliationResult::failed(
                resource.clone(),
                FailureDetail::new(kind, format!("delete failed: {e}")),
            )
        }
    }
}
