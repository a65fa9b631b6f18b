//! Reconcile loop and per-descriptor convergence.

use super::{dependency_order, with_timeout, ReconcileError, ReconcileOptions};
use crate::descriptor::{
    includes, merge_include, AttributeRef, AttributeValue, Attributes, ResourceDescriptor,
    ResourceRef, ValidationError,
};
use crate::generator::{self, SecretAlgorithm};
use crate::report::{
    ActionTaken, FailureDetail, FailureKind, ReconciliationReport, ReconciliationResult,
};
use crate::store::{RemoteState, RemoteStore, StoreError};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Converge `descriptors` against `store`.
///
/// Returns one result per descriptor, in declaration order. Only malformed
/// descriptor graphs are returned as errors; every other failure is recorded in
/// the report.
pub async fn reconcile(
    descriptors: &[ResourceDescriptor],
    store: &dyn RemoteStore,
    options: &ReconcileOptions,
) -> Result<ReconciliationReport, ReconcileError> {
    let order = dependency_order(descriptors)?;
    info!(
        descriptors = descriptors.len(),
        store = store.name(),
        dry_run = options.dry_run,
        "Starting reconciliation"
    );

    let mut run = Run {
        store,
        options,
        resolved: HashMap::new(),
        outcomes: HashMap::new(),
    };
    let mut slots: Vec<Option<ReconciliationResult>> = vec![None; descriptors.len()];
    let mut aborted = false;
    let mut canceled = false;

    for index in order {
        let desc = &descriptors[index];
        let resource = desc.resource_ref();

        if !aborted && !canceled && options.cancel.is_canceled() {
            warn!("Reconciliation canceled before {}", resource);
            canceled = true;
        }

        let result = if aborted || canceled {
            ReconciliationResult::new(resource, ActionTaken::None)
        } else {
            let span = info_span!("reconcile", resource = %resource);
            let step = run.step(desc).instrument(span).await;
            if step.abort && !options.continue_on_error {
                error!("Aborting run after failed lookup of {}", step.result.resource);
                aborted = true;
            }
            step.result
        };

        log_result(&result);
        run.outcomes
            .insert(result.resource.clone(), result.action);
        if !result.action.is_failure() {
            run.resolved.insert(
                result.resource.clone(),
                result.resolved_attributes.clone(),
            );
        }
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

fn log_result(result: &ReconciliationResult) {
    match (&result.action, &result.error) {
        (ActionTaken::Failed, Some(detail)) => {
            error!(resource = %result.resource, error = %detail, "Reconciliation failed");
        }
        (ActionTaken::SkippedDependencyFailed, _) => {
            warn!(resource = %result.resource, "Skipped because a dependency failed");
        }
        (ActionTaken::None, _) => {
            debug!(resource = %result.resource, "Not attempted");
        }
        (action, _) => {
            info!(resource = %result.resource, action = %action, "Reconciled");
        }
    }
}

struct Step {
    result: ReconciliationResult,
    /// The lookup failed; the run stops unless errors are tolerated
    abort: bool,
}

impl Step {
    fn done(result: ReconciliationResult) -> Self {
        Self {
            result,
            abort: false,
        }
    }
}

/// State shared by the steps of one run
struct Run<'a> {
    store: &'a dyn RemoteStore,
    options: &'a ReconcileOptions,
    /// Resolved attributes of descriptors reconciled so far, for references
    resolved: HashMap<ResourceRef, Attributes>,
    outcomes: HashMap<ResourceRef, ActionTaken>,
}

impl Run<'_> {
    async fn step(&self, desc: &ResourceDescriptor) -> Step {
        let resource = desc.resource_ref();

        let blocked_by = desc.dependencies.iter().find(|dep| {
            self.outcomes
                .get(*dep)
                .is_none_or(|action| action.is_failure() || *action == ActionTaken::None)
        });
        if let Some(dep) = blocked_by {
            return Step::done(ReconciliationResult {
                resource,
                action: ActionTaken::SkippedDependencyFailed,
                error: Some(FailureDetail::new(
                    FailureKind::DependencyFailed,
                    format!("dependency {dep} did not complete"),
                )),
                resolved_attributes: Attributes::new(),
            });
        }

        if let Err(e) = desc.validate() {
            return Step::done(ReconciliationResult::failed(
                resource,
                FailureDetail::new(FailureKind::Validation, e.to_string()),
            ));
        }

        let state = match self.find(&resource).await {
            Ok(state) => state,
            Err(e) => {
                return Step {
                    result: ReconciliationResult::failed(
                        resource,
                        FailureDetail::new(FailureKind::Remote, format!("lookup failed: {e}")),
                    ),
                    abort: true,
                }
            }
        };

        let result = if !state.exists {
            self.create(desc, &resource, None).await
        } else if self.options.replaces(desc.kind) {
            self.replace(desc, &resource, &state).await
        } else {
            self.converge(desc, &resource, &state).await
        };
        Step::done(result)
    }

    async fn find(&self, resource: &ResourceRef) -> Result<RemoteState, StoreError> {
        with_timeout(self.options.call_timeout, self.store.find(resource)).await
    }

    /// Create `resource`, carrying preserved values over from `previous`
    async fn create(
        &self,
        desc: &ResourceDescriptor,
        resource: &ResourceRef,
        previous: Option<&Attributes>,
    ) -> ReconciliationResult {
        let attributes = match self.resolve_all(desc, previous) {
            Ok(attributes) => attributes,
            Err(detail) => return ReconciliationResult::failed(resource.clone(), detail),
        };
        if self.options.dry_run {
            return ReconciliationResult::new(resource.clone(), ActionTaken::WouldCreate)
                .with_attributes(attributes);
        }

        let created = with_timeout(
            self.options.call_timeout,
            self.store.create(resource, &attributes, &desc.labels),
        )
        .await;
        match created {
            Ok(state) => ReconciliationResult::new(resource.clone(), ActionTaken::Created)
                .with_attributes(overlay(attributes, state.current_attributes)),
            Err(StoreError::Conflict(message)) => {
                warn!("{} already exists ({}), treating it as existing", resource, message);
                match self.find(resource).await {
                    Ok(state) if state.exists => self.converge(desc, resource, &state).await,
                    Ok(_) => ReconciliationResult::failed(
                        resource.clone(),
                        FailureDetail::new(
                            FailureKind::Remote,
                            format!("create reported a conflict but the resource is not visible: {message}"),
                        ),
                    ),
                    Err(e) => ReconciliationResult::failed(
                        resource.clone(),
                        FailureDetail::new(
                            FailureKind::Remote,
                            format!("create reported a conflict and the follow-up lookup failed: {e}"),
                        ),
                    ),
                }
            }
            Err(e) if e.is_ambiguous() => {
                warn!("Create of {} failed ambiguously ({}), checking remote state", resource, e);
                match self.find(resource).await {
                    Ok(state) if state.exists => {
                        ReconciliationResult::new(resource.clone(), ActionTaken::Created)
                            .with_attributes(overlay(attributes, state.current_attributes))
                    }
                    Ok(_) => ReconciliationResult::failed(
                        resource.clone(),
                        FailureDetail::new(FailureKind::Remote, format!("create failed: {e}")),
                    ),
                    Err(find_error) => ReconciliationResult::failed(
                        resource.clone(),
                        ambiguous("create", resource, &e, &find_error),
                    ),
                }
            }
            Err(e) => ReconciliationResult::failed(
                resource.clone(),
                FailureDetail::new(FailureKind::Remote, format!("create failed: {e}")),
            ),
        }
    }

    /// Delete and recreate an existing resource
    async fn replace(
        &self,
        desc: &ResourceDescriptor,
        resource: &ResourceRef,
        state: &RemoteState,
    ) -> ReconciliationResult {
        if !self.options.dry_run {
            info!("Replacing {}", resource);
            let deleted = with_timeout(self.options.call_timeout, self.store.delete(resource)).await;
            if let Err(e) = deleted {
                return ReconciliationResult::failed(
                    resource.clone(),
                    FailureDetail::new(
                        FailureKind::Remote,
                        format!("delete before recreate failed: {e}"),
                    ),
                );
            }
        }
        self.create(desc, resource, Some(&state.current_attributes))
            .await
    }

    /// Patch drifted attributes of an existing resource
    async fn converge(
        &self,
        desc: &ResourceDescriptor,
        resource: &ResourceRef,
        state: &RemoteState,
    ) -> ReconciliationResult {
        let current = &state.current_attributes;
        let mut patch = Attributes::new();
        for (name, value) in &desc.desired {
            match self.patch_value(desc, value, current.get(name)) {
                Ok(Some(v)) => {
                    patch.insert(name.clone(), v);
                }
                Ok(None) => {}
                Err(detail) => return ReconciliationResult::failed(resource.clone(), detail),
            }
        }

        if patch.is_empty() {
            let action = if self.options.dry_run {
                ActionTaken::WouldSkip
            } else {
                ActionTaken::SkippedExisting
            };
            return ReconciliationResult::new(resource.clone(), action)
                .with_attributes(current.clone());
        }

        debug!(
            "Drift on {}: {}",
            resource,
            patch.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        if self.options.dry_run {
            return ReconciliationResult::new(resource.clone(), ActionTaken::WouldUpdate)
                .with_attributes(overlay(current.clone(), patch));
        }

        let updated = with_timeout(
            self.options.call_timeout,
            self.store.update(resource, &patch),
        )
        .await;
        match updated {
            Ok(after) => ReconciliationResult::new(resource.clone(), ActionTaken::Updated)
                .with_attributes(overlay(
                    overlay(current.clone(), patch),
                    after.current_attributes,
                )),
            Err(e) if e.is_ambiguous() => {
                warn!("Update of {} failed ambiguously ({}), checking remote state", resource, e);
                match self.find(resource).await {
                    Ok(state)
                        if state.exists
                            && patch
                                .iter()
                                .all(|(k, v)| state.current_attributes.get(k) == Some(v)) =>
                    {
                        ReconciliationResult::new(resource.clone(), ActionTaken::Updated)
                            .with_attributes(state.current_attributes)
                    }
                    Ok(_) => ReconciliationResult::failed(
                        resource.clone(),
                        FailureDetail::new(FailureKind::Remote, format!("update failed: {e}")),
                    ),
                    Err(find_error) => ReconciliationResult::failed(
                        resource.clone(),
                        ambiguous("update", resource, &e, &find_error),
                    ),
                }
            }
            Err(e) => ReconciliationResult::failed(
                resource.clone(),
                FailureDetail::new(FailureKind::Remote, format!("update failed: {e}")),
            ),
        }
    }

    /// Value to send for one attribute of an existing resource, or `None` if it matches
    fn patch_value(
        &self,
        desc: &ResourceDescriptor,
        value: &AttributeValue,
        current: Option<&Value>,
    ) -> Result<Option<Value>, FailureDetail> {
        match value {
            AttributeValue::Literal(v) => Ok((current != Some(v)).then(|| v.clone())),
            AttributeValue::Reference(target) => {
                let v = self.lookup(desc, target)?;
                Ok((current != Some(&v)).then_some(v))
            }
            AttributeValue::Include(v) => Ok(include_patch(current, v)),
            AttributeValue::IncludeReference(target) => {
                let v = Value::Array(vec![self.lookup(desc, target)?]);
                Ok(include_patch(current, &v))
            }
            AttributeValue::Generate(algorithm) => {
                Ok(present(current).is_none().then(|| self.generate(*algorithm)))
            }
            AttributeValue::PreserveIfPresent(inner) => match (present(current), inner) {
                (Some(_), _) | (None, None) => Ok(None),
                (None, Some(inner)) => self.resolve(desc, inner, None),
            },
        }
    }

    /// Attribute values for a new object
    fn resolve_all(
        &self,
        desc: &ResourceDescriptor,
        previous: Option<&Attributes>,
    ) -> Result<Attributes, FailureDetail> {
        let mut attributes = Attributes::new();
        for (name, value) in &desc.desired {
            let prior = previous.and_then(|p| p.get(name));
            if let Some(v) = self.resolve(desc, value, prior)? {
                attributes.insert(name.clone(), v);
            }
        }
        Ok(attributes)
    }

    /// Resolve one value; `None` leaves the attribute out
    fn resolve(
        &self,
        desc: &ResourceDescriptor,
        value: &AttributeValue,
        prior: Option<&Value>,
    ) -> Result<Option<Value>, FailureDetail> {
        match value {
            AttributeValue::Literal(v) | AttributeValue::Include(v) => Ok(Some(v.clone())),
            AttributeValue::Generate(algorithm) => Ok(Some(self.generate(*algorithm))),
            AttributeValue::Reference(target) => self.lookup(desc, target).map(Some),
            AttributeValue::IncludeReference(target) => {
                Ok(Some(Value::Array(vec![self.lookup(desc, target)?])))
            }
            AttributeValue::PreserveIfPresent(inner) => match (present(prior), inner) {
                (Some(v), _) => Ok(Some(v.clone())),
                (None, Some(inner)) => self.resolve(desc, inner, None),
                (None, None) => Ok(None),
            },
        }
    }

    fn lookup(&self, desc: &ResourceDescriptor, target: &AttributeRef) -> Result<Value, FailureDetail> {
        let found = self
            .resolved
            .get(&target.resource)
            .and_then(|attrs| attrs.get(&target.attribute))
            .filter(|v| !v.is_null());
        match found {
            Some(v) => Ok(v.clone()),
            None if self.options.dry_run => Ok(Value::String(format!("<{target}>"))),
            None => Err(FailureDetail::new(
                FailureKind::Validation,
                ValidationError::UnresolvedReference {
                    resource: desc.resource_ref(),
                    target: target.to_string(),
                }
                .to_string(),
            )),
        }
    }

    /// Fresh secret material; dry runs only show a placeholder
    fn generate(&self, algorithm: SecretAlgorithm) -> Value {
        if self.options.dry_run {
            Value::String(format!("<generated:{algorithm}>"))
        } else {
            Value::String(generator::generate(algorithm))
        }
    }
}

/// Treat missing, null and empty-string values alike
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    })
}

/// Merged value when `current` does not yet contain `desired`
fn include_patch(current: Option<&Value>, desired: &Value) -> Option<Value> {
    match current {
        Some(c) if includes(c, desired) => None,
        Some(c) => Some(merge_include(c, desired)),
        None => Some(desired.clone()),
    }
}

fn overlay(mut base: Attributes, extra: Attributes) -> Attributes {
    base.extend(extra);
    base
}

fn ambiguous(
    operation: &str,
    resource: &ResourceRef,
    error: &StoreError,
    find_error: &StoreError,
) -> FailureDetail {
    FailureDetail::new(
        FailureKind::AmbiguousPartialFailure,
        format!(
            "{operation} failed ({error}) and the follow-up lookup failed ({find_error}); \
             verify {resource} manually before retrying"
        ),
    )
}
