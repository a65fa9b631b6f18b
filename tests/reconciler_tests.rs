//! # Reconciler Integration Tests
//!
//! Drives `reconcile` and `teardown` against the in-memory store.
//!
//! These tests verify:
//! - Idempotence across reruns, including generated and preserved values
//! - Dependency ordering and skip propagation
//! - Dry runs leave the store untouched
//! - Fatal pre-flight errors make zero store calls
//! - Ambiguous failures, conflicts and timeouts
//! - Cancellation and teardown order

use async_trait::async_trait;
use oidc_deploy::descriptor::{Attributes, Labels};
use oidc_deploy::generator::SecretAlgorithm;
use oidc_deploy::reconciler::CancellationFlag;
use oidc_deploy::store::{MemoryStore, StoreOperation};
use oidc_deploy::{
    reconcile, teardown, ActionTaken, AttributeValue, FailureKind, IdentityKey, ReconcileError,
    ReconcileOptions, RemoteState, RemoteStore, ResourceDescriptor, ResourceKind, ResourceRef,
    StoreError,
};
use regex::Regex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn service_account(name: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(ResourceKind::ServiceAccount, IdentityKey::scoped("prod", name))
}

fn namespace(name: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(ResourceKind::Namespace, IdentityKey::named(name))
}

fn secret(name: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(ResourceKind::SecretStore, IdentityKey::scoped("prod", name))
}

fn role(name: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(ResourceKind::RoleDefinition, IdentityKey::scoped("prod", name)).with(
        "rules",
        AttributeValue::literal(json!([{"apiGroups": [""], "resources": ["pods"], "verbs": ["get"]}])),
    )
}

fn binding(name: &str, sa: &ResourceDescriptor, role: &ResourceDescriptor) -> ResourceDescriptor {
    ResourceDescriptor::new(ResourceKind::RoleBinding, IdentityKey::scoped("prod", name))
        .with("roleRef", AttributeValue::literal(json!({"kind": "Role", "name": role.key.name})))
        .with("subjects", AttributeValue::literal(json!([{"kind": "ServiceAccount", "name": sa.key.name}])))
        .depends_on(sa.resource_ref())
        .depends_on(role.resource_ref())
}

fn attrs(pairs: &[(&str, serde_json::Value)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn actions(report: &oidc_deploy::ReconciliationReport) -> Vec<ActionTaken> {
    report.results.iter().map(|r| r.action).collect()
}

/// Wraps a [`MemoryStore`] with scripted lookup behaviour
#[derive(Default)]
struct ScriptedStore {
    inner: MemoryStore,
    /// The first `hidden_finds` lookups report the resource as absent
    hidden_finds: AtomicUsize,
    /// Lookups after this many calls fail
    finds_before_outage: Option<usize>,
    finds: AtomicUsize,
    /// Set on the first successful create
    cancel_on_create: Option<CancellationFlag>,
}

#[async_trait]
impl RemoteStore for ScriptedStore {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn find(&self, resource: &ResourceRef) -> Result<RemoteState, StoreError> {
        let call = self.finds.fetch_add(1, Ordering::SeqCst);
        if self.finds_before_outage.is_some_and(|limit| call >= limit) {
            return Err(StoreError::Transport("connection reset by peer".to_string()));
        }
        if self
            .hidden_finds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(RemoteState::absent());
        }
        self.inner.find(resource).await
    }

    async fn create(
        &self,
        resource: &ResourceRef,
        attributes: &Attributes,
        labels: &Labels,
    ) -> Result<RemoteState, StoreError> {
        let state = self.inner.create(resource, attributes, labels).await?;
        if let Some(cancel) = &self.cancel_on_create {
            cancel.cancel();
        }
        Ok(state)
    }

    async fn update(
        &self,
        resource: &ResourceRef,
        attributes: &Attributes,
    ) -> Result<RemoteState, StoreError> {
        self.inner.update(resource, attributes).await
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<bool, StoreError> {
        self.inner.delete(resource).await
    }
}

#[tokio::test]
async fn test_service_account_created_then_skipped() {
    let store = MemoryStore::new();
    let descriptors = vec![service_account("svc-a")];

    let first = reconcile(&descriptors, &store, &ReconcileOptions::new())
        .await
        .unwrap();
    assert_eq!(actions(&first), vec![ActionTaken::Created]);

    let second = reconcile(&descriptors, &store, &ReconcileOptions::new())
        .await
        .unwrap();
    assert_eq!(actions(&second), vec![ActionTaken::SkippedExisting]);
    assert_eq!(store.calls(StoreOperation::Create), 1);
    assert!(second.is_success());
}

#[tokio::test]
async fn test_generated_signing_key_is_hex() {
    let store = MemoryStore::new();
    let desc = secret("jwt").with("signing_key", AttributeValue::parse("generate:hex256").unwrap());

    let report = reconcile(&[desc.clone()], &store, &ReconcileOptions::new())
        .await
        .unwrap();

    let pattern = Regex::new("^[0-9a-f]{64}$").unwrap();
    let key = report.resolved_str(&desc.resource_ref(), "signing_key").unwrap();
    assert!(pattern.is_match(key), "unexpected key format: {key}");
}

#[tokio::test]
async fn test_rerun_keeps_generated_and_preserved_values() {
    let store = MemoryStore::new();
    let desc = secret("keys")
        .with("signing", AttributeValue::generate(SecretAlgorithm::Hex256))
        .with("fernet", AttributeValue::generate(SecretAlgorithm::SymmetricKey))
        .with(
            "client-secret",
            AttributeValue::preserve_or(AttributeValue::literal("initial")),
        );

    let first = reconcile(&[desc.clone()], &store, &ReconcileOptions::new())
        .await
        .unwrap();
    let stored = store.get(&desc.resource_ref()).unwrap();
    assert_eq!(stored["client-secret"], json!("initial"));

    // Someone rotates the secret by hand; reruns must keep it
    store.seed(
        desc.resource_ref(),
        attrs(&[
            ("signing", stored["signing"].clone()),
            ("fernet", stored["fernet"].clone()),
            ("client-secret", json!("rotated")),
        ]),
    );
    let second = reconcile(&[desc.clone()], &store, &ReconcileOptions::new())
        .await
        .unwrap();

    assert_eq!(actions(&first), vec![ActionTaken::Created]);
    assert_eq!(actions(&second), vec![ActionTaken::SkippedExisting]);
    let after = store.get(&desc.resource_ref()).unwrap();
    assert_eq!(after["signing"], stored["signing"]);
    assert_eq!(after["client-secret"], json!("rotated"));
    assert_eq!(store.calls(StoreOperation::Update), 0);
}

#[tokio::test]
async fn test_missing_generated_key_is_added_on_update() {
    let store = MemoryStore::new();
    let desc = secret("keys")
        .with("signing", AttributeValue::generate(SecretAlgorithm::Hex256))
        .with("owner", AttributeValue::literal("team-a"));
    store.seed(desc.resource_ref(), attrs(&[("owner", json!("team-a"))]));

    let report = reconcile(&[desc.clone()], &store, &ReconcileOptions::new())
        .await
        .unwrap();

    assert_eq!(actions(&report), vec![ActionTaken::Updated]);
    let signing = store.get(&desc.resource_ref()).unwrap()["signing"].clone();
    assert_eq!(signing.as_str().map(str::len), Some(64));
}

#[tokio::test]
async fn test_include_appends_without_clobbering() {
    let store = MemoryStore::new();
    let app = ResourceDescriptor::new(ResourceKind::OAuthApplication, IdentityKey::named("Demo - Server"))
        .with("app_type", AttributeValue::literal("regular_web"))
        .with("callbacks", AttributeValue::include(json!(["https://b.example.com/cb"])));
    store.seed(
        app.resource_ref(),
        attrs(&[
            ("app_type", json!("regular_web")),
            ("callbacks", json!(["https://a.example.com/cb"])),
        ]),
    );

    let report = reconcile(&[app.clone()], &store, &ReconcileOptions::new())
        .await
        .unwrap();

    assert_eq!(actions(&report), vec![ActionTaken::Updated]);
    assert_eq!(
        store.get(&app.resource_ref()).unwrap()["callbacks"],
        json!(["https://a.example.com/cb", "https://b.example.com/cb"])
    );
}

#[tokio::test]
async fn test_failed_create_skips_dependents_only() {
    let store = MemoryStore::new();
    let ns = namespace("prod");
    let creds = secret("creds")
        .with("token", AttributeValue::literal("t"))
        .depends_on(ns.resource_ref());
    let unrelated = service_account("svc-b");
    store.inject_fault(
        &ns.resource_ref(),
        StoreOperation::Create,
        StoreError::Forbidden("namespaces is forbidden".to_string()),
    );

    let report = reconcile(
        &[ns.clone(), creds.clone(), unrelated],
        &store,
        &ReconcileOptions::new(),
    )
    .await
    .unwrap();

    assert_eq!(
        actions(&report),
        vec![
            ActionTaken::Failed,
            ActionTaken::SkippedDependencyFailed,
            ActionTaken::Created
        ]
    );
    let skipped = report.result(&creds.resource_ref()).unwrap();
    assert_eq!(skipped.error.as_ref().unwrap().kind, FailureKind::DependencyFailed);
    assert!(store.get(&creds.resource_ref()).is_none());
    assert!(!report.is_success());
    assert_eq!(report.failures().len(), 2);
}

#[tokio::test]
async fn test_failed_lookup_aborts_the_run() {
    let store = MemoryStore::new();
    let first = service_account("svc-a");
    store.inject_fault(
        &first.resource_ref(),
        StoreOperation::Find,
        StoreError::Unauthorized("token expired".to_string()),
    );
    let descriptors = vec![first, service_account("svc-b"), service_account("svc-c")];

    let report = reconcile(&descriptors, &store, &ReconcileOptions::new())
        .await
        .unwrap();

    assert_eq!(
        actions(&report),
        vec![ActionTaken::Failed, ActionTaken::None, ActionTaken::None]
    );
    assert_eq!(report.pending.len(), 2);
    assert_eq!(store.calls(StoreOperation::Find), 1);
}

#[tokio::test]
async fn test_continue_on_error_keeps_going_after_failed_lookup() {
    let store = MemoryStore::new();
    let sa = service_account("svc-a");
    let creds = secret("creds")
        .with("token", AttributeValue::literal("t"))
        .depends_on(sa.resource_ref());
    store.inject_fault(
        &sa.resource_ref(),
        StoreOperation::Find,
        StoreError::Forbidden("serviceaccounts is forbidden".to_string()),
    );

    let report = reconcile(
        &[sa, creds, service_account("svc-b")],
        &store,
        &ReconcileOptions::new().continue_on_error(true),
    )
    .await
    .unwrap();

    assert_eq!(
        actions(&report),
        vec![
            ActionTaken::Failed,
            ActionTaken::SkippedDependencyFailed,
            ActionTaken::Created
        ]
    );
}

#[tokio::test]
async fn test_dry_run_has_no_side_effects() {
    let store = MemoryStore::new();
    let existing = secret("existing").with("owner", AttributeValue::literal("team-b"));
    store.seed(existing.resource_ref(), attrs(&[("owner", json!("team-a"))]));
    let descriptors = vec![
        existing.clone(),
        secret("fresh").with("key", AttributeValue::generate(SecretAlgorithm::Hex256)),
        service_account("svc-a"),
    ];
    let before = store.snapshot();

    let report = reconcile(
        &descriptors,
        &store,
        &ReconcileOptions::new().dry_run(true),
    )
    .await
    .unwrap();

    assert_eq!(
        actions(&report),
        vec![
            ActionTaken::WouldUpdate,
            ActionTaken::WouldCreate,
            ActionTaken::WouldCreate
        ]
    );
    assert_eq!(store.snapshot(), before);
    assert_eq!(store.calls(StoreOperation::Create), 0);
    assert_eq!(store.calls(StoreOperation::Update), 0);
    // Generated values are placeholders, never real key material
    let fresh = report.resolved_str(&descriptors[1].resource_ref(), "key").unwrap();
    assert!(fresh.starts_with("<generated:"));
}

#[tokio::test]
async fn test_cycle_is_rejected_before_any_call() {
    let store = MemoryStore::new();
    let a = service_account("a");
    let b = service_account("b").depends_on(a.resource_ref());
    let a = a.depends_on(b.resource_ref());

    let err = reconcile(&[a, b], &store, &ReconcileOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::CyclicDependency { ref members } if members.len() == 2));
    assert_eq!(store.total_calls(), 0);
}

#[tokio::test]
async fn test_duplicate_descriptor_is_rejected_before_any_call() {
    let store = MemoryStore::new();
    let err = reconcile(
        &[service_account("a"), service_account("a")],
        &store,
        &ReconcileOptions::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ReconcileError::DuplicateDescriptor(_)));
    assert_eq!(store.total_calls(), 0);
}

#[tokio::test]
async fn test_results_follow_declaration_order() {
    let store = MemoryStore::new();
    let sa = service_account("svc-a");
    let role = role("reader");
    // Declared before its dependencies but reported in declaration order
    let descriptors = vec![binding("svc-a-binding", &sa, &role), sa, role];

    let report = reconcile(&descriptors, &store, &ReconcileOptions::new())
        .await
        .unwrap();

    let reported: Vec<ResourceRef> = report.results.iter().map(|r| r.resource.clone()).collect();
    let declared: Vec<ResourceRef> = descriptors.iter().map(ResourceDescriptor::resource_ref).collect();
    assert_eq!(reported, declared);
    assert!(report.results.iter().all(|r| r.action == ActionTaken::Created));
}

#[tokio::test]
async fn test_reference_reads_dependency_attributes() {
    let store = MemoryStore::new();
    let app = ResourceDescriptor::new(ResourceKind::OAuthApplication, IdentityKey::named("Demo - Server"))
        .with("app_type", AttributeValue::literal("regular_web"));
    store.seed(
        app.resource_ref(),
        attrs(&[("app_type", json!("regular_web")), ("client_id", json!("abc123"))]),
    );
    let creds = secret("creds")
        .with(
            "server-client-id",
            AttributeValue::reference(app.resource_ref(), "client_id"),
        )
        .depends_on(app.resource_ref());

    let report = reconcile(&[app, creds.clone()], &store, &ReconcileOptions::new())
        .await
        .unwrap();

    assert_eq!(
        store.get(&creds.resource_ref()).unwrap()["server-client-id"],
        json!("abc123")
    );
    assert!(report.is_success());
}

#[tokio::test]
async fn test_lost_create_response_is_recovered() {
    let store = MemoryStore::new();
    let sa = service_account("svc-a");
    store.inject_fault_after_apply(
        &sa.resource_ref(),
        StoreOperation::Create,
        StoreError::Timeout(Duration::from_secs(30)),
    );

    let report = reconcile(&[sa.clone()], &store, &ReconcileOptions::new())
        .await
        .unwrap();

    assert_eq!(actions(&report), vec![ActionTaken::Created]);
    assert_eq!(store.calls(StoreOperation::Find), 2);
}

#[tokio::test]
async fn test_transport_failure_with_nothing_applied_is_a_remote_error() {
    let store = MemoryStore::new();
    let sa = service_account("svc-a");
    store.inject_fault(
        &sa.resource_ref(),
        StoreOperation::Create,
        StoreError::Transport("broken pipe".to_string()),
    );

    let report = reconcile(&[sa], &store, &ReconcileOptions::new())
        .await
        .unwrap();

    let error = report.results[0].error.as_ref().unwrap();
    assert_eq!(error.kind, FailureKind::Remote);
}

#[tokio::test]
async fn test_unverifiable_create_is_ambiguous() {
    let store = ScriptedStore {
        finds_before_outage: Some(1),
        ..ScriptedStore::default()
    };
    let sa = service_account("svc-a");
    store.inner.inject_fault_after_apply(
        &sa.resource_ref(),
        StoreOperation::Create,
        StoreError::Api {
            status: 503,
            message: "upstream unavailable".to_string(),
        },
    );

    let report = reconcile(&[sa], &store, &ReconcileOptions::new())
        .await
        .unwrap();

    let error = report.results[0].error.as_ref().unwrap();
    assert_eq!(error.kind, FailureKind::AmbiguousPartialFailure);
    assert!(error.message.contains("verify"));
}

#[tokio::test]
async fn test_conflict_on_create_counts_as_existing() {
    let store = ScriptedStore {
        hidden_finds: AtomicUsize::new(1),
        ..ScriptedStore::default()
    };
    let sa = service_account("svc-a");
    store.inner.seed(sa.resource_ref(), Attributes::new());

    let report = reconcile(&[sa], &store, &ReconcileOptions::new())
        .await
        .unwrap();

    assert_eq!(actions(&report), vec![ActionTaken::SkippedExisting]);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_slow_call_times_out() {
    let store = MemoryStore::new();
    let sa = service_account("svc-a");
    store.inject_delay(&sa.resource_ref(), StoreOperation::Create, Duration::from_secs(5));

    let report = reconcile(
        &[sa.clone()],
        &store,
        &ReconcileOptions::new().call_timeout(Duration::from_millis(50)),
    )
    .await
    .unwrap();

    assert_eq!(actions(&report), vec![ActionTaken::Failed]);
    assert!(report.results[0]
        .error
        .as_ref()
        .unwrap()
        .message
        .contains("timed out"));
    assert!(store.get(&sa.resource_ref()).is_none());
}

#[tokio::test]
async fn test_cancellation_stops_before_next_descriptor() {
    let cancel = CancellationFlag::new();
    let store = ScriptedStore {
        cancel_on_create: Some(cancel.clone()),
        ..ScriptedStore::default()
    };
    let descriptors = vec![service_account("a"), service_account("b"), service_account("c")];

    let report = reconcile(
        &descriptors,
        &store,
        &ReconcileOptions::new().cancel_with(cancel),
    )
    .await
    .unwrap();

    assert!(report.canceled);
    assert!(!report.is_success());
    assert_eq!(
        actions(&report),
        vec![ActionTaken::Created, ActionTaken::None, ActionTaken::None]
    );
    assert_eq!(report.pending.len(), 2);
}

#[tokio::test]
async fn test_replace_regenerates_keys_for_selected_kinds_only() {
    let store = MemoryStore::new();
    let keys = secret("keys").with("signing", AttributeValue::generate(SecretAlgorithm::Hex256));
    let sa = service_account("svc-a");
    reconcile(&[keys.clone(), sa.clone()], &store, &ReconcileOptions::new())
        .await
        .unwrap();
    let original = store.get(&keys.resource_ref()).unwrap()["signing"].clone();

    let options = ReconcileOptions::new()
        .replace(true)
        .replace_only([ResourceKind::SecretStore]);
    let report = reconcile(&[keys.clone(), sa], &store, &options)
        .await
        .unwrap();

    assert_eq!(
        actions(&report),
        vec![ActionTaken::Created, ActionTaken::SkippedExisting]
    );
    assert_ne!(store.get(&keys.resource_ref()).unwrap()["signing"], original);
    assert_eq!(store.calls(StoreOperation::Delete), 1);
}

#[tokio::test]
async fn test_teardown_deletes_dependents_first() {
    let store = MemoryStore::new();
    let sa = service_account("svc-a");
    let role = role("reader");
    let binding = binding("svc-a-binding", &sa, &role);
    let descriptors = vec![sa.clone(), role.clone(), binding.clone()];
    reconcile(&descriptors, &store, &ReconcileOptions::new())
        .await
        .unwrap();
    store.inject_fault(
        &binding.resource_ref(),
        StoreOperation::Delete,
        StoreError::Forbidden("rolebindings is forbidden".to_string()),
    );

    let blocked = teardown(
        &descriptors,
        &store,
        &ReconcileOptions::new().continue_on_error(true),
    )
    .await
    .unwrap();
    assert_eq!(
        actions(&blocked),
        vec![
            ActionTaken::SkippedDependencyFailed,
            ActionTaken::SkippedDependencyFailed,
            ActionTaken::Failed
        ]
    );
    assert!(store.get(&sa.resource_ref()).is_some());

    store.clear_faults();
    let report = teardown(&descriptors, &store, &ReconcileOptions::new())
        .await
        .unwrap();
    assert_eq!(actions(&report), vec![ActionTaken::Deleted; 3]);
    assert!(store.snapshot().is_empty());

    let again = teardown(&descriptors, &store, &ReconcileOptions::new())
        .await
        .unwrap();
    assert_eq!(actions(&again), vec![ActionTaken::AlreadyAbsent; 3]);
}

#[tokio::test]
async fn test_teardown_dry_run_only_looks() {
    let store = MemoryStore::new();
    let sa = service_account("svc-a");
    store.seed(sa.resource_ref(), Attributes::new());

    let report = teardown(
        &[sa.clone(), service_account("svc-b")],
        &store,
        &ReconcileOptions::new().dry_run(true),
    )
    .await
    .unwrap();

    assert_eq!(
        actions(&report),
        vec![ActionTaken::WouldDelete, ActionTaken::AlreadyAbsent]
    );
    assert_eq!(store.calls(StoreOperation::Delete), 0);
    assert!(store.get(&sa.resource_ref()).is_some());
}

#[tokio::test]
async fn test_lost_update_response_is_recovered() {
    let store = MemoryStore::new();
    let config = secret("app-config").with("mode", AttributeValue::literal("strict"));
    store.seed(config.resource_ref(), attrs(&[("mode", json!("loose"))]));
    store.inject_fault_after_apply(
        &config.resource_ref(),
        StoreOperation::Update,
        StoreError::Timeout(Duration::from_secs(30)),
    );

    let report = reconcile(&[config.clone()], &store, &ReconcileOptions::new())
        .await
        .unwrap();

    assert_eq!(actions(&report), vec![ActionTaken::Updated]);
    assert!(report.is_success());
    assert_eq!(store.calls(StoreOperation::Find), 2);
    assert_eq!(store.get(&config.resource_ref()).unwrap()["mode"], json!("strict"));
}

#[tokio::test]
async fn test_update_that_never_landed_is_a_remote_error() {
    let store = MemoryStore::new();
    let config = secret("app-config").with("mode", AttributeValue::literal("strict"));
    store.seed(config.resource_ref(), attrs(&[("mode", json!("loose"))]));
    store.inject_fault(
        &config.resource_ref(),
        StoreOperation::Update,
        StoreError::Transport("connection reset by peer".to_string()),
    );

    let report = reconcile(&[config.clone()], &store, &ReconcileOptions::new())
        .await
        .unwrap();

    let error = report.results[0].error.as_ref().unwrap();
    assert_eq!(error.kind, FailureKind::Remote);
    assert_eq!(store.get(&config.resource_ref()).unwrap()["mode"], json!("loose"));
}

#[tokio::test]
async fn test_unverifiable_update_is_ambiguous() {
    let store = ScriptedStore {
        finds_before_outage: Some(1),
        ..ScriptedStore::default()
    };
    let config = secret("app-config").with("mode", AttributeValue::literal("strict"));
    store
        .inner
        .seed(config.resource_ref(), attrs(&[("mode", json!("loose"))]));
    store.inner.inject_fault_after_apply(
        &config.resource_ref(),
        StoreOperation::Update,
        StoreError::Timeout(Duration::from_secs(30)),
    );

    let report = reconcile(&[config], &store, &ReconcileOptions::new())
        .await
        .unwrap();

    assert_eq!(actions(&report), vec![ActionTaken::Failed]);
    let error = report.results[0].error.as_ref().unwrap();
    assert_eq!(error.kind, FailureKind::AmbiguousPartialFailure);
    assert!(error.message.starts_with("update failed"));
}

#[tokio::test]
async fn test_teardown_keeps_deleting_independent_resources() {
    let store = MemoryStore::new();
    let sa = service_account("svc-a");
    let role = role("reader");
    let binding = binding("svc-a-binding", &sa, &role);
    let unrelated = service_account("svc-b");
    let descriptors = vec![sa.clone(), role.clone(), binding.clone(), unrelated.clone()];
    reconcile(&descriptors, &store, &ReconcileOptions::new())
        .await
        .unwrap();
    store.inject_fault(
        &binding.resource_ref(),
        StoreOperation::Delete,
        StoreError::Forbidden("rolebindings is forbidden".to_string()),
    );

    let report = teardown(&descriptors, &store, &ReconcileOptions::new())
        .await
        .unwrap();

    assert_eq!(
        actions(&report),
        vec![
            ActionTaken::SkippedDependencyFailed,
            ActionTaken::SkippedDependencyFailed,
            ActionTaken::Failed,
            ActionTaken::Deleted
        ]
    );
    assert!(report.pending.is_empty());
    assert!(store.get(&unrelated.resource_ref()).is_none());
    assert!(store.get(&sa.resource_ref()).is_some());
}
