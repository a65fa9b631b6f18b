//! # Kubernetes Store
//!
//! [`RemoteStore`] over the Kubernetes API using `kube` and the `k8s-openapi`
//! types.
//!
//! | Kind | Object |
//! |---|---|
//! | `Namespace` | `v1/Namespace` |
//! | `ServiceAccount` | `v1/ServiceAccount` |
//! | `RoleDefinition` | `Role` with a namespace, `ClusterRole` without |
//! | `RoleBinding` | `RoleBinding` with a namespace, `ClusterRoleBinding` without |
//! | `SecretStore` | `v1/Secret` (type `Opaque`) |
//!
//! Attributes are the top-level fields of the object without `apiVersion`,
//! `kind`, `metadata` and `status`. Secrets are the exception: their attributes
//! are the entries of `data`, decoded to UTF-8 strings, and are written back
//! base64-encoded.

use super::{RemoteState, RemoteStore, StoreError};
use crate::descriptor::{Attributes, Labels, ResourceKind, ResourceRef};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use k8s_openapi::api::core::v1::{Namespace, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, info_span, Instrument};

/// Field manager recorded on objects this tool writes
const FIELD_MANAGER: &str = "oidc-deploy";

/// Top-level object fields that are never attributes
const RESERVED_FIELDS: &[&str] = &["apiVersion", "kind", "metadata", "status"];

/// Kubernetes adapter sharing one client across every call
#[derive(Clone)]
pub struct KubernetesStore {
    client: Client,
}

impl std::fmt::Debug for KubernetesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesStore").finish_non_exhaustive()
    }
}

/// Run `$op` against the typed API that backs `$resource`
macro_rules! with_api {
    ($self:ident, $resource:expr, $op:ident ( $($arg:expr),* )) => {{
        let client = $self.client.clone();
        let resource: &ResourceRef = $resource;
        match (resource.kind, resource.key.namespace()) {
            (ResourceKind::Namespace, _) => {
                $op(Api::<Namespace>::all(client), resource $(, $arg)*).await
            }
            (ResourceKind::ServiceAccount, Some(ns)) => {
                $op(Api::<ServiceAccount>::namespaced(client, ns), resource $(, $arg)*).await
            }
            (ResourceKind::RoleDefinition, Some(ns)) => {
                $op(Api::<Role>::namespaced(client, ns), resource $(, $arg)*).await
            }
            (ResourceKind::RoleDefinition, None) => {
                $op(Api::<ClusterRole>::all(client), resource $(, $arg)*).await
            }
            (ResourceKind::RoleBinding, Some(ns)) => {
                $op(Api::<RoleBinding>::namespaced(client, ns), resource $(, $arg)*).await
            }
            (ResourceKind::RoleBinding, None) => {
                $op(Api::<ClusterRoleBinding>::all(client), resource $(, $arg)*).await
            }
            (ResourceKind::SecretStore, Some(ns)) => {
                $op(Api::<Secret>::namespaced(client, ns), resource $(, $arg)*).await
            }
            (ResourceKind::ServiceAccount | ResourceKind::SecretStore, None) => {
                Err(StoreError::Payload(format!("{resource} requires a namespace")))
            }
            (kind, _) => Err(StoreError::UnsupportedKind {
                kind,
                store: "kubernetes",
            }),
        }
    }};
}

impl KubernetesStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster configuration
    pub async fn try_default() -> Result<Self, StoreError> {
        let client = Client::try_default()
            .await
            .map_err(|e| StoreError::Connect(format!("failed to create Kubernetes client: {e}")))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl RemoteStore for KubernetesStore {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn find(&self, resource: &ResourceRef) -> Result<RemoteState, StoreError> {
        let span = info_span!("kubernetes.find", resource = %resource);
        async move { with_api!(self, resource, find_object()) }
            .instrument(span)
            .await
    }

    async fn create(
        &self,
        resource: &ResourceRef,
        attributes: &Attributes,
        labels: &Labels,
    ) -> Result<RemoteState, StoreError> {
        let span = info_span!("kubernetes.create", resource = %resource);
        async move { with_api!(self, resource, create_object(attributes, labels)) }
            .instrument(span)
            .await
    }

    async fn update(
        &self,
        resource: &ResourceRef,
        attributes: &Attributes,
    ) -> Result<RemoteState, StoreError> {
        let span = info_span!("kubernetes.update", resource = %resource);
        async move { with_api!(self, resource, patch_object(attributes)) }
            .instrument(span)
            .await
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<bool, StoreError> {
        let span = info_span!("kubernetes.delete", resource = %resource);
        async move { with_api!(self, resource, delete_object()) }
            .instrument(span)
            .await
    }
}

async fn find_object<K>(api: Api<K>, resource: &ResourceRef) -> Result<RemoteState, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + std::fmt::Debug,
{
    match api.get_opt(&resource.key.name).await {
        Ok(Some(object)) => Ok(RemoteState::present(object_to_attributes(
            resource.kind,
            &object,
        )?)),
        Ok(None) => {
            debug!("{} not found", resource);
            Ok(RemoteState::absent())
        }
        Err(e) => Err(classify(e)),
    }
}

async fn create_object<K>(
    api: Api<K>,
    resource: &ResourceRef,
    attributes: &Attributes,
    labels: &Labels,
) -> Result<RemoteState, StoreError>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + std::fmt::Debug,
{
    let object: K = build_object::<K>(resource, attributes, labels)?;
    let params = PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..PostParams::default()
    };
    let created = api.create(&params, &object).await.map_err(classify)?;
    info!("Created {} {}", K::kind(&()), resource.key);
    Ok(RemoteState::present(object_to_attributes(
        resource.kind,
        &created,
    )?))
}

async fn patch_object<K>(
    api: Api<K>,
    resource: &ResourceRef,
    attributes: &Attributes,
) -> Result<RemoteState, StoreError>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + std::fmt::Debug,
{
    let patch = Value::Object(attributes_to_fields(resource.kind, attributes));
    let params = PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..PatchParams::default()
    };
    let patched = api
        .patch(&resource.key.name, &params, &Patch::Merge(patch))
        .await
        .map_err(classify)?;
    info!("Patched {} {}", K::kind(&()), resource.key);
    Ok(RemoteState::present(object_to_attributes(
        resource.kind,
        &patched,
    )?))
}

async fn delete_object<K>(api: Api<K>, resource: &ResourceRef) -> Result<bool, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + std::fmt::Debug,
{
    match api
        .delete(&resource.key.name, &DeleteParams::default())
        .await
    {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
        Err(e) => Err(classify(e)),
    }
}

/// Assemble a typed object from attributes, identity and labels
fn build_object<K>(
    resource: &ResourceRef,
    attributes: &Attributes,
    labels: &Labels,
) -> Result<K, StoreError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let mut metadata = json!({ "name": resource.key.name });
    if let Some(ns) = resource.key.namespace() {
        if resource.kind != ResourceKind::Namespace {
            metadata["namespace"] = json!(ns);
        }
    }
    if !labels.is_empty() {
        metadata["labels"] = json!(labels);
    }

    let mut fields = attributes_to_fields(resource.kind, attributes);
    fields.insert("apiVersion".into(), json!(K::api_version(&())));
    fields.insert("kind".into(), json!(K::kind(&())));
    fields.insert("metadata".into(), metadata);
    if resource.kind == ResourceKind::SecretStore {
        fields.insert("type".into(), json!("Opaque"));
    }

    serde_json::from_value(Value::Object(fields))
        .map_err(|e| StoreError::Payload(format!("invalid {resource} attributes: {e}")))
}

/// Object fields for a set of attributes (secret values are base64-encoded under `data`)
fn attributes_to_fields(kind: ResourceKind, attributes: &Attributes) -> Map<String, Value> {
    if kind == ResourceKind::SecretStore {
        let data: Map<String, Value> = attributes
            .iter()
            .map(|(key, value)| {
                let raw = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), json!(general_purpose::STANDARD.encode(raw)))
            })
            .collect();
        let mut fields = Map::new();
        fields.insert("data".into(), Value::Object(data));
        return fields;
    }
    attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Attributes of a typed object
fn object_to_attributes<K: Serialize>(
    kind: ResourceKind,
    object: &K,
) -> Result<Attributes, StoreError> {
    let value = serde_json::to_value(object)
        .map_err(|e| StoreError::Payload(format!("failed to serialize {kind}: {e}")))?;
    let Value::Object(fields) = value else {
        return Err(StoreError::Payload(format!("{kind} is not a JSON object")));
    };
    fields_to_attributes(kind, fields)
}

fn fields_to_attributes(
    kind: ResourceKind,
    mut fields: Map<String, Value>,
) -> Result<Attributes, StoreError> {
    if kind == ResourceKind::SecretStore {
        let mut attributes = Attributes::new();
        if let Some(Value::Object(data)) = fields.remove("data") {
            for (key, encoded) in data {
                let encoded = encoded.as_str().unwrap_or_default();
                let bytes = general_purpose::STANDARD.decode(encoded).map_err(|e| {
                    StoreError::Payload(format!("secret key '{key}' is not valid base64: {e}"))
                })?;
                let text = String::from_utf8(bytes).map_err(|e| {
                    StoreError::Payload(format!("secret key '{key}' is not UTF-8: {e}"))
                })?;
                attributes.insert(key, Value::String(text));
            }
        }
        return Ok(attributes);
    }

    Ok(fields
        .into_iter()
        .filter(|(k, _)| !RESERVED_FIELDS.contains(&k.as_str()))
        .collect())
}

/// Map a `kube` error onto the store taxonomy
fn classify(error: kube::Error) -> StoreError {
    match error {
        kube::Error::Api(api_err) => {
            let code = api_err.code;
            let message = if code == 403 {
                format!(
                    "{} (check that the current identity has RBAC permission for this operation)",
                    api_err.message
                )
            } else {
                api_err.message
            };
            StoreError::from_status(code, message)
        }
        other => StoreError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::IdentityKey;

    mod mapping_tests {
        use super::*;

        #[test]
        fn test_secret_data_round_trips_through_base64() {
            let mut attrs = Attributes::new();
            attrs.insert("client-secret".into(), json!("s3cr3t"));
            let fields = attributes_to_fields(ResourceKind::SecretStore, &attrs);
            assert_eq!(fields["data"]["client-secret"], json!("czNjcjN0"));

            let decoded = fields_to_attributes(ResourceKind::SecretStore, fields).unwrap();
            assert_eq!(decoded, attrs);
        }

        #[test]
        fn test_reserved_fields_are_not_attributes() {
            let fields = json!({
                "apiVersion": "rbac.authorization.k8s.io/v1",
                "kind": "Role",
                "metadata": {"name": "reader"},
                "rules": [{"apiGroups": [""], "resources": ["pods"], "verbs": ["get"]}]
            });
            let Value::Object(fields) = fields else {
                unreachable!()
            };
            let attrs = fields_to_attributes(ResourceKind::RoleDefinition, fields).unwrap();
            assert_eq!(attrs.keys().collect::<Vec<_>>(), vec!["rules"]);
        }

        #[test]
        fn test_build_namespaced_role() {
            let resource = ResourceRef::new(
                ResourceKind::RoleDefinition,
                IdentityKey::scoped("prod", "reader"),
            );
            let mut attrs = Attributes::new();
            attrs.insert(
                "rules".into(),
                json!([{"apiGroups": [""], "resources": ["pods"], "verbs": ["get", "list"]}]),
            );
            let mut labels = Labels::new();
            labels.insert("component".into(), "rbac".into());

            let role: Role = build_object(&resource, &attrs, &labels).unwrap();
            assert_eq!(role.metadata.name.as_deref(), Some("reader"));
            assert_eq!(role.metadata.namespace.as_deref(), Some("prod"));
            assert_eq!(
                role.metadata.labels.unwrap().get("component").map(String::as_str),
                Some("rbac")
            );
            assert_eq!(role.rules.unwrap()[0].verbs, vec!["get", "list"]);
        }

        #[test]
        fn test_build_secret_is_opaque() {
            let resource = ResourceRef::new(
                ResourceKind::SecretStore,
                IdentityKey::scoped("prod", "creds"),
            );
            let mut attrs = Attributes::new();
            attrs.insert("token".into(), json!("abc"));
            let secret: Secret = build_object(&resource, &attrs, &Labels::new()).unwrap();
            assert_eq!(secret.type_.as_deref(), Some("Opaque"));
            assert_eq!(secret.data.unwrap()["token"].0, b"abc".to_vec());
        }

        #[test]
        fn test_invalid_attributes_are_payload_errors() {
            let resource = ResourceRef::new(
                ResourceKind::RoleBinding,
                IdentityKey::scoped("prod", "binding"),
            );
            let mut attrs = Attributes::new();
            attrs.insert("roleRef".into(), json!("not-an-object"));
            attrs.insert("subjects".into(), json!([]));
            let err = build_object::<RoleBinding>(&resource, &attrs, &Labels::new()).unwrap_err();
            assert!(matches!(err, StoreError::Payload(_)));
        }
    }
}
