//! # Plans
//!
//! Descriptor builders for each command. A plan turns already-resolved input
//! (flags, environment, the saved deployment config) into the list of
//! [`ResourceDescriptor`]s handed to the reconciler. Plans never talk to a
//! remote store.
//!
//! - `oidc`: identity provider applications, API, grants and tenant flags
//! - `rbac`: ServiceAccount, Role/ClusterRole and the binding between them
//! - `secrets`: namespace, credentials Secret and signing-key Secret
//! - `users`: a user's authorised-client list
//!
//! [`ResourceDescriptor`]: crate::descriptor::ResourceDescriptor

pub mod oidc;
pub mod rbac;
pub mod secrets;
pub mod users;

pub use oidc::{Auth0Plan, CredentialsTarget};
pub use rbac::{PolicyRule, RbacPlan, RbacScope};
pub use secrets::SecretsPlan;
pub use users::ClientType;

use crate::descriptor::Labels;

/// Labels applied to every Kubernetes object a command creates
#[must_use]
pub fn standard_labels(app_name: &str, component: &str) -> Labels {
    Labels::from([
        ("app".to_string(), app_name.to_string()),
        ("component".to_string(), component.to_string()),
        ("managed-by".to_string(), format!("{app_name}-setup")),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_labels() {
        let labels = standard_labels("mcp-server", "rbac");
        assert_eq!(labels["app"], "mcp-server");
        assert_eq!(labels["component"], "rbac");
        assert_eq!(labels["managed-by"], "mcp-server-setup");
    }
}
