//! Shared setup for the HTTP-backed integration suites

use oidc_deploy::store::Auth0Store;
use std::sync::Once;
use std::time::Duration;
use wiremock::MockServer;

static RUSTLS_INIT: Once = Once::new();

pub const TEST_TOKEN: &str = "test-management-token";

/// Install the ring crypto provider once per test binary
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

/// Auth0 store pointed at a mock Management API
pub fn auth0_store(server: &MockServer) -> Auth0Store {
    init_rustls();
    Auth0Store::with_base_url(format!("{}/api/v2", server.uri()), TEST_TOKEN)
        .expect("Failed to create Auth0 store")
        .with_timeout(Duration::from_secs(5))
}
