//! # Constants
//!
//! Shared constants used throughout the tools.
//!
//! These values represent reasonable defaults and can be overridden via
//! command-line flags or environment variables where applicable.

/// Default timeout for a single remote call (seconds)
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// Timeout for fetching an OIDC discovery document (seconds)
pub const DISCOVERY_TIMEOUT_SECS: u64 = 10;

/// Default saved deployment configuration file
pub const DEFAULT_CONFIG_FILE: &str = "oidc-config.json";

/// Default Helm values output file
pub const DEFAULT_HELM_VALUES_FILE: &str = "oidc-values.yaml";

/// Local environment file written by `make-config`
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Port the server listens on when run locally
pub const DEFAULT_SERVER_PORT: u16 = 4208;

/// Redis used by a locally running server
pub const LOCAL_REDIS_URL: &str = "redis://localhost:6379/0";

/// Ignore patterns for local files that may hold credentials
pub const GITIGNORE_ENTRIES: &[&str] = &[
    ".env",
    ".env.local",
    ".env.*.local",
    "*-token.txt",
    "*.token",
];

/// Default application name used for labels
pub const DEFAULT_APP_NAME: &str = "mcp-server";

/// Page size used when listing identity provider objects
pub const PROVIDER_PAGE_SIZE: usize = 100;

/// Default API scopes registered for the server audience
pub const DEFAULT_API_SCOPES: &[(&str, &str)] = &[
    ("mcp:read", "Read access to MCP tools"),
    ("mcp:write", "Write access to MCP tools"),
];

/// Grant types required by the server application
pub const SERVER_GRANT_TYPES: &[&str] = &["authorization_code", "refresh_token", "client_credentials"];

/// Redirect path used by the server's OAuth proxy
pub const SERVER_CALLBACK_PATH: &str = "/auth/callback";

/// Callback used by Claude Desktop
pub const CLAUDE_CALLBACK: &str = "https://claude.ai/api/mcp/auth_callback";

/// Origin for Claude Desktop
pub const CLAUDE_ORIGIN: &str = "https://claude.ai";

/// Local callbacks used by the test harness
pub const LOCAL_TEST_CALLBACKS: &[&str] = &[
    "http://localhost:8888/callback",
    "http://localhost:8889/callback",
    "http://127.0.0.1:8888/callback",
];

/// Local origins used by the test harness
pub const LOCAL_TEST_ORIGINS: &[&str] = &["http://localhost:8888", "http://localhost:8889"];

/// Management API scopes granted to the management application
pub const MANAGEMENT_SCOPES: &[&str] = &[
    "read:tenant_settings",
    "update:tenant_settings",
    "read:resource_servers",
    "create:resource_servers",
    "update:resource_servers",
    "delete:resource_servers",
    "read:connections",
    "update:connections",
    "read:clients",
    "create:clients",
    "update:clients",
    "delete:clients",
    "read:client_keys",
    "read:client_summary",
    "read:client_grants",
    "create:client_grants",
    "update:client_grants",
    "delete:client_grants",
    "read:users",
    "update:users",
    "read:user_idp_tokens",
];

/// Number of random bytes behind every generated key
pub const GENERATED_KEY_BYTES: usize = 32;

/// Default deployment name used to derive application names
pub const DEFAULT_DEPLOYMENT_NAME: &str = "MCP Server";

/// Identity key of the tenant settings singleton
pub const TENANT_SETTINGS_KEY: &str = "tenant";

/// Access token lifetime for the API audience (seconds)
pub const API_TOKEN_LIFETIME_SECS: u64 = 86_400;

/// Access token lifetime for browser flows (seconds)
pub const API_TOKEN_LIFETIME_FOR_WEB_SECS: u64 = 7_200;
