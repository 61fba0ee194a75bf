//! Import client configuration.

use std::time::Duration;

/// Default CRM API base URL (local dev server).
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Default path of the streaming import endpoint.
pub const DEFAULT_IMPORT_PATH: &str = "/api/contacts/import/stream";

/// Default time to wait for the next chunk before giving up.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Where to start imports and how patient to be with them.
///
/// # Example
///
/// ```ignore
/// use crm_import::config::ImportConfig;
///
/// let config = ImportConfig::default()
///     .with_base_url("https://crm.example.com")
///     .with_auth_token("secret");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ImportConfig {
    /// API base URL
    pub base_url: String,
    /// Path of the streaming import endpoint
    pub import_path: String,
    /// Bearer token sent with the request, if any
    pub auth_token: Option<String>,
    /// Caller-side limit on silence between chunks.
    /// The run itself never times out.
    pub idle_timeout: Duration,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            import_path: DEFAULT_IMPORT_PATH.to_string(),
            auth_token: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl ImportConfig {
    /// Create a new ImportConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_import_path(mut self, path: impl Into<String>) -> Self {
        self.import_path = path.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Full URL of the import endpoint.
    pub fn import_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.import_path.trim_start_matches('/')
        )
    }

    /// Build config from environment variables.
    ///
    /// - `CRM_API_URL` - base URL
    /// - `CRM_IMPORT_PATH` - endpoint path
    /// - `CRM_API_TOKEN` - bearer token
    /// - `CRM_IMPORT_IDLE_TIMEOUT_SECS` - idle timeout in whole seconds
    ///
    /// Unset or empty variables keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(url) = non_empty_var("CRM_API_URL") {
            config = config.with_base_url(url);
        }
        if let Some(path) = non_empty_var("CRM_IMPORT_PATH") {
            config = config.with_import_path(path);
        }
        if let Some(token) = non_empty_var("CRM_API_TOKEN") {
            config = config.with_auth_token(token);
        }
        if let Some(raw) = non_empty_var("CRM_IMPORT_IDLE_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    config = config.with_idle_timeout(Duration::from_secs(secs));
                }
                _ => {
                    tracing::warn!(
                        value = %raw,
                        "Ignoring invalid CRM_IMPORT_IDLE_TIMEOUT_SECS, using default"
                    );
                }
            }
        }

        config
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
