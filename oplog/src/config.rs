//! Configuration management via environment variables
//!
//! Provides helper functions for reading environment variables with fallback
//! to deprecated variable names with warning logs, and the immutable
//! configuration values injected into the audit interceptor and server.

/// Default upper bound for parsed multipart text fields, in MiB.
pub const DEFAULT_MULTIPART_MAX_MB: u64 = 32;

/// Get an environment variable with fallback to a deprecated name
///
/// If the new variable name is set, returns its value.
/// If only the old (deprecated) variable name is set, returns its value
/// and logs a deprecation warning.
///
/// # Example
/// ```
/// use oplog::config::get_env_with_fallback;
///
/// let prefix = get_env_with_fallback("OPLOG_ROUTE_PREFIX", "URL_PATH_PREFIX");
/// ```
pub fn get_env_with_fallback(new_name: &str, old_name: &str) -> Option<String> {
    if let Ok(val) = std::env::var(new_name) {
        return Some(val);
    }
    if let Ok(val) = std::env::var(old_name) {
        tracing::warn!(
            "Environment variable '{}' is deprecated, use '{}' instead",
            old_name,
            new_name
        );
        return Some(val);
    }
    None
}

/// Get an environment variable with fallback and default value
pub fn get_env_with_fallback_or(new_name: &str, old_name: &str, default: &str) -> String {
    get_env_with_fallback(new_name, old_name).unwrap_or_else(|| default.to_string())
}

/// Get an environment variable with fallback, parsing to a specific type
///
/// Returns `default` if neither variable is set or parsing fails.
pub fn get_env_with_fallback_parse<T: std::str::FromStr>(
    new_name: &str,
    old_name: &str,
    default: T,
) -> T {
    get_env_with_fallback(new_name, old_name)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Get a comma separated list from an environment variable with fallback
///
/// Empty items are dropped and surrounding whitespace is trimmed.
pub fn get_env_with_fallback_list(new_name: &str, old_name: &str) -> Vec<String> {
    get_env_with_fallback(new_name, old_name)
        .map(|raw| split_list(&raw))
        .unwrap_or_default()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Audit interceptor configuration
///
/// Built once at startup and shared read-only by every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditConfig {
    /// Requests whose path contains any of these substrings are not audited.
    pub excluded_paths: Vec<String>,
    /// Route prefix (without slashes) stripped from recorded paths.
    pub route_prefix: String,
    /// Maximum total size of multipart text fields the normalizer will parse.
    pub multipart_max_bytes: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            excluded_paths: Vec::new(),
            route_prefix: String::new(),
            multipart_max_bytes: DEFAULT_MULTIPART_MAX_MB << 20,
        }
    }
}

impl AuditConfig {
    /// Load audit configuration from environment variables.
    pub fn from_env() -> Self {
        let excluded_paths =
            get_env_with_fallback_list("OPLOG_EXCLUDED_PATHS", "OPERATION_LOG_DISABLED_PATHS");
        let route_prefix = get_env_with_fallback_or("OPLOG_ROUTE_PREFIX", "URL_PATH_PREFIX", "");
        let max_mb = get_env_with_fallback_parse(
            "OPLOG_MULTIPART_MAX_MB",
            "UPLOAD_SINGLE_MAX_SIZE",
            DEFAULT_MULTIPART_MAX_MB,
        );

        Self {
            excluded_paths,
            route_prefix: route_prefix.trim_matches('/').to_string(),
            multipart_max_bytes: max_mb << 20,
        }
    }

    /// Replace the excluded path substrings.
    pub fn with_excluded_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the route prefix stripped from recorded paths.
    pub fn with_route_prefix(mut self, prefix: &str) -> Self {
        self.route_prefix = prefix.trim_matches('/').to_string();
        self
    }

    /// Replace the multipart size limit.
    pub fn with_multipart_max_bytes(mut self, bytes: u64) -> Self {
        self.multipart_max_bytes = bytes;
        self
    }
}

/// Server configuration (bind address, database, endpoint catalog)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// SQLite database URL
    pub database_url: String,
    /// Optional YAML/JSON endpoint catalog file
    pub endpoints_file: Option<String>,
    /// Reload interval for database-backed endpoint patterns (seconds)
    pub endpoints_refresh_secs: u64,
}

impl ServerConfig {
    /// Load server configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: get_env_with_fallback_or("OPLOG_HOST", "HOST", "0.0.0.0"),
            port: get_env_with_fallback_parse("OPLOG_PORT", "PORT", 8080),
            database_url: default_database_url(),
            endpoints_file: get_env_with_fallback("OPLOG_ENDPOINTS_FILE", "ENDPOINTS_FILE"),
            endpoints_refresh_secs: get_env_with_fallback_parse(
                "OPLOG_ENDPOINTS_REFRESH_SECS",
                "ENDPOINTS_REFRESH_INTERVAL",
                60,
            ),
        }
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Database URL from `OPLOG_DATABASE_URL` (legacy `DATABASE_URL`).
pub fn default_database_url() -> String {
    get_env_with_fallback_or(
        "OPLOG_DATABASE_URL",
        "DATABASE_URL",
        "sqlite:data/oplog.db",
    )
}
