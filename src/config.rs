//! Service configuration
//!
//! Loaded once at startup from a JSON file, overridden from the
//! environment, validated, then passed explicitly to whatever needs it.

use std::fs;
use std::path::Path;
use std::time::Duration;

use axum::http::Uri;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credentials::Credentials;
use crate::dataapi::PollPolicy;
use crate::http_server::HttpServerConfig;
use crate::store::{is_valid_identifier, TableLayout};

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("invalid config JSON: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub http: HttpServerConfig,

    /// Path prefix the tool operations are mounted under
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,

    #[serde(default)]
    pub table: TableConfig,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub data_api: DataApiConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[serde(default)]
    pub secret: SecretConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_route_prefix() -> String {
    "/csp-tooling-lambda1".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            http: HttpServerConfig::default(),
            route_prefix: default_route_prefix(),
            table: TableConfig::default(),
            poll: PollConfig::default(),
            data_api: DataApiConfig::default(),
            credentials: CredentialsConfig::default(),
            secret: SecretConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Backing table layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    #[serde(default)]
    pub schema: String,

    #[serde(default)]
    pub table: String,

    #[serde(default = "default_primary_key")]
    pub primary_key: String,

    #[serde(default = "default_liveness_column")]
    pub liveness_column: String,

    #[serde(default = "default_secondary_key")]
    pub secondary_key: String,

    /// Column that must be unique among all rows, checked before create
    #[serde(default)]
    pub unique_key: Option<String>,

    /// String values written as SQL NULL on create (e.g. `"NA"`)
    #[serde(default)]
    pub null_markers: Vec<String>,
}

fn default_primary_key() -> String {
    "s_no".to_string()
}
fn default_liveness_column() -> String {
    "is_display".to_string()
}
fn default_secondary_key() -> String {
    "login".to_string()
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            schema: String::new(),
            table: String::new(),
            primary_key: default_primary_key(),
            liveness_column: default_liveness_column(),
            secondary_key: default_secondary_key(),
            unique_key: None,
            null_markers: Vec::new(),
        }
    }
}

impl TableConfig {
    pub fn layout(&self) -> TableLayout {
        TableLayout {
            schema: self.schema.clone(),
            table: self.table.clone(),
            primary_key: self.primary_key.clone(),
            liveness_column: self.liveness_column.clone(),
            secondary_key: self.secondary_key.clone(),
        }
    }
}

/// Completion polling cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// 0 waits until the statement is terminal
    #[serde(default)]
    pub max_wait_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_wait_ms: 0,
        }
    }
}

impl PollConfig {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy::from_millis(self.interval_ms, self.max_wait_ms)
    }
}

/// Remote statement service client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataApiConfig {
    /// Overrides the regional endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Idle lifetime of the session a create runs its transaction in
    #[serde(default = "default_session_keep_alive_secs")]
    pub session_keep_alive_secs: u32,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_session_keep_alive_secs() -> u32 {
    60
}

/// Longest keep-alive the statement service accepts.
const MAX_SESSION_KEEP_ALIVE_SECS: u32 = 86_400;

impl Default for DataApiConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout_ms: default_request_timeout_ms(),
            session_keep_alive_secs: default_session_keep_alive_secs(),
        }
    }
}

impl DataApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Static credentials; normally supplied through the environment
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub access_key_id: String,

    #[serde(default)]
    pub secret_access_key: String,

    #[serde(default)]
    pub session_token: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: None,
            region: default_region(),
        }
    }
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.to_credentials(), f)
    }
}

impl CredentialsConfig {
    pub fn to_credentials(&self) -> Credentials {
        Credentials {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            session_token: self.session_token.clone(),
            region: self.region.clone(),
        }
    }
}

/// Connection secret
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretConfig {
    /// Secret name
    #[serde(default)]
    pub name: String,

    /// Reference passed to the statement service; defaults to `name`
    #[serde(default)]
    pub arn: String,

    /// Secret string contents: `{"dbClusterIdentifier": ..., "dbname": ...}`
    #[serde(default)]
    pub document: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `compact` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ServiceConfig {
    /// Load from file, apply process environment overrides, validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Same as [`ServiceConfig::load`] with an explicit environment.
    pub fn load_with_env<F>(path: &Path, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut config: ServiceConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.apply_env_overrides(lookup);
        config.validate()?;

        Ok(config)
    }

    /// Deployment environment variables win over the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("SecretId") {
            self.secret.name = v;
        }
        if let Some(v) = get("REDSHIFT_REGION") {
            self.credentials.region = v;
        }
        if let Some(v) = get("SCHEMA_NAME") {
            self.table.schema = v;
        }
        if let Some(v) = get("REDSHIFT_TABLE_NAME") {
            self.table.table = v;
        }
        if let Some(v) = get("TOOLSTORE_DATA_API_ENDPOINT") {
            self.data_api.endpoint = Some(v);
        }
        if let Some(v) = get("AWS_ACCESS_KEY_ID") {
            self.credentials.access_key_id = v;
        }
        if let Some(v) = get("AWS_SECRET_ACCESS_KEY") {
            self.credentials.secret_access_key = v;
        }
        if let Some(v) = get("AWS_SESSION_TOKEN") {
            self.credentials.session_token = Some(v);
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.table.schema.is_empty() {
            return Err(ConfigError::Invalid(
                "table.schema is required (or set SCHEMA_NAME)".to_string(),
            ));
        }
        if self.table.table.is_empty() {
            return Err(ConfigError::Invalid(
                "table.table is required (or set REDSHIFT_TABLE_NAME)".to_string(),
            ));
        }

        let mut identifiers = vec![
            ("table.schema", &self.table.schema),
            ("table.table", &self.table.table),
            ("table.primary_key", &self.table.primary_key),
            ("table.liveness_column", &self.table.liveness_column),
            ("table.secondary_key", &self.table.secondary_key),
        ];
        if let Some(unique_key) = &self.table.unique_key {
            identifiers.push(("table.unique_key", unique_key));
        }
        for (field, value) in identifiers {
            if !is_valid_identifier(value) {
                return Err(ConfigError::Invalid(format!(
                    "{} '{}' is not a valid SQL identifier",
                    field, value
                )));
            }
        }

        if self.poll.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll.interval_ms must be > 0".to_string(),
            ));
        }

        if self.data_api.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "data_api.request_timeout_ms must be > 0".to_string(),
            ));
        }

        let keep_alive = self.data_api.session_keep_alive_secs;
        if keep_alive == 0 || keep_alive > MAX_SESSION_KEEP_ALIVE_SECS {
            return Err(ConfigError::Invalid(format!(
                "data_api.session_keep_alive_secs must be within 1..={}",
                MAX_SESSION_KEEP_ALIVE_SECS
            )));
        }

        if let Some(endpoint) = &self.data_api.endpoint {
            validate_endpoint(endpoint)?;
        }

        self.http.validate().map_err(ConfigError::Invalid)?;

        if !self.route_prefix.is_empty() && !self.route_prefix.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "route_prefix '{}' must start with '/'",
                self.route_prefix
            )));
        }

        Ok(())
    }
}

/// Endpoint overrides must be absolute http(s) URLs.
fn validate_endpoint(endpoint: &str) -> ConfigResult<()> {
    let invalid = |reason: &str| {
        ConfigError::Invalid(format!("data_api.endpoint '{}': {}", endpoint, reason))
    };
    let uri: Uri = endpoint.parse().map_err(|_| invalid("not a valid URL"))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => return Err(invalid("scheme must be http or https")),
    }
    if uri.authority().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, value: serde_json::Value) -> std::path::PathBuf {
        let path = dir.path().join("toolstore.json");
        fs::write(&path, value.to_string()).unwrap();
        path
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_config_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, json!({"table": {"schema": "tooling", "table": "tools"}}));

        let config = ServiceConfig::load_with_env(&path, no_env).unwrap();
        assert_eq!(config.route_prefix, "/csp-tooling-lambda1");
        assert_eq!(config.table.primary_key, "s_no");
        assert_eq!(config.table.liveness_column, "is_display");
        assert_eq!(config.table.secondary_key, "login");
        assert_eq!(config.table.unique_key, None);
        assert_eq!(config.poll.interval_ms, 1000);
        assert_eq!(config.poll.max_wait_ms, 0);
        assert_eq!(config.poll.policy().max_wait, None);
        assert_eq!(config.credentials.region, "us-east-1");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, json!({"table": {"schema": "a", "table": "b"}}));

        let env: HashMap<&str, &str> = [
            ("SCHEMA_NAME", "tooling"),
            ("REDSHIFT_TABLE_NAME", "tools"),
            ("REDSHIFT_REGION", "eu-west-1"),
            ("SecretId", "tooling/redshift"),
            ("AWS_SESSION_TOKEN", ""),
        ]
        .into_iter()
        .collect();

        let config =
            ServiceConfig::load_with_env(&path, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.table.schema, "tooling");
        assert_eq!(config.table.table, "tools");
        assert_eq!(config.credentials.region, "eu-west-1");
        assert_eq!(config.secret.name, "tooling/redshift");
        // empty values do not override
        assert_eq!(config.credentials.session_token, None);
        assert_eq!(config.data_api.endpoint, None);
    }

    #[test]
    fn test_default_matches_empty_file() {
        let config = ServiceConfig::default();
        assert_eq!(config.route_prefix, "/csp-tooling-lambda1");
        assert_eq!(config.data_api.request_timeout_ms, 30_000);
        assert_eq!(config.poll.interval_ms, 1000);
    }

    #[test]
    fn test_missing_table_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, json!({}));
        let err = ServiceConfig::load_with_env(&path, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_identifier_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            json!({"table": {"schema": "tooling", "table": "tools; DROP TABLE x"}}),
        );
        let err = ServiceConfig::load_with_env(&path, no_env).unwrap_err();
        assert!(err.to_string().contains("not a valid SQL identifier"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            json!({"table": {"schema": "s", "table": "t"}, "poll": {"interval_ms": 0}}),
        );
        assert!(ServiceConfig::load_with_env(&path, no_env).is_err());
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            json!({"table": {"schema": "s", "table": "t"}, "data_api": {"endpoint": "not a url"}}),
        );
        assert!(ServiceConfig::load_with_env(&path, no_env).is_err());

        let path = write_config(
            &dir,
            json!({"table": {"schema": "s", "table": "t"}, "data_api": {"endpoint": "ftp://host"}}),
        );
        assert!(ServiceConfig::load_with_env(&path, no_env).is_err());

        let path = write_config(
            &dir,
            json!({"table": {"schema": "s", "table": "t"},
                   "data_api": {"endpoint": "http://127.0.0.1:4566"}}),
        );
        assert!(ServiceConfig::load_with_env(&path, no_env).is_ok());
    }

    #[test]
    fn test_session_keep_alive_bounds() {
        let dir = TempDir::new().unwrap();
        assert_eq!(ServiceConfig::default().data_api.session_keep_alive_secs, 60);

        for bad in [0u32, 86_401] {
            let path = write_config(
                &dir,
                json!({"table": {"schema": "s", "table": "t"},
                       "data_api": {"session_keep_alive_secs": bad}}),
            );
            let err = ServiceConfig::load_with_env(&path, no_env).unwrap_err();
            assert!(err.to_string().contains("session_keep_alive_secs"));
        }
    }

    #[test]
    fn test_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("toolstore.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ServiceConfig::load_with_env(&path, no_env),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = ServiceConfig::load_with_env(&dir.path().join("absent.json"), no_env)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
