//! # Credentials and connection parameters
//!
//! Ephemeral credentials and the connection secret are acquired once per
//! invocation and then passed unchanged through every statement. How they
//! are obtained is a collaborator concern; this module defines the seams
//! and static implementations fed from configuration.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::observability::Event;

/// Result type for credential operations
pub type CredentialResult<T> = Result<T, CredentialError>;

#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    #[error("credentials unavailable: {0}")]
    Unavailable(String),

    #[error("secret '{0}' was not found")]
    SecretNotFound(String),

    #[error("secret '{name}' is malformed: {reason}")]
    MalformedSecret { name: String, reason: String },
}

/// Temporary access credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("region", &self.region)
            .finish()
    }
}

/// Where statements run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSecret {
    pub cluster_id: String,
    pub database: String,
    /// Reference the statement service uses to authenticate to the database.
    pub secret_ref: String,
}

/// Everything one invocation needs to talk to the statement service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub credentials: Credentials,
    pub secret: ConnectionSecret,
}

impl ConnectionContext {
    pub fn cluster_id(&self) -> &str {
        &self.secret.cluster_id
    }

    pub fn database(&self) -> &str {
        &self.secret.database
    }

    pub fn secret_ref(&self) -> &str {
        &self.secret.secret_ref
    }

    pub fn region(&self) -> &str {
        &self.credentials.region
    }
}

/// Produces ephemeral credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire(&self) -> CredentialResult<Credentials>;
}

/// Produces connection parameters for a named secret
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, name: &str, credentials: &Credentials)
        -> CredentialResult<ConnectionSecret>;
}

/// Hands out a fixed set of credentials
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credentials: Credentials,
}

impl StaticCredentialProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn acquire(&self) -> CredentialResult<Credentials> {
        if self.credentials.access_key_id.is_empty() {
            return Err(CredentialError::Unavailable(
                "no access key configured".to_string(),
            ));
        }
        Ok(self.credentials.clone())
    }
}

/// Secret document layout: the database fields of a cluster secret.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretDocument {
    pub db_cluster_identifier: String,
    pub dbname: String,
}

/// Resolves exactly one configured secret
#[derive(Debug, Clone)]
pub struct StaticSecretResolver {
    name: String,
    secret_ref: String,
    document: serde_json::Value,
}

impl StaticSecretResolver {
    /// `document` is the secret string's JSON
    /// (`{"dbClusterIdentifier": ..., "dbname": ...}`).
    pub fn new(
        name: impl Into<String>,
        secret_ref: impl Into<String>,
        document: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            secret_ref: secret_ref.into(),
            document,
        }
    }
}

#[async_trait]
impl SecretResolver for StaticSecretResolver {
    async fn resolve(
        &self,
        name: &str,
        _credentials: &Credentials,
    ) -> CredentialResult<ConnectionSecret> {
        if name != self.name {
            return Err(CredentialError::SecretNotFound(name.to_string()));
        }

        let document: SecretDocument = serde_json::from_value(self.document.clone())
            .map_err(|e| CredentialError::MalformedSecret {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        // An unset reference falls back to the secret name itself.
        let secret_ref = if self.secret_ref.is_empty() {
            name.to_string()
        } else {
            self.secret_ref.clone()
        };

        Ok(ConnectionSecret {
            cluster_id: document.db_cluster_identifier,
            database: document.dbname,
            secret_ref,
        })
    }
}

/// Builds a [`ConnectionContext`] from the two collaborators.
#[derive(Clone)]
pub struct Connector {
    credentials: Arc<dyn CredentialProvider>,
    secrets: Arc<dyn SecretResolver>,
    secret_name: String,
}

impl Connector {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        secrets: Arc<dyn SecretResolver>,
        secret_name: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            secrets,
            secret_name: secret_name.into(),
        }
    }

    pub async fn connect(&self) -> CredentialResult<ConnectionContext> {
        let credentials = self.credentials.acquire().await?;
        let secret = self.secrets.resolve(&self.secret_name, &credentials).await?;

        debug!(
            event = Event::ConnectionResolved.as_str(),
            cluster_id = %secret.cluster_id,
            database = %secret.database,
            region = %credentials.region,
            "connection resolved"
        );

        Ok(ConnectionContext {
            credentials,
            secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn credentials() -> Credentials {
        Credentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI".to_string(),
            session_token: Some("FwoGZXIvYXdz".to_string()),
            region: "us-east-1".to_string(),
        }
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let text = format!("{:?}", credentials());
        assert!(text.contains("AKIDEXAMPLE"));
        assert!(!text.contains("wJalrXUtnFEMI"));
        assert!(!text.contains("FwoGZXIvYXdz"));
    }

    #[tokio::test]
    async fn test_connect_resolves_secret() {
        let connector = Connector::new(
            Arc::new(StaticCredentialProvider::new(credentials())),
            Arc::new(StaticSecretResolver::new(
                "tooling/redshift",
                "arn:aws:secretsmanager:us-east-1:1:secret:tooling",
                json!({"dbClusterIdentifier": "tooling-cluster", "dbname": "dev"}),
            )),
            "tooling/redshift",
        );

        let conn = connector.connect().await.unwrap();
        assert_eq!(conn.cluster_id(), "tooling-cluster");
        assert_eq!(conn.database(), "dev");
        assert_eq!(
            conn.secret_ref(),
            "arn:aws:secretsmanager:us-east-1:1:secret:tooling"
        );
    }

    #[tokio::test]
    async fn test_unknown_secret() {
        let resolver = StaticSecretResolver::new("a", "", json!({}));
        let err = resolver.resolve("b", &credentials()).await.unwrap_err();
        assert!(matches!(err, CredentialError::SecretNotFound(name) if name == "b"));
    }

    #[tokio::test]
    async fn test_malformed_secret() {
        let resolver = StaticSecretResolver::new("a", "", json!({"dbname": "dev"}));
        let err = resolver.resolve("a", &credentials()).await.unwrap_err();
        assert!(matches!(err, CredentialError::MalformedSecret { .. }));
    }

    #[tokio::test]
    async fn test_missing_access_key() {
        let mut creds = credentials();
        creds.access_key_id.clear();
        let provider = StaticCredentialProvider::new(creds);
        assert!(provider.acquire().await.is_err());
    }
}
