use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;
use tokio_postgres::{Config as TokioPgConnectOptions, config::SslMode as TokioPgSslMode};

use crate::shared::ValidationError;

/// Default port of a Redshift cluster.
pub const DEFAULT_WAREHOUSE_PORT: u16 = 5439;

/// Application name reported to the warehouse for every session.
pub const WAREHOUSE_APPLICATION_NAME: &str = "etl_bridge";

/// Timeout for establishing a warehouse connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

fn default_port() -> u16 {
    DEFAULT_WAREHOUSE_PORT
}

/// Connection target and authentication for the warehouse.
///
/// Authentication is either a static `password` or a `credentials_command` producing
/// temporary credentials; exactly one must be configured. The user that actually connects is
/// the one returned with the credentials, which for temporary credentials may differ from
/// [`WarehouseConnectionConfig::username`].
///
/// This intentionally does not implement `Serialize` to avoid leaking the password.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WarehouseConnectionConfig {
    /// Hostname of the warehouse endpoint.
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name.
    pub name: String,
    /// Database user.
    pub username: String,
    /// Static password, redacted in debug output.
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Program and arguments printing temporary credentials as JSON
    /// (`{"DbUser": .., "DbPassword": .., "Expiration": ..}`).
    #[serde(default)]
    pub credentials_command: Option<Vec<String>>,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl WarehouseConnectionConfig {
    /// Validates TLS settings and that exactly one credential source is configured.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.tls.validate()?;

        match (&self.password, &self.credentials_command) {
            (None, None) => Err(ValidationError::MissingCredentials),
            (Some(_), Some(_)) => Err(ValidationError::ConflictingCredentials),
            (None, Some(command)) if command.first().is_none_or(|program| program.is_empty()) => {
                Err(ValidationError::EmptyCredentialsCommand)
            }
            _ => Ok(()),
        }
    }

    /// Builds tokio-postgres connect options for the given credentials.
    pub fn connect_options(&self, user: &str, password: &str) -> TokioPgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            TokioPgSslMode::Require
        } else {
            TokioPgSslMode::Prefer
        };

        let mut config = TokioPgConnectOptions::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.name)
            .user(user)
            .password(password)
            .application_name(WAREHOUSE_APPLICATION_NAME)
            .connect_timeout(CONNECT_TIMEOUT)
            .ssl_mode(ssl_mode);

        config
    }
}

/// TLS settings for warehouse connections.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    #[serde(default)]
    pub trusted_root_certs: String,
    #[serde(default)]
    pub enabled: bool,
}

impl TlsConfig {
    /// Rejects an enabled TLS config without trusted root certificates.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}
