//! Warehouse credentials and their refresh.
//!
//! Credentials are either static or temporary. Temporary credentials carry an expiration and
//! are fetched again once fewer than [`REFRESH_MARGIN_SECS`] seconds of validity remain.

use chrono::{DateTime, TimeDelta, Utc};
use etl_config::shared::WarehouseConnectionConfig;
use secrecy::SecretString;
use serde::Deserialize;
use std::future::Future;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;

/// Remaining validity below which credentials are refreshed.
pub const REFRESH_MARGIN_SECS: i64 = 30;

/// A user and password accepted by the warehouse, optionally expiring.
#[derive(Debug, Clone)]
pub struct ClusterCredentials {
    pub user: String,
    pub password: SecretString,
    pub expiration: Option<DateTime<Utc>>,
}

impl ClusterCredentials {
    /// Returns `true` when the credentials expire within the refresh margin of `now`.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.expiration {
            Some(expiration) => expiration - now <= TimeDelta::seconds(REFRESH_MARGIN_SECS),
            None => false,
        }
    }
}

/// Source of fresh [`ClusterCredentials`].
pub trait CredentialsFetcher: Send + Sync {
    fn fetch(&self) -> impl Future<Output = EtlResult<ClusterCredentials>> + Send;
}

/// Credentials taken verbatim from configuration. They never expire.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: ClusterCredentials,
}

impl StaticCredentials {
    pub fn new(user: impl Into<String>, password: SecretString) -> Self {
        Self {
            credentials: ClusterCredentials {
                user: user.into(),
                password,
                expiration: None,
            },
        }
    }
}

impl CredentialsFetcher for StaticCredentials {
    async fn fetch(&self) -> EtlResult<ClusterCredentials> {
        Ok(self.credentials.clone())
    }
}

/// Output expected from a credentials command.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CommandOutput {
    db_user: String,
    db_password: SecretString,
    #[serde(default)]
    expiration: Option<DateTime<Utc>>,
}

/// Temporary credentials printed by an external command as JSON, e.g.
/// `aws redshift get-cluster-credentials --cluster-identifier .. --db-user ..`.
#[derive(Debug, Clone)]
pub struct CommandCredentials {
    program: String,
    args: Vec<String>,
}

impl CommandCredentials {
    /// Creates a fetcher from a program and its arguments.
    pub fn new(argv: &[String]) -> EtlResult<Self> {
        let Some((program, args)) = argv.split_first() else {
            bail!(ErrorKind::ConfigError, "Credentials command is empty");
        };

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl CredentialsFetcher for CommandCredentials {
    async fn fetch(&self) -> EtlResult<ClusterCredentials> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                etl_error!(
                    ErrorKind::CredentialsUnavailable,
                    "Failed to run credentials command",
                    self.program,
                    source: err
                )
            })?;

        if !output.status.success() {
            bail!(
                ErrorKind::CredentialsUnavailable,
                "Credentials command failed",
                format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )
            );
        }

        let parsed: CommandOutput = serde_json::from_slice(&output.stdout).map_err(|err| {
            etl_error!(
                ErrorKind::CredentialsUnavailable,
                "Credentials command printed invalid output",
                err,
                source: err
            )
        })?;

        Ok(ClusterCredentials {
            user: parsed.db_user,
            password: parsed.db_password,
            expiration: parsed.expiration,
        })
    }
}

/// The credential source configured for a warehouse.
#[derive(Debug, Clone)]
pub enum WarehouseCredentials {
    Static(StaticCredentials),
    Command(CommandCredentials),
}

impl WarehouseCredentials {
    /// Picks the credential source from a validated connection config.
    pub fn from_config(config: &WarehouseConnectionConfig) -> EtlResult<Self> {
        match (&config.password, &config.credentials_command) {
            (Some(password), None) => Ok(WarehouseCredentials::Static(StaticCredentials::new(
                config.username.clone(),
                password.clone(),
            ))),
            (None, Some(argv)) => Ok(WarehouseCredentials::Command(CommandCredentials::new(
                argv,
            )?)),
            (Some(_), Some(_)) => bail!(
                ErrorKind::ConfigError,
                "Both a password and a credentials command are configured"
            ),
            (None, None) => bail!(
                ErrorKind::ConfigError,
                "Neither a password nor a credentials command is configured"
            ),
        }
    }
}

impl CredentialsFetcher for WarehouseCredentials {
    async fn fetch(&self) -> EtlResult<ClusterCredentials> {
        match self {
            WarehouseCredentials::Static(fetcher) => fetcher.fetch().await,
            WarehouseCredentials::Command(fetcher) => fetcher.fetch().await,
        }
    }
}

/// Caches credentials across batches, refreshing them before they expire.
#[derive(Debug)]
pub struct CredentialsCache<F> {
    fetcher: F,
    cached: Mutex<Option<ClusterCredentials>>,
}

impl<F> CredentialsCache<F>
where
    F: CredentialsFetcher,
{
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            cached: Mutex::new(None),
        }
    }

    /// Returns credentials valid for at least the refresh margin.
    pub async fn current(&self) -> EtlResult<ClusterCredentials> {
        self.current_at(Utc::now()).await
    }

    /// Like [`CredentialsCache::current`] with an explicit clock reading.
    pub async fn current_at(&self, now: DateTime<Utc>) -> EtlResult<ClusterCredentials> {
        let mut cached = self.cached.lock().await;

        if let Some(credentials) = cached.as_ref() {
            if !credentials.needs_refresh(now) {
                return Ok(credentials.clone());
            }
        }

        let credentials = self.fetcher.fetch().await?;
        info!(
            user = %credentials.user,
            expiration = ?credentials.expiration,
            "fetched warehouse credentials"
        );
        *cached = Some(credentials.clone());

        Ok(credentials)
    }
}
