//! Warehouse sessions over the Postgres wire protocol, as spoken by Redshift.

use etl_config::shared::WarehouseConnectionConfig;
use rustls::ClientConfig;
use secrecy::ExposeSecret;
use std::io::BufReader;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Connection, NoTls, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, debug, error, info, warn};

use crate::credentials::{CredentialsCache, CredentialsFetcher};
use crate::destination::{Statement, WarehouseConnector, WarehouseSession};
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;

/// Spawns a background task driving a warehouse connection until it terminates.
fn spawn_warehouse_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        match connection.await {
            Err(err) => error!("an error occurred during the warehouse connection: {}", err),
            Ok(()) => debug!("warehouse connection terminated"),
        }
    }
    .instrument(span);

    // Dropping the `Client` terminates the connection, so the handle is not tracked.
    tokio::spawn(task);
}

/// Builds the rustls configuration trusting the given PEM certificates.
fn build_tls_config(trusted_root_certs: &str) -> EtlResult<ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    let mut root_certs_reader = BufReader::new(trusted_root_certs.as_bytes());
    for cert in rustls_pemfile::certs(&mut root_certs_reader) {
        let cert = cert?;
        root_store.add(cert)?;
    }

    if root_store.is_empty() {
        return Err(etl_error!(
            ErrorKind::EncryptionError,
            "No trusted root certificates were found"
        ));
    }

    Ok(ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

/// Opens warehouse sessions using cached credentials.
#[derive(Debug)]
pub struct PostgresConnector<F> {
    config: WarehouseConnectionConfig,
    credentials: CredentialsCache<F>,
}

impl<F> PostgresConnector<F>
where
    F: CredentialsFetcher,
{
    pub fn new(config: WarehouseConnectionConfig, fetcher: F) -> Self {
        Self {
            config,
            credentials: CredentialsCache::new(fetcher),
        }
    }
}

impl<F> WarehouseConnector for PostgresConnector<F>
where
    F: CredentialsFetcher,
{
    type Session = PostgresSession;

    async fn connect(&self) -> EtlResult<PostgresSession> {
        let credentials = self.credentials.current().await?;
        let options = self
            .config
            .connect_options(&credentials.user, credentials.password.expose_secret());

        let client = if self.config.tls.enabled {
            let tls_config = build_tls_config(&self.config.tls.trusted_root_certs)?;
            let (client, connection) = options.connect(MakeRustlsConnect::new(tls_config)).await?;
            spawn_warehouse_connection::<MakeRustlsConnect>(connection);
            client
        } else {
            let (client, connection) = options.connect(NoTls).await?;
            spawn_warehouse_connection::<NoTls>(connection);
            client
        };

        info!(
            host = %self.config.host,
            database = %self.config.name,
            user = %credentials.user,
            tls = self.config.tls.enabled,
            "connected to warehouse"
        );

        Ok(PostgresSession {
            client,
            in_transaction: false,
        })
    }
}

/// A single warehouse connection used for one batch.
pub struct PostgresSession {
    client: Client,
    in_transaction: bool,
}

fn bind_params(statement: &Statement) -> Vec<&(dyn ToSql + Sync)> {
    statement
        .params()
        .iter()
        .map(|param| param as &(dyn ToSql + Sync))
        .collect()
}

impl WarehouseSession for PostgresSession {
    async fn exists(&mut self, statement: &Statement) -> EtlResult<bool> {
        let params = bind_params(statement);
        let rows = self.client.query(statement.sql(), &params).await?;

        Ok(!rows.is_empty())
    }

    async fn execute(&mut self, statement: &Statement) -> EtlResult<u64> {
        let params = bind_params(statement);
        let affected = self.client.execute(statement.sql(), &params).await?;

        Ok(affected)
    }

    async fn begin(&mut self) -> EtlResult<()> {
        if self.in_transaction {
            return Err(etl_error!(
                ErrorKind::InvalidState,
                "A warehouse transaction is already open"
            ));
        }

        self.client.batch_execute("BEGIN").await.map_err(|err| {
            etl_error!(
                ErrorKind::DestinationTransactionFailed,
                "Failed to begin warehouse transaction",
                err,
                source: err
            )
        })?;
        self.in_transaction = true;

        Ok(())
    }

    async fn commit(&mut self) -> EtlResult<()> {
        self.in_transaction = false;
        self.client.batch_execute("COMMIT").await.map_err(|err| {
            etl_error!(
                ErrorKind::DestinationTransactionFailed,
                "Failed to commit warehouse transaction",
                err,
                source: err
            )
        })
    }

    async fn rollback(&mut self) -> EtlResult<()> {
        self.in_transaction = false;
        self.client.batch_execute("ROLLBACK").await.map_err(|err| {
            etl_error!(
                ErrorKind::DestinationTransactionFailed,
                "Failed to roll back warehouse transaction",
                err,
                source: err
            )
        })
    }

    async fn release(mut self) -> EtlResult<()> {
        if self.in_transaction && !self.client.is_closed() {
            warn!("rolling back open warehouse transaction on release");
            self.rollback().await?;
        }

        Ok(())
    }
}
