use etl::batch::BatchProcessor;
use etl::credentials::WarehouseCredentials;
use etl::destination::WarehouseConnector;
use etl::destination::postgres::PostgresConnector;
use etl::error::{ErrorKind, EtlError};
use etl::etl_error;
use etl::registry::MappingRegistry;
use etl::upsert::UpsertEngine;
use etl_config::shared::{BridgeConfig, WarehouseConnectionConfig};
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{Instrument, debug, info, info_span};

use crate::error::{BridgeError, BridgeResult};

/// Starts the bridge with the provided configuration.
///
/// Reads newline-delimited invocation payloads from `input`, or stdin when absent, and writes
/// each processed payload to stdout as one JSON line.
pub async fn start_bridge_with_config(
    config: BridgeConfig,
    input: Option<PathBuf>,
) -> BridgeResult<()> {
    info!("starting bridge");

    log_config(&config);

    let mapping_table = config.mapping_table().map_err(BridgeError::config)?;
    let registry = MappingRegistry::from_table(&mapping_table)?;
    let mut source_tables = registry.source_tables().collect::<Vec<_>>();
    source_tables.sort_unstable();
    info!(
        mappings = registry.len(),
        source_tables = %source_tables.join(", "),
        "loaded table mappings"
    );

    let processor = BatchProcessor::new(registry, UpsertEngine::new(config.upsert.mode))
        .with_deadline(config.batch_timeout());

    let credentials = WarehouseCredentials::from_config(&config.warehouse)?;
    let connector = PostgresConnector::new(config.warehouse, credentials);

    let mut stdout = tokio::io::stdout();
    let invocations = match input {
        Some(path) => {
            info!(path = %path.display(), "reading invocations from file");
            let file = tokio::fs::File::open(&path).await?;
            run_invocations(BufReader::new(file), &mut stdout, &processor, &connector).await?
        }
        None => {
            info!("reading invocations from stdin");
            let stdin = tokio::io::stdin();
            run_invocations(BufReader::new(stdin), &mut stdout, &processor, &connector).await?
        }
    };

    info!(invocations, "bridge finished");

    Ok(())
}

/// Processes every invocation read from `reader`, writing each output line to `writer`.
///
/// Stops at the first failed invocation. Blank lines are skipped.
pub async fn run_invocations<R, W, C>(
    reader: R,
    writer: &mut W,
    processor: &BatchProcessor,
    connector: &C,
) -> BridgeResult<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    C: WarehouseConnector,
{
    let mut lines = reader.lines();
    let mut invocations = 0usize;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let input: serde_json::Value = serde_json::from_str(&line).map_err(|err| {
            etl_error!(
                ErrorKind::InvalidPayload,
                "Invocation is not valid JSON",
                err,
                source: err
            )
        })?;

        let span = info_span!("invocation", index = invocations);
        let output = processor.handle(input, connector).instrument(span).await?;

        let mut encoded = serde_json::to_vec(&output).map_err(EtlError::from)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;

        invocations += 1;
    }

    Ok(invocations)
}

fn log_config(config: &BridgeConfig) {
    log_warehouse_config(&config.warehouse);
    debug!(
        mode = ?config.upsert.mode,
        batch_timeout_ms = config.batch_timeout_ms,
        "using upsert config"
    );
}

fn log_warehouse_config(config: &WarehouseConnectionConfig) {
    debug!(
        host = %config.host,
        port = config.port,
        dbname = %config.name,
        username = %config.username,
        credentials_command = config.credentials_command.is_some(),
        tls_enabled = config.tls.enabled,
        "using warehouse config"
    );
}
