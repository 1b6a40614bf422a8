//! Bridge binary.
//!
//! Replicates change-record invocations into the warehouse: loads configuration, initializes
//! tracing, then processes newline-delimited invocation payloads and echoes each one back on
//! success.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Once;
use tracing::error;

use crate::config::load_bridge_config;
use crate::core::start_bridge_with_config;
use crate::error::{BridgeError, BridgeResult};
use etl_telemetry::tracing::init_tracing;

mod config;
mod core;
mod error;

/// Ensures the crypto provider is only installed once.
static INIT_CRYPTO: Once = Once::new();

/// Installs the AWS LC provider as the default rustls crypto provider.
fn install_crypto_provider() {
    INIT_CRYPTO.call_once(|| {
        // Fails only when a provider is already installed, which is fine.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// Replicates change-record invocations into a relational warehouse.
#[derive(Parser, Debug)]
#[command(name = "etl-bridge")]
#[command(about = "Replicates change-record invocations into a relational warehouse")]
struct Args {
    /// File with newline-delimited invocation payloads (default: stdin)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Configuration directory (default: ./configuration)
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

fn run() -> BridgeResult<()> {
    install_crypto_provider();

    let args = Args::parse();
    let config = load_bridge_config(args.config_dir.as_deref())?;

    // Logs go to stderr, stdout carries the processed invocations.
    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(BridgeError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config, args.input))
}

async fn async_main(
    config: etl_config::shared::BridgeConfig,
    input: Option<PathBuf>,
) -> BridgeResult<()> {
    if let Err(err) = start_bridge_with_config(config, input).await {
        error!("{err}");
        return Err(err);
    }

    Ok(())
}
