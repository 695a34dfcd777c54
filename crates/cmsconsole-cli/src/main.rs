//! cmsconsole - a command-line admin console for a content-management API.
//!
//! Logs in, keeps the session alive across calls and issues authenticated
//! CRUD requests and file uploads.

mod commands;

use std::io;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cmsconsole_core::Config;

use commands::Cli;

/// Log file name prefix in the cache directory
const LOG_FILE_PREFIX: &str = "cmsconsole.log";

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug). Logs go
/// to stderr and, when a log directory is available, to a daily file there.
/// The returned guard must stay alive for the file writer to flush.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(ref url) = cli.base_url {
        config.base_url = url.clone();
    }

    let log_dir = config.cache_dir().ok();
    if let Some(ref dir) = log_dir {
        let _ = std::fs::create_dir_all(dir);
    }
    let _guard = init_tracing(log_dir.as_deref());
    info!(base_url = %config.base_url, "cmsconsole starting");

    let result = commands::run(cli.command, config).await;

    info!("cmsconsole shutting down");
    result
}
