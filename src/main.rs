//! Main entry point for the amplitude-events-downloader CLI

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;
use amplitude_events_downloader::cli::{Cli, Commands};
use amplitude_events_downloader::shutdown::ShutdownCoordinator;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("amplitude_events_downloader=info"));

    // Logs go to stderr so `--output-format json` keeps stdout parseable.
    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    // Credentials may live in a local .env file
    let _ = dotenvy::dotenv();

    init_tracing();

    let cli = Cli::parse();

    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - finishing in-flight pages...");
                shutdown.request_shutdown();
            }
        }
    });

    let result: anyhow::Result<bool> = match cli.command {
        Commands::Run(ref args) => args
            .execute(cli.output_format, shutdown.clone())
            .await
            .map(|summary| summary.is_aborted())
            .map_err(anyhow::Error::from),
        Commands::Validate(ref args) => args
            .execute(cli.output_format)
            .await
            .map(|()| false)
            .map_err(anyhow::Error::from),
    };

    match result {
        Ok(false) => {}
        Ok(true) => std::process::exit(1),
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
