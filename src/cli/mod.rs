//! CLI command implementations

pub mod error;
pub mod run;
pub mod validate;

use clap::{Parser, Subcommand};
use std::str::FromStr;

pub use error::CliError;
pub use run::RunArgs;
pub use validate::ValidateArgs;

/// Amplitude user event extractor
#[derive(Parser, Debug)]
#[command(name = "amplitude-events-downloader")]
#[command(about = "Export per-user Amplitude events for the ranges listed in a manifest", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch, aggregate and publish every manifest entry
    Run(RunArgs),

    /// Check a manifest offline and show which entries are already published
    Validate(ValidateArgs),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}
