//! Validate subcommand: offline manifest check

use clap::Parser;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;

use super::{CliError, OutputFormat};
use crate::manifest::{ManifestError, ManifestReader};
use crate::output::JsonResultWriter;
use crate::EntryKey;

/// Parse a manifest without network access and compare it with published results
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Manifest file to check
    #[arg(long)]
    pub manifest: PathBuf,

    /// Directory holding published results
    #[arg(long, default_value = "userData/raw")]
    pub output_dir: PathBuf,
}

/// What a manifest would do if run now
#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    /// Manifest items, valid or malformed
    pub total_entries: usize,
    /// Entries whose result is already published
    pub published: Vec<EntryKey>,
    /// Entries a run would fetch
    pub pending: Vec<EntryKey>,
    /// Malformed lines: (line number, reason)
    pub malformed: Vec<(usize, String)>,
    /// Repeated entries
    pub duplicates: usize,
}

impl ValidationReport {
    fn print_human(&self) {
        println!("Manifest entries: {}", self.total_entries);
        println!("  Published:  {}", self.published.len());
        println!("  Pending:    {}", self.pending.len());
        println!("  Duplicates: {}", self.duplicates);
        println!("  Malformed:  {}", self.malformed.len());
        for key in &self.pending {
            println!("  [PENDING] {key}");
        }
        for (line, reason) in &self.malformed {
            eprintln!("  [MALFORMED] line {line}: {reason}");
        }
    }
}

impl ValidateArgs {
    /// Build the report without touching the network or the output directory
    pub fn check(&self) -> Result<ValidationReport, CliError> {
        let reader = ManifestReader::open(&self.manifest)?;
        // Listing only; a run may be writing into the same directory.
        let published = JsonResultWriter::published_keys(&self.output_dir)?;

        let mut report = ValidationReport::default();
        let mut seen = HashSet::new();

        for item in reader {
            report.total_entries += 1;
            match item {
                Ok(entry) => {
                    let key = entry.key();
                    if !seen.insert(key.clone()) {
                        report.duplicates += 1;
                    } else if published.contains(&key) {
                        report.published.push(key);
                    } else {
                        report.pending.push(key);
                    }
                }
                Err(ManifestError::MalformedEntry { line, reason }) => {
                    report.malformed.push((line, reason));
                }
                Err(e @ ManifestError::Unreadable { .. }) => return Err(e.into()),
            }
        }

        Ok(report)
    }

    /// Execute the validation command
    ///
    /// # Errors
    /// Fails on an unreadable manifest and when any line is malformed.
    pub async fn execute(&self, output_format: OutputFormat) -> Result<(), CliError> {
        let report = self.check()?;

        match output_format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&report)
                    .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
                println!("{json}");
            }
            OutputFormat::Human => report.print_human(),
        }

        if report.malformed.is_empty() {
            Ok(())
        } else {
            Err(CliError::InvalidArgument(format!(
                "{} malformed manifest line(s) in {}",
                report.malformed.len(),
                self.manifest.display()
            )))
        }
    }
}
