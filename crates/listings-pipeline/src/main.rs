//! Listings pipeline - catalog to object store to warehouse

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use listings_common::logging::{init_logging, LogLevel};
use listings_common::SourceLocation;
use listings_pipeline::config::PipelineConfig;
use listings_pipeline::framework::{BatchReport, PipelineRun};
use listings_pipeline::setup::{self, Components};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "listings-pipeline")]
#[command(author, version, about = "Short-term rental listings pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "LISTINGS_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the dataset locations of regions
    Discover {
        /// Region identifier, e.g. "amsterdam" (repeatable)
        #[arg(short, long = "region", required = true)]
        regions: Vec<String>,
    },

    /// Fetch every dataset of regions into the object store
    Ingest {
        #[arg(short, long = "region", required = true)]
        regions: Vec<String>,
    },

    /// Fetch one dataset into the object store
    IngestOne {
        /// Dataset URL
        url: String,
    },

    /// Load every staged dataset of regions into the warehouse
    Load {
        #[arg(short, long = "region", required = true)]
        regions: Vec<String>,
    },

    /// Load one staged dataset into the warehouse
    LoadOne {
        /// Dataset URL
        url: String,
    },
}

impl Command {
    fn components(&self) -> Components {
        match self {
            Command::Discover { .. } => Components::default(),
            Command::Ingest { .. } | Command::IngestOne { .. } => Components {
                ingest: true,
                load: false,
            },
            Command::Load { .. } | Command::LoadOne { .. } => Components {
                ingest: false,
                load: true,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let mut log_config = config.logging.clone();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    // LOG_* variables take precedence
    let log_config = log_config.merge_env()?;
    let _guard = init_logging(&log_config)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted: no new datasets will start");
            interrupt.cancel();
        }
    });

    let orchestrator = setup::orchestrator(&config, cli.command.components(), cancel)
        .await
        .context("Failed to initialize pipeline")?;

    match cli.command {
        Command::Discover { regions } => {
            let mut discovery = orchestrator.discover(&regions).await;
            for warning in discovery.take_warnings() {
                warn!("{}", warning);
            }
            for location in discovery {
                println!("{location}");
            }
        }
        Command::Ingest { regions } => {
            let report = orchestrator.ingest(&regions).await?;
            print_report(&report, cli.json)?;
        }
        Command::IngestOne { url } => {
            let run = orchestrator.ingest_one(&SourceLocation::new(url)).await?;
            print_run(&run, cli.json)?;
        }
        Command::Load { regions } => {
            let report = orchestrator.load_regions(&regions).await?;
            print_report(&report, cli.json)?;
        }
        Command::LoadOne { url } => {
            let run = orchestrator.load(&SourceLocation::new(url)).await?;
            print_run(&run, cli.json)?;
        }
    }

    info!("Done");
    Ok(())
}

fn print_report(report: &BatchReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "{} succeeded, {} failed, {} skipped",
        report.succeeded(),
        report.failed(),
        report.skipped.len()
    );
    for run in report.failures() {
        if let Some(err) = &run.error {
            println!("  ✗ {} [{}] {}", run.label(), err.kind, err.message);
        }
    }
    for warning in &report.discovery_warnings {
        println!("  ! [{}] {}", warning.kind, warning.message);
    }
    Ok(())
}

fn print_run(run: &PipelineRun, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(run)?);
        return Ok(());
    }

    for task in &run.tasks {
        println!("  {} ({} attempts): {:?}", task.step, task.attempts, task.outcome);
    }
    match &run.error {
        None => println!("✓ {}", run.label()),
        Some(err) => println!("✗ {} [{}] {}", run.label(), err.kind, err.message),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_subcommands_select_their_pipelines() {
        let load = Components { ingest: false, load: true };
        let cases = [
            (vec!["discover", "-r", "amsterdam"], Components::default()),
            (vec!["ingest", "--region", "amsterdam", "--region", "madrid"], Components { ingest: true, load: false }),
            (vec!["ingest-one", "http://data.example/nl/listings.csv.gz"], Components { ingest: true, load: false }),
            (vec!["load", "-r", "madrid"], load),
            (vec!["load-one", "http://data.example/nl/listings.csv.gz", "--json"], load),
        ];

        for (args, expected) in cases {
            let cli = Cli::try_parse_from(std::iter::once("listings-pipeline").chain(args.clone())).unwrap();
            assert_eq!(cli.command.components(), expected, "{args:?}");
        }
    }

    #[test]
    fn test_region_commands_require_a_region() {
        assert!(Cli::try_parse_from(["listings-pipeline", "ingest"]).is_err());
        assert!(Cli::try_parse_from(["listings-pipeline", "load"]).is_err());
    }
}
