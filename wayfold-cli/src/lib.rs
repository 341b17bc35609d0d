//! Command-line interface for the Wayfold ingestion engine.
#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

mod error;
mod ingest;

pub use error::CliError;

use ingest::IngestArgs;

const ARG_OSM_PBF: &str = "osm-pbf";
const ARG_BACKEND: &str = "backend";
const ARG_INTERLEAVED: &str = "interleaved";
const ARG_SCRATCH_DIR: &str = "scratch-dir";
const ARG_RETAIN_SCRATCH: &str = "retain-scratch";
const ARG_MEMORY_CEILING_MB: &str = "memory-ceiling-mb";
const ENV_OSM_PBF: &str = "WAYFOLD_CMDS_INGEST_OSM_PBF";

/// Run the Wayfold CLI with the current process arguments and environment.
///
/// # Errors
/// Returns [`CliError`] when arguments are invalid or the command fails.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    init_logging(cli.verbose);
    match cli.command {
        Command::Ingest(args) => ingest::run_ingest(args),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .try_init();
    if installed.is_err() {
        log::debug!("a global subscriber is already installed");
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "wayfold",
    about = "Stream OpenStreetMap extracts into layered geometries",
    version
)]
struct Cli {
    /// Log progress at info level (`RUST_LOG` overrides).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest an OSM PBF file and print the pass summary as JSON.
    Ingest(IngestArgs),
}

#[cfg(test)]
mod tests;
