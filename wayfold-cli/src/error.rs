//! Error types emitted by the Wayfold CLI.
//!
//! Keep this error type reasonably small, as CLI helpers return
//! `Result<_, CliError>` and the workspace enables `clippy::result_large_err`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;
use wayfold_core::ConfigError;
use wayfold_ingest::IngestError;

/// Errors emitted by the Wayfold CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        /// Flag name without dashes.
        field: &'static str,
        /// Environment variable that can supply the value.
        env: &'static str,
    },
    /// A referenced input path does not exist on disk.
    #[error("{field} path {path:?} does not exist")]
    MissingSourceFile {
        /// Flag naming the input.
        field: &'static str,
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// A referenced input path exists but is not a file.
    #[error("{field} path {path:?} exists but is not a file")]
    SourcePathNotFile {
        /// Flag naming the input.
        field: &'static str,
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// A referenced input path could not be inspected due to an IO error.
    #[error("failed to inspect {field} path {path:?}: {source}")]
    InspectSourcePath {
        /// Flag naming the input.
        field: &'static str,
        /// Offending path.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// The memory ceiling does not fit in bytes.
    #[error("memory ceiling of {megabytes} MiB is too large")]
    MemoryCeilingOverflow {
        /// Requested ceiling.
        megabytes: u64,
    },
    /// The merged engine configuration was rejected.
    #[error("invalid ingestion settings: {0}")]
    InvalidSettings(#[from] ConfigError),
    /// The ingestion pass failed.
    #[error("failed to ingest {path:?}: {source}")]
    Ingest {
        /// Input file.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: Box<IngestError>,
    },
    /// Serializing the summary failed.
    #[error("failed to serialize ingestion summary: {0}")]
    SerializeSummary(#[source] serde_json::Error),
    /// Writing the summary failed.
    #[error("failed to write ingestion summary: {0}")]
    WriteSummary(#[source] std::io::Error),
}
