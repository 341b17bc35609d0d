//! Error types for the ingestion pass.

use camino::Utf8PathBuf;
use thiserror::Error;
use wayfold_core::ConfigError;
use wayfold_store::{BackendError, CodecError, NodeStoreError, WayStoreError};

use crate::relation::ResolveError;
use crate::source::SourceError;

/// Errors that stop an ingestion pass.
///
/// Per-entity problems such as dangling references are never reported
/// here; they are counted in the pass summary instead.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The configuration was rejected before any data was read.
    #[error("invalid ingestion configuration")]
    Config(#[from] ConfigError),
    /// The scratch directory could not be prepared.
    #[error("failed to prepare scratch directory {dir:?}")]
    Scratch {
        /// Requested directory, or `None` for the system default.
        dir: Option<Utf8PathBuf>,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The storage backend could not be opened.
    #[error("failed to open storage backend")]
    Backend(#[from] BackendError),
    /// The node store failed.
    #[error("node store failed")]
    Nodes(#[from] NodeStoreError),
    /// The way store failed.
    #[error("way store failed")]
    Ways(#[from] WayStoreError),
    /// A buffered way batch could not be decoded.
    #[error("buffered way batch is corrupt")]
    Codec(#[from] CodecError),
    /// A relation could not be resolved.
    #[error("relation resolution failed")]
    Resolve(#[from] ResolveError),
    /// The entity source failed.
    #[error("entity source failed")]
    Source(#[from] SourceError),
    /// The pass was stopped before it finished.
    #[error("ingestion was cancelled")]
    Cancelled,
    /// The stores of the pass have already been released.
    #[error("ingestion pass is closed; reset reading to start a new pass")]
    Closed,
}
