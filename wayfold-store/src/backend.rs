//! Storage backend selection.
//!
//! The backend is chosen once, before any data is consumed, and both stores
//! of a pass share it.

use log::debug;
use thiserror::Error;
use wayfold_core::{BackendChoice, IngestConfig};
use wayfold_fs::ScratchSpace;

use crate::node::{BackendKind, NodeStore, NodeStoreError, PagedNodeStore, SqliteNodeStore};
use crate::way::{FileWayStore, SqliteWayStore, WayStore, WayStoreError};

/// Node and way stores for one ingestion pass.
pub struct StorageBackend {
    /// Coordinate store.
    pub nodes: Box<dyn NodeStore>,
    /// Resolved way store.
    pub ways: Box<dyn WayStore>,
    /// Backend both stores use.
    pub kind: BackendKind,
}

impl std::fmt::Debug for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBackend")
            .field("kind", &self.kind)
            .field("nodes", &self.nodes.stats())
            .field("ways", &self.ways.len())
            .finish()
    }
}

/// Errors raised while opening a storage backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The node store could not be created.
    #[error("failed to open node store")]
    Nodes(#[from] NodeStoreError),
    /// The way store could not be created.
    #[error("failed to open way store")]
    Ways(#[from] WayStoreError),
}

/// Resolve the configured choice into a concrete backend.
#[must_use]
pub const fn resolve_backend(config: &IngestConfig) -> BackendKind {
    match config.backend {
        BackendChoice::Paged => BackendKind::Paged,
        BackendChoice::Relational => BackendKind::Relational,
        BackendChoice::Auto if config.custom_indexing => BackendKind::Paged,
        BackendChoice::Auto => BackendKind::Relational,
    }
}

/// Open the node and way stores for a pass.
///
/// Stores start in memory unless `size_hint` says the input is at least
/// `max_in_memory_bytes` large.
///
/// # Errors
/// Returns [`BackendError`] when either store cannot be created.
pub fn open_backend(
    config: &IngestConfig,
    scratch: &ScratchSpace,
    size_hint: Option<u64>,
) -> Result<StorageBackend, BackendError> {
    let kind = resolve_backend(config);
    let in_memory = size_hint.is_none_or(|bytes| bytes < config.max_in_memory_bytes);
    debug!("opening {kind:?} backend (in memory: {in_memory})");
    let (nodes, ways): (Box<dyn NodeStore>, Box<dyn WayStore>) = match kind {
        BackendKind::Paged => (
            Box::new(PagedNodeStore::new(config, scratch.clone(), in_memory)?),
            Box::new(FileWayStore::new(config, scratch.clone(), in_memory)?),
        ),
        BackendKind::Relational => (
            Box::new(SqliteNodeStore::new(config, scratch.clone(), in_memory)?),
            Box::new(SqliteWayStore::new(config, scratch.clone(), in_memory)?),
        ),
    };
    Ok(StorageBackend { nodes, ways, kind })
}
