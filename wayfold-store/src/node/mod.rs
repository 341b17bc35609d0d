//! Node coordinate store.
//!
//! Coordinates are written once during the nodes phase and read randomly
//! while ways are resolved. Two interchangeable backends implement
//! [`NodeStore`]: the bucketed [`PagedNodeStore`] and the `SQLite`-backed
//! [`SqliteNodeStore`].
//!
//! A lookup miss is not an error. It means the reference dangles, and the
//! caller decides how to degrade.

use camino::Utf8PathBuf;
use thiserror::Error;
use wayfold_core::{Coordinate, EntityId};

use crate::encoding::CodecError;

mod bucket;
mod paged;
mod sqlite;

pub use paged::PagedNodeStore;
pub use sqlite::SqliteNodeStore;

/// Which storage strategy backs a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Custom bucketed pages on an append-only medium.
    Paged,
    /// Embedded `SQLite` database.
    Relational,
}

/// Size and shape of a node store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeStoreStats {
    /// Coordinates accepted by `put`.
    pub nodes: u64,
    /// Bytes held in process memory.
    pub resident_bytes: u64,
    /// Whether the backing medium has moved to disk.
    pub on_disk: bool,
    /// Buckets sealed as raw arrays.
    pub raw_buckets: u64,
    /// Buckets sealed as compressed sectors.
    pub compressed_buckets: u64,
}

/// Write-once, read-many mapping from node id to coordinate.
pub trait NodeStore {
    /// Record the coordinate of `id`. A repeated id replaces the earlier
    /// coordinate.
    ///
    /// # Errors
    /// Returns [`NodeStoreError`] when the backing medium fails.
    fn put(&mut self, id: EntityId, coord: Coordinate) -> Result<(), NodeStoreError>;

    /// Coordinate of `id`, or `None` when it was never stored.
    ///
    /// # Errors
    /// Returns [`NodeStoreError`] when the backing medium fails.
    fn get(&mut self, id: EntityId) -> Result<Option<Coordinate>, NodeStoreError>;

    /// Look up every id in `ids`, writing one entry per id into `out`.
    ///
    /// `out` is cleared first. Callers pass sorted ids to benefit from bucket
    /// locality.
    ///
    /// # Errors
    /// Returns [`NodeStoreError`] when the backing medium fails.
    fn get_many(
        &mut self,
        ids: &[EntityId],
        out: &mut Vec<Option<Coordinate>>,
    ) -> Result<(), NodeStoreError> {
        out.clear();
        out.reserve(ids.len());
        for id in ids {
            out.push(self.get(*id)?);
        }
        Ok(())
    }

    /// Persist buffered writes and move an oversized in-memory medium to
    /// disk.
    ///
    /// # Errors
    /// Returns [`NodeStoreError`] when the backing medium fails.
    fn flush(&mut self) -> Result<(), NodeStoreError>;

    /// Persist buffered writes and move the medium to disk unconditionally.
    ///
    /// # Errors
    /// Returns [`NodeStoreError`] when the backing medium fails.
    fn spill(&mut self) -> Result<(), NodeStoreError>;

    /// Release the store. When `retain` is set the scratch file is kept and
    /// its path returned.
    ///
    /// # Errors
    /// Returns [`NodeStoreError`] when the scratch file cannot be kept or
    /// removed.
    fn close(self: Box<Self>, retain: bool) -> Result<Option<Utf8PathBuf>, NodeStoreError>;

    /// Current size and shape.
    fn stats(&self) -> NodeStoreStats;

    /// Backend implementing this store.
    fn kind(&self) -> BackendKind;
}

/// Errors raised by node store backends.
#[derive(Debug, Error)]
pub enum NodeStoreError {
    /// Reading or writing the backing medium failed.
    #[error("node store medium failed during {operation}")]
    Io {
        /// Operation in progress.
        operation: &'static str,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A `SQLite` statement failed.
    #[error("node store SQLite operation {operation} failed")]
    Sqlite {
        /// Operation in progress.
        operation: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// A stored page could not be decoded.
    #[error("corrupt node page in bucket {bucket}")]
    CorruptPage {
        /// Bucket holding the page.
        bucket: i64,
        /// Decoding failure.
        #[source]
        source: CodecError,
    },
}

impl NodeStoreError {
    pub(crate) fn io(operation: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Self::Io { operation, source }
    }

    pub(crate) fn sqlite(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Sqlite { operation, source }
    }
}

#[cfg(test)]
mod tests;
