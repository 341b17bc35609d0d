//! Working-set storage for the Wayfold ingestion engine.
//!
//! Responsibilities:
//! - Store node coordinates written during the nodes phase and serve random
//!   lookups while ways resolve ([`NodeStore`]).
//! - Map sparse id batches to dense positions ([`IdLookupIndex`]).
//! - Buffer and encode ways awaiting resolution ([`WayBuffer`]) and keep
//!   resolved ways for relation assembly ([`WayStore`]).
//! - Choose between the paged and relational backends ([`open_backend`]).
//!
//! Everything here is scratch state for a single pass; no layout is stable
//! across processes.

#![forbid(unsafe_code)]

pub mod backend;
mod encoding;
pub mod id_index;
mod medium;
pub mod node;
mod sqlite;
pub mod way;

pub use backend::{BackendError, StorageBackend, open_backend, resolve_backend};
pub use encoding::CodecError;
pub use id_index::IdLookupIndex;
pub use node::{
    BackendKind, NodeStore, NodeStoreError, NodeStoreStats, PagedNodeStore, SqliteNodeStore,
};
pub use way::{
    AddOutcome, FileWayStore, PolygonRules, ResolvedWay, SqliteWayStore, WayBuffer, WayLimits,
    WayRecord, WayStore, WayStoreError,
};
