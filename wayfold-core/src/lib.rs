//! Core domain types for the Wayfold streaming ingestion engine.
//!
//! Responsibilities:
//! - Define entity identifiers, fixed-point coordinates and the notification
//!   records a decoder hands to the ingestion controller.
//! - Deduplicate tag strings through the [`TagDictionary`].
//! - Describe the configuration surface shared by the store and ingest crates.
//!
//! Boundaries:
//! - No I/O lives here; backing stores are in `wayfold-store`.
//! - No wire-format decoding; decoders only produce the records defined in
//!   [`entity`].

#![forbid(unsafe_code)]

pub mod config;
pub mod coord;
pub mod entity;
pub mod feature;
pub mod summary;
pub mod tags;

pub use config::{
    BackendChoice, ConfigError, IngestConfig, ParseBackendError, ReadingMode, TagRule,
};
pub use coord::{COORDINATE_SCALE, Coordinate};
pub use entity::{EntityId, EntityKind, Member, NodeNotice, RelationNotice, Tag, WayNotice};
pub use feature::{Feature, Layer, ParseLayerError};
pub use summary::{IngestSummary, LayerCounts};
pub use tags::{KeyId, TagDictionary, TagRef, ValueId};
