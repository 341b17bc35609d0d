//! Facade crate for the Wayfold streaming ingestion engine.
//!
//! This crate re-exports the core domain types, the working-set stores and
//! the ingestion controller. The PBF decoder sits behind the `pbf` feature.

#![forbid(unsafe_code)]

pub use wayfold_core::{
    BackendChoice, ConfigError, Coordinate, EntityId, EntityKind, Feature, IngestConfig,
    IngestSummary, Layer, LayerCounts, Member, NodeNotice, ReadingMode, RelationNotice, Tag,
    TagDictionary, TagRule, WayNotice,
};

pub use wayfold_store::{
    BackendError, IdLookupIndex, NodeStore, NodeStoreError, StorageBackend, WayBuffer, WayStore,
    WayStoreError, open_backend,
};

pub use wayfold_ingest::{
    EntitySink, EntitySource, IngestController, IngestError, IngestReport, Phase, Progress,
    RelationResolver, SourceError, StopHandle,
};

#[cfg(feature = "pbf")]
pub use wayfold_ingest::PbfSource;

#[cfg(feature = "test-support")]
pub use wayfold_ingest::MemorySource;
