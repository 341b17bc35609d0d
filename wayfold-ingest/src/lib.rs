//! Streaming ingestion for the Wayfold engine.
//!
//! Responsibilities:
//! - Pull decoded entities from an [`EntitySource`] one chunk at a time.
//! - Route nodes, ways and relations through the working-set stores in
//!   `wayfold-store` and assemble them into layered [`Feature`]s.
//! - Report progress, honour cancellation and keep memory under the
//!   configured ceiling by flushing to scratch files.
//!
//! Boundaries:
//! - Sources only decode; they never touch the stores.
//! - Per-entity defects are counted in the summary, never raised.
//!
//! [`Feature`]: wayfold_core::Feature

#![forbid(unsafe_code)]

mod controller;
mod error;
#[cfg(feature = "pbf")]
mod pbf;
pub mod relation;
mod source;

pub use controller::{IngestController, IngestReport, Phase, StopHandle};
pub use error::IngestError;
#[cfg(feature = "pbf")]
pub use pbf::PbfSource;
pub use relation::{
    RelationResolver, Resolution, ResolveError, RingAssembly, assemble_rings, relation_layer,
};
#[cfg(any(test, feature = "test-support"))]
pub use source::MemorySource;
pub use source::{EntitySink, EntitySource, Progress, SourceError};
