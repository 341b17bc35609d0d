//! Way buffering, classification and storage.
//!
//! Ways arrive with node references only. The [`WayBuffer`] accumulates them
//! in encoded form until a batch is large enough to resolve against the node
//! store in one sorted pass. Resolved ways that relations may still need are
//! kept in a [`WayStore`].

use camino::Utf8PathBuf;
use thiserror::Error;
use wayfold_core::{ConfigError, Coordinate, EntityId, IngestConfig, TagRef, TagRule};

use crate::encoding::CodecError;

pub mod codec;
mod file;
mod sqlite;

pub use codec::{decode_resolved_way, decode_way, encode_resolved_way, encode_way};
pub use file::FileWayStore;
pub use sqlite::SqliteWayStore;

/// A way whose node references are not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WayRecord {
    /// Way identifier.
    pub id: EntityId,
    /// Ordered node references.
    pub node_refs: Vec<EntityId>,
    /// Tags through the dictionary.
    pub tags: Vec<TagRef>,
    /// Whether the way is an area candidate.
    pub is_polygon: bool,
}

/// A way with coordinates for every node that resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWay {
    /// Way identifier.
    pub id: EntityId,
    /// Resolved nodes in way order; dangling references are absent.
    pub nodes: Vec<(EntityId, Coordinate)>,
    /// Tags through the dictionary.
    pub tags: Vec<TagRef>,
    /// Whether the way is an area candidate.
    pub is_polygon: bool,
}

impl ResolvedWay {
    /// First and last node ids, if the way has any nodes.
    #[must_use]
    pub fn endpoints(&self) -> Option<(EntityId, EntityId)> {
        Some((self.nodes.first()?.0, self.nodes.last()?.0))
    }
}

/// Outcome of [`WayBuffer::add_way`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The way was buffered and the batch has room for more.
    Buffered,
    /// The way was buffered and the batch should now be resolved.
    BatchFull,
    /// The way is too large to batch and is handed back for individual
    /// resolution.
    Oversized(WayRecord),
}

/// Limits that make a way too large to batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WayLimits {
    /// Node references accumulated before a batch is full.
    pub max_batch_node_refs: usize,
    /// Largest node list a batched way may have.
    pub max_nodes_per_way: usize,
    /// Largest tag count a batched way may have.
    pub max_tags_per_way: usize,
    /// Largest encoded tag size a batched way may have.
    pub max_tag_bytes_per_way: usize,
}

impl WayLimits {
    /// Limits taken from `config`.
    #[must_use]
    pub const fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_batch_node_refs: config.max_batch_node_refs,
            max_nodes_per_way: config.max_nodes_per_way,
            max_tags_per_way: config.max_tags_per_way,
            max_tag_bytes_per_way: config.max_tag_bytes_per_way,
        }
    }
}

/// Batch of encoded ways awaiting node resolution.
#[derive(Debug)]
pub struct WayBuffer {
    limits: WayLimits,
    bytes: Vec<u8>,
    spans: Vec<(usize, usize)>,
    node_refs: usize,
    scratch: Vec<u8>,
}

impl WayBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub const fn new(limits: WayLimits) -> Self {
        Self {
            limits,
            bytes: Vec::new(),
            spans: Vec::new(),
            node_refs: 0,
            scratch: Vec::new(),
        }
    }

    /// Encode `way` into the batch, or hand it back when it is too large to
    /// batch.
    ///
    /// # Errors
    /// Returns [`CodecError`] when the way cannot be encoded.
    pub fn add_way(&mut self, way: WayRecord) -> Result<AddOutcome, CodecError> {
        let tag_bytes: usize = way.tags.iter().map(inline_tag_bytes).sum();
        if way.node_refs.len() > self.limits.max_nodes_per_way
            || way.tags.len() > self.limits.max_tags_per_way
            || tag_bytes > self.limits.max_tag_bytes_per_way
        {
            return Ok(AddOutcome::Oversized(way));
        }
        self.scratch.clear();
        codec::encode_way(&way, &mut self.scratch)?;
        let start = self.bytes.len();
        self.bytes.extend_from_slice(&self.scratch);
        self.spans.push((start, self.scratch.len()));
        self.node_refs += way.node_refs.len();
        Ok(if self.node_refs >= self.limits.max_batch_node_refs {
            AddOutcome::BatchFull
        } else {
            AddOutcome::Buffered
        })
    }

    /// Number of buffered ways.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Node references across the batch.
    #[must_use]
    pub const fn node_ref_count(&self) -> usize {
        self.node_refs
    }

    /// Bytes held by the batch.
    #[must_use]
    pub fn resident_bytes(&self) -> u64 {
        (self.bytes.capacity() + self.spans.capacity() * std::mem::size_of::<(usize, usize)>())
            as u64
    }

    /// Decode and remove every buffered way, in insertion order.
    ///
    /// # Errors
    /// Returns [`CodecError`] when a buffered record fails to decode.
    pub fn drain(&mut self) -> Result<Vec<WayRecord>, CodecError> {
        let ways = self
            .spans
            .iter()
            .map(|&(start, len)| {
                codec::decode_way(self.bytes.get(start..start + len).unwrap_or_default())
            })
            .collect::<Result<Vec<_>, _>>();
        self.bytes.clear();
        self.spans.clear();
        self.node_refs = 0;
        ways
    }
}

/// String bytes a tag carries inline rather than through the dictionary.
fn inline_tag_bytes(tag: &TagRef) -> usize {
    match tag {
        TagRef::Indexed { .. } => 0,
        TagRef::KeyIndexed { value, .. } => value.len(),
        TagRef::Raw { key, value } => key.len() + value.len(),
    }
}

/// Closed-way classification from configured tag overrides.
///
/// A way is an area candidate when it is closed (first reference equals
/// last), has at least `min_ring_nodes` references, matches no line rule,
/// and matches at least one polygon rule. Line rules take precedence.
#[derive(Debug, Clone)]
pub struct PolygonRules {
    polygons: Vec<TagRule>,
    lines: Vec<TagRule>,
    min_ring_nodes: usize,
}

impl PolygonRules {
    /// Build the rules from `config`.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidTagRule`] for a malformed rule.
    pub fn from_config(config: &IngestConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            polygons: config.polygon_rules()?,
            lines: config.line_rules()?,
            min_ring_nodes: config.min_ring_nodes,
        })
    }

    /// Classify a way from its node references and raw tags.
    #[must_use]
    pub fn is_polygon<'a, I>(&self, node_refs: &[EntityId], tags: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, &'a str)> + Clone,
    {
        let closed = node_refs.len() >= self.min_ring_nodes && node_refs.first() == node_refs.last();
        if !closed {
            return false;
        }
        let matches_any = |rules: &[TagRule]| {
            tags.clone()
                .into_iter()
                .any(|(key, value)| rules.iter().any(|rule| rule.matches(key, value)))
        };
        !matches_any(&self.lines) && matches_any(&self.polygons)
    }
}

/// Storage for resolved ways that relations may reference.
pub trait WayStore {
    /// Store `way`, replacing any earlier way with the same id.
    ///
    /// # Errors
    /// Returns [`WayStoreError`] when the backing medium fails.
    fn put(&mut self, way: &ResolvedWay) -> Result<(), WayStoreError>;

    /// Way with `id`, or `None` when it was never stored.
    ///
    /// # Errors
    /// Returns [`WayStoreError`] when the backing medium fails or the
    /// record does not decode.
    fn get(&mut self, id: EntityId) -> Result<Option<ResolvedWay>, WayStoreError>;

    /// Persist buffered writes and move an oversized in-memory medium to
    /// disk.
    ///
    /// # Errors
    /// Returns [`WayStoreError`] when the backing medium fails.
    fn flush(&mut self) -> Result<(), WayStoreError>;

    /// Persist buffered writes and move the medium to disk unconditionally.
    ///
    /// # Errors
    /// Returns [`WayStoreError`] when the backing medium fails.
    fn spill(&mut self) -> Result<(), WayStoreError>;

    /// Release the store, keeping its scratch file when `retain` is set.
    ///
    /// # Errors
    /// Returns [`WayStoreError`] when the scratch file cannot be kept or
    /// removed.
    fn close(self: Box<Self>, retain: bool) -> Result<Option<Utf8PathBuf>, WayStoreError>;

    /// Number of stored ways.
    fn len(&self) -> usize;

    /// Whether no way is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held in process memory.
    fn resident_bytes(&self) -> u64;
}

/// Errors raised by way store backends.
#[derive(Debug, Error)]
pub enum WayStoreError {
    /// Reading or writing the backing medium failed.
    #[error("way store medium failed during {operation}")]
    Io {
        /// Operation in progress.
        operation: &'static str,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A `SQLite` statement failed.
    #[error("way store SQLite operation {operation} failed")]
    Sqlite {
        /// Operation in progress.
        operation: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// A way could not be encoded for storage.
    #[error("failed to encode way {id}")]
    Encode {
        /// Way identifier.
        id: EntityId,
        /// Encoding failure.
        #[source]
        source: CodecError,
    },
    /// A stored way could not be decoded.
    #[error("corrupt record for way {id}")]
    Corrupt {
        /// Way identifier.
        id: EntityId,
        /// Decoding failure.
        #[source]
        source: CodecError,
    },
}

impl WayStoreError {
    pub(crate) fn io(operation: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Self::Io { operation, source }
    }

    pub(crate) fn sqlite(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Sqlite { operation, source }
    }
}

#[cfg(test)]
mod tests;
