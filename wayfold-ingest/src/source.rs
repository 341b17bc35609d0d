//! Boundary between a decoder and the ingestion controller.
//!
//! A decoder implements [`EntitySource`] and pushes already-parsed records
//! into an [`EntitySink`], one chunk per call. The controller owns the sink
//! and never sees the wire format.

use camino::Utf8PathBuf;
use geo::Rect;
use thiserror::Error;
use wayfold_core::{NodeNotice, RelationNotice, WayNotice};

/// Receiver of decoded entities.
pub trait EntitySink {
    /// The dataset header declared a bounding box.
    fn notify_bounds(&mut self, bounds: Rect<f64>);

    /// A batch of nodes was decoded.
    fn notify_nodes(&mut self, nodes: &[NodeNotice]);

    /// A way was decoded.
    fn notify_way(&mut self, way: &WayNotice);

    /// A relation was decoded.
    fn notify_relation(&mut self, relation: &RelationNotice);
}

/// How far a source has got through its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Units consumed so far.
    pub consumed: u64,
    /// Total units, when known.
    pub total: Option<u64>,
}

/// Producer of decoded entities, read one chunk at a time.
pub trait EntitySource {
    /// Decode the next chunk into `sink`. Returns `false` once the input is
    /// exhausted and nothing was delivered.
    ///
    /// # Errors
    /// Returns [`SourceError`] when the input cannot be read or decoded.
    fn next_chunk(&mut self, sink: &mut dyn EntitySink) -> Result<bool, SourceError>;

    /// Restart from the beginning of the input.
    ///
    /// # Errors
    /// Returns [`SourceError`] when the input cannot be reopened.
    fn rewind(&mut self) -> Result<(), SourceError>;

    /// Size of the input in bytes, when known.
    fn size_hint(&self) -> Option<u64>;

    /// Position within the input.
    fn progress(&self) -> Progress;
}

/// Errors raised by entity sources.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The input could not be opened or read.
    #[error("failed to read input at {path}")]
    Io {
        /// Input path.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The input is not valid OSM PBF data.
    #[cfg(feature = "pbf")]
    #[error("failed to decode OSM PBF data at {path}")]
    Decode {
        /// Input path.
        path: Utf8PathBuf,
        /// Decoder failure.
        #[source]
        source: osmpbf::Error,
    },
}

#[cfg(any(test, feature = "test-support"))]
pub use memory::MemorySource;

#[cfg(any(test, feature = "test-support"))]
mod memory {
    use super::{EntitySink, EntitySource, Progress, SourceError};
    use geo::Rect;
    use wayfold_core::{NodeNotice, RelationNotice, WayNotice};

    #[derive(Debug, Clone)]
    enum Item {
        Bounds(Rect<f64>),
        Nodes(Vec<NodeNotice>),
        Way(WayNotice),
        Relation(RelationNotice),
    }

    /// In-memory source replaying a scripted entity stream.
    ///
    /// Each call to [`EntitySource::next_chunk`] delivers up to
    /// `chunk_size` items, where a node batch counts as one item.
    ///
    /// # Examples
    ///
    /// ```
    /// use wayfold_core::{NodeNotice, WayNotice};
    /// use wayfold_ingest::MemorySource;
    ///
    /// let source = MemorySource::new()
    ///     .nodes(vec![NodeNotice::new(1, 0.0, 0.0), NodeNotice::new(2, 1.0, 0.0)])
    ///     .way(WayNotice::new(10, vec![1, 2]).with_tag("highway", "path"));
    /// assert_eq!(source.len(), 2);
    /// ```
    #[derive(Debug, Clone)]
    pub struct MemorySource {
        items: Vec<Item>,
        cursor: usize,
        chunk_size: usize,
        rewinds: usize,
    }

    impl Default for MemorySource {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MemorySource {
        /// Create an empty source delivering one item per chunk.
        #[must_use]
        pub const fn new() -> Self {
            Self {
                items: Vec::new(),
                cursor: 0,
                chunk_size: 1,
                rewinds: 0,
            }
        }

        /// Deliver up to `size` items per chunk.
        #[must_use]
        pub fn chunk_size(mut self, size: usize) -> Self {
            self.chunk_size = size.max(1);
            self
        }

        /// Append a header bounding box.
        #[must_use]
        pub fn bounds(mut self, bounds: Rect<f64>) -> Self {
            self.items.push(Item::Bounds(bounds));
            self
        }

        /// Append a node batch.
        #[must_use]
        pub fn nodes(mut self, nodes: Vec<NodeNotice>) -> Self {
            self.items.push(Item::Nodes(nodes));
            self
        }

        /// Append a way.
        #[must_use]
        pub fn way(mut self, way: WayNotice) -> Self {
            self.items.push(Item::Way(way));
            self
        }

        /// Append a relation.
        #[must_use]
        pub fn relation(mut self, relation: RelationNotice) -> Self {
            self.items.push(Item::Relation(relation));
            self
        }

        /// Number of scripted items.
        #[must_use]
        pub fn len(&self) -> usize {
            self.items.len()
        }

        /// Whether nothing is scripted.
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.items.is_empty()
        }

        /// How many times the source has been rewound.
        #[must_use]
        pub const fn rewinds(&self) -> usize {
            self.rewinds
        }
    }

    impl EntitySource for MemorySource {
        fn next_chunk(&mut self, sink: &mut dyn EntitySink) -> Result<bool, SourceError> {
            let end = self.cursor.saturating_add(self.chunk_size).min(self.items.len());
            let Some(chunk) = self.items.get(self.cursor..end) else {
                return Ok(false);
            };
            if chunk.is_empty() {
                return Ok(false);
            }
            for item in chunk {
                match item {
                    Item::Bounds(bounds) => sink.notify_bounds(*bounds),
                    Item::Nodes(nodes) => sink.notify_nodes(nodes),
                    Item::Way(way) => sink.notify_way(way),
                    Item::Relation(relation) => sink.notify_relation(relation),
                }
            }
            self.cursor = end;
            Ok(true)
        }

        fn rewind(&mut self) -> Result<(), SourceError> {
            self.cursor = 0;
            self.rewinds += 1;
            Ok(())
        }

        fn size_hint(&self) -> Option<u64> {
            None
        }

        fn progress(&self) -> Progress {
            Progress {
                consumed: self.cursor as u64,
                total: Some(self.items.len() as u64),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use rstest::rstest;

        #[derive(Default)]
        struct Counts {
            nodes: usize,
            ways: usize,
        }

        impl EntitySink for Counts {
            fn notify_bounds(&mut self, _bounds: Rect<f64>) {}

            fn notify_nodes(&mut self, nodes: &[NodeNotice]) {
                self.nodes += nodes.len();
            }

            fn notify_way(&mut self, _way: &WayNotice) {
                self.ways += 1;
            }

            fn notify_relation(&mut self, _relation: &RelationNotice) {}
        }

        #[rstest]
        fn rewind_replays_the_script() {
            let mut source = MemorySource::new()
                .nodes(vec![NodeNotice::new(1, 0.0, 0.0)])
                .way(WayNotice::new(10, vec![1, 1]));
            assert!(!source.is_empty());
            assert_eq!(source.len(), 2);

            let mut sink = Counts::default();
            while source.next_chunk(&mut sink).expect("chunk") {}
            source.rewind().expect("rewind");
            while source.next_chunk(&mut sink).expect("chunk") {}

            assert_eq!(source.rewinds(), 1);
            assert_eq!((sink.nodes, sink.ways), (2, 2));
        }

        #[rstest]
        fn empty_script_delivers_nothing() {
            let mut source = MemorySource::new();
            assert!(source.is_empty());
            assert!(!source.next_chunk(&mut Counts::default()).expect("chunk"));
        }
    }
}
