//! OSM PBF decoder adapter.
//!
//! Wraps an `osmpbf` blob reader so that each call to
//! [`EntitySource::next_chunk`] decodes exactly one file block. Dense nodes
//! inside a block are delivered as one batch; ways and relations are
//! forwarded one at a time.

use std::{
    io::{self, BufReader, Read},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs_utf8::File;
use geo::{Coord, Rect};
use log::debug;
use osmpbf::{BlobReader, BlobType, Element, RelMemberType};
use wayfold_core::{EntityKind, Member, NodeNotice, RelationNotice, Tag, WayNotice};

use crate::source::{EntitySink, EntitySource, Progress, SourceError};

/// Reader that counts the bytes passing through it.
struct CountingReader<R> {
    inner: R,
    consumed: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.consumed.fetch_add(read as u64, Ordering::Relaxed);
        Ok(read)
    }
}

type Blobs = BlobReader<CountingReader<BufReader<File>>>;

/// [`EntitySource`] reading an `.osm.pbf` file.
///
/// # Examples
/// ```no_run
/// use camino::Utf8Path;
/// use wayfold_core::IngestConfig;
/// use wayfold_ingest::{IngestController, PbfSource};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let source = PbfSource::open(Utf8Path::new("berlin.osm.pbf"))?;
/// let mut controller = IngestController::new(source, IngestConfig::default())?;
/// while controller.next_any_feature()?.is_some() {}
/// # Ok(())
/// # }
/// ```
pub struct PbfSource {
    path: Utf8PathBuf,
    blobs: Blobs,
    consumed: Arc<AtomicU64>,
    len: u64,
}

impl std::fmt::Debug for PbfSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PbfSource")
            .field("path", &self.path)
            .field("consumed", &self.consumed.load(Ordering::Relaxed))
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl PbfSource {
    /// Open the file at `path`.
    ///
    /// # Errors
    /// Returns [`SourceError::Io`] when the file cannot be opened.
    pub fn open(path: &Utf8Path) -> Result<Self, SourceError> {
        let consumed = Arc::new(AtomicU64::new(0));
        let (blobs, len) = open_blobs(path, &consumed)?;
        Ok(Self {
            path: path.to_path_buf(),
            blobs,
            consumed,
            len,
        })
    }

    /// Path of the input file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn decode_error(&self, source: osmpbf::Error) -> SourceError {
        SourceError::Decode {
            path: self.path.clone(),
            source,
        }
    }
}

fn open_blobs(path: &Utf8Path, consumed: &Arc<AtomicU64>) -> Result<(Blobs, u64), SourceError> {
    let io_error = |source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = wayfold_fs::open_utf8_file(path).map_err(io_error)?;
    let len = file.metadata().map_err(io_error)?.len();
    consumed.store(0, Ordering::Relaxed);
    let reader = CountingReader {
        inner: BufReader::new(file),
        consumed: Arc::clone(consumed),
    };
    Ok((BlobReader::new(reader), len))
}

impl EntitySource for PbfSource {
    fn next_chunk(&mut self, sink: &mut dyn EntitySink) -> Result<bool, SourceError> {
        let Some(blob) = self.blobs.next() else {
            return Ok(false);
        };
        let blob = blob.map_err(|source| self.decode_error(source))?;
        match blob.get_type() {
            BlobType::OsmHeader => {
                let header = blob
                    .to_headerblock()
                    .map_err(|source| self.decode_error(source))?;
                if let Some(bbox) = header.bbox() {
                    sink.notify_bounds(Rect::new(
                        Coord {
                            x: bbox.left,
                            y: bbox.bottom,
                        },
                        Coord {
                            x: bbox.right,
                            y: bbox.top,
                        },
                    ));
                }
            }
            BlobType::OsmData => {
                let block = blob
                    .to_primitiveblock()
                    .map_err(|source| self.decode_error(source))?;
                forward_block(&block, sink);
            }
            BlobType::Unknown(kind) => debug!("skipping unknown blob type {kind:?}"),
        }
        Ok(true)
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        let (blobs, len) = open_blobs(&self.path, &self.consumed)?;
        self.blobs = blobs;
        self.len = len;
        Ok(())
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.len)
    }

    fn progress(&self) -> Progress {
        Progress {
            consumed: self.consumed.load(Ordering::Relaxed),
            total: Some(self.len),
        }
    }
}

fn forward_block(block: &osmpbf::PrimitiveBlock, sink: &mut dyn EntitySink) {
    let mut nodes = Vec::new();
    for element in block.elements() {
        match element {
            Element::Node(node) => nodes.push(NodeNotice {
                id: node.id(),
                lon: node.lon(),
                lat: node.lat(),
                tags: collect_tags(node.tags()),
            }),
            Element::DenseNode(node) => nodes.push(NodeNotice {
                id: node.id(),
                lon: node.lon(),
                lat: node.lat(),
                tags: collect_tags(node.tags()),
            }),
            Element::Way(way) => {
                flush_nodes(&mut nodes, sink);
                sink.notify_way(&WayNotice {
                    id: way.id(),
                    node_refs: way.refs().collect(),
                    tags: collect_tags(way.tags()),
                });
            }
            Element::Relation(relation) => {
                flush_nodes(&mut nodes, sink);
                let members = relation
                    .members()
                    .map(|member| Member {
                        kind: match member.member_type {
                            RelMemberType::Node => EntityKind::Node,
                            RelMemberType::Way => EntityKind::Way,
                            RelMemberType::Relation => EntityKind::Relation,
                        },
                        id: member.member_id,
                        role: member.role().unwrap_or_default().to_owned(),
                    })
                    .collect();
                sink.notify_relation(&RelationNotice {
                    id: relation.id(),
                    members,
                    tags: collect_tags(relation.tags()),
                });
            }
        }
    }
    flush_nodes(&mut nodes, sink);
}

fn flush_nodes(nodes: &mut Vec<NodeNotice>, sink: &mut dyn EntitySink) {
    if !nodes.is_empty() {
        sink.notify_nodes(nodes);
        nodes.clear();
    }
}

fn collect_tags<'a>(tags: impl Iterator<Item = (&'a str, &'a str)>) -> Vec<Tag> {
    tags.map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}
