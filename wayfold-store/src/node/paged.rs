//! Bucketed node store on an append-only medium.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use log::debug;
use wayfold_core::{Coordinate, EntityId, IngestConfig};
use wayfold_fs::ScratchSpace;

use super::bucket::{
    ActiveBucket, BucketPage, RAW_SLOT_BYTES, SectorCoords, bit_position, decode_raw_slot,
    decode_sector,
};
use super::{BackendKind, NodeStore, NodeStoreError, NodeStoreStats};
use crate::medium::Medium;

#[derive(Debug)]
struct CachedSector {
    bucket: i64,
    segment: usize,
    sector: u32,
    coords: Box<SectorCoords>,
}

/// Node store partitioning ids into fixed-capacity buckets.
///
/// Ids map to bucket `id.div_euclid(capacity)` and slot
/// `id.rem_euclid(capacity)`. Writes fill the single active bucket in
/// memory; moving to another bucket, or flushing, seals it onto the medium.
/// Writing to a bucket that was already sealed starts a new segment for it,
/// and lookups consult the newest segment first, so out-of-order ids cost
/// space but never correctness.
///
/// # Examples
///
/// ```
/// use wayfold_core::{Coordinate, IngestConfig};
/// use wayfold_fs::ScratchSpace;
/// use wayfold_store::{NodeStore, PagedNodeStore};
///
/// let scratch = ScratchSpace::new(None).expect("scratch space");
/// let mut store =
///     PagedNodeStore::new(&IngestConfig::default(), scratch, true).expect("open store");
/// store.put(42, Coordinate::from_fixed(1, 2)).expect("put");
/// assert_eq!(store.get(42).expect("get"), Some(Coordinate::from_fixed(1, 2)));
/// assert_eq!(store.get(43).expect("get"), None);
/// ```
#[derive(Debug)]
pub struct PagedNodeStore {
    capacity: i64,
    raw_fill_percent: u8,
    medium: Medium,
    active: ActiveBucket,
    pages: BTreeMap<i64, Vec<BucketPage>>,
    page_bytes: u64,
    cache: Option<CachedSector>,
    nodes: u64,
    raw_buckets: u64,
    compressed_buckets: u64,
}

impl PagedNodeStore {
    /// Open a store whose medium starts in memory when `in_memory` is set.
    ///
    /// # Errors
    /// Returns [`NodeStoreError::Io`] when the scratch file cannot be
    /// created.
    pub fn new(
        config: &IngestConfig,
        scratch: ScratchSpace,
        in_memory: bool,
    ) -> Result<Self, NodeStoreError> {
        let medium = Medium::new(scratch, "nodes-", in_memory, config.max_in_memory_bytes)
            .map_err(NodeStoreError::io("create node medium"))?;
        let capacity = usize::try_from(config.bucket_capacity).unwrap_or(usize::MAX);
        Ok(Self {
            capacity: i64::from(config.bucket_capacity),
            raw_fill_percent: config.raw_fill_percent,
            medium,
            active: ActiveBucket::new(0, capacity),
            pages: BTreeMap::new(),
            page_bytes: 0,
            cache: None,
            nodes: 0,
            raw_buckets: 0,
            compressed_buckets: 0,
        })
    }

    fn locate(&self, id: EntityId) -> (i64, usize) {
        let bucket = id.div_euclid(self.capacity);
        let slot = usize::try_from(id.rem_euclid(self.capacity)).unwrap_or_default();
        (bucket, slot)
    }

    fn seal_active(&mut self) -> Result<(), NodeStoreError> {
        if self.active.is_empty() {
            return Ok(());
        }
        let page = self
            .active
            .seal(self.raw_fill_percent, &mut self.medium)
            .map_err(NodeStoreError::io("seal bucket"))?;
        if page.is_raw() {
            self.raw_buckets += 1;
        } else {
            self.compressed_buckets += 1;
        }
        self.page_bytes += page.resident_bytes();
        let bucket = self.active.bucket;
        self.pages.entry(bucket).or_default().push(page);
        self.active.reset(bucket);
        Ok(())
    }
}

impl NodeStore for PagedNodeStore {
    fn put(&mut self, id: EntityId, coord: Coordinate) -> Result<(), NodeStoreError> {
        let (bucket, slot) = self.locate(id);
        if bucket != self.active.bucket {
            self.seal_active()?;
            self.active.reset(bucket);
        }
        self.active.set(slot, coord);
        self.nodes += 1;
        Ok(())
    }

    fn get(&mut self, id: EntityId) -> Result<Option<Coordinate>, NodeStoreError> {
        let (bucket, slot) = self.locate(id);
        if bucket == self.active.bucket {
            if let Some(coord) = self.active.get(slot) {
                return Ok(Some(coord));
            }
        }
        let Some(segments) = self.pages.get(&bucket) else {
            return Ok(None);
        };
        for (segment, page) in segments.iter().enumerate().rev() {
            let lookup = PageLookup {
                bucket,
                segment,
                slot,
            };
            let found = lookup
                .read(page, &mut self.medium, &mut self.cache)
                .map_err(|err| match err {
                    LookupError::Io(source) => NodeStoreError::Io {
                        operation: "read bucket",
                        source,
                    },
                    LookupError::Codec(source) => NodeStoreError::CorruptPage { bucket, source },
                })?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    fn flush(&mut self) -> Result<(), NodeStoreError> {
        self.seal_active()?;
        if self.medium.exceeds_memory_allowance() {
            debug!("node medium exceeded its in-memory allowance");
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<(), NodeStoreError> {
        self.seal_active()?;
        self.medium
            .spill()
            .map_err(NodeStoreError::io("spill node medium"))
    }

    fn close(self: Box<Self>, retain: bool) -> Result<Option<Utf8PathBuf>, NodeStoreError> {
        self.medium
            .close(retain)
            .map_err(NodeStoreError::io("close node medium"))
    }

    fn stats(&self) -> NodeStoreStats {
        NodeStoreStats {
            nodes: self.nodes,
            resident_bytes: self.medium.resident_bytes()
                + self.active.resident_bytes()
                + self.page_bytes,
            on_disk: self.medium.is_on_disk(),
            raw_buckets: self.raw_buckets,
            compressed_buckets: self.compressed_buckets,
        }
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Paged
    }
}

enum LookupError {
    Io(std::io::Error),
    Codec(crate::encoding::CodecError),
}

struct PageLookup {
    bucket: i64,
    segment: usize,
    slot: usize,
}

impl PageLookup {
    fn read(
        &self,
        page: &BucketPage,
        medium: &mut Medium,
        cache: &mut Option<CachedSector>,
    ) -> Result<Option<Coordinate>, LookupError> {
        match page {
            BucketPage::Raw { offset, presence } => {
                let (word, bit) = bit_position(self.slot);
                if presence.get(word).is_none_or(|mask| mask & bit == 0) {
                    return Ok(None);
                }
                let mut buf = [0_u8; RAW_SLOT_BYTES];
                let at = offset + (self.slot * RAW_SLOT_BYTES) as u64;
                medium.read_at(at, &mut buf).map_err(LookupError::Io)?;
                decode_raw_slot(&buf).map(Some).map_err(LookupError::Codec)
            }
            BucketPage::Sectors { entries } => {
                let sector = u32::try_from(self.slot >> 6).unwrap_or(u32::MAX);
                let Ok(position) = entries.binary_search_by_key(&sector, |entry| entry.index)
                else {
                    return Ok(None);
                };
                let in_sector = self.slot & 63;
                if let Some(cached) = cache.as_ref().filter(|cached| {
                    cached.bucket == self.bucket
                        && cached.segment == self.segment
                        && cached.sector == sector
                }) {
                    return Ok(cached.coords.get(in_sector).copied().flatten());
                }
                let Some(entry) = entries.get(position) else {
                    return Ok(None);
                };
                let mut buf = vec![0_u8; usize::try_from(entry.len).unwrap_or_default()];
                medium
                    .read_at(entry.offset, &mut buf)
                    .map_err(LookupError::Io)?;
                let coords = decode_sector(&buf).map_err(LookupError::Codec)?;
                let found = coords.get(in_sector).copied().flatten();
                *cache = Some(CachedSector {
                    bucket: self.bucket,
                    segment: self.segment,
                    sector,
                    coords,
                });
                Ok(found)
            }
        }
    }
}
