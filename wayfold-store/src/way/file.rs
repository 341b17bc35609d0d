//! Way store on an append-only medium.

use std::collections::HashMap;

use camino::Utf8PathBuf;
use log::debug;
use wayfold_core::{EntityId, IngestConfig};
use wayfold_fs::ScratchSpace;

use super::{ResolvedWay, WayStore, WayStoreError, codec};
use crate::medium::Medium;

/// Resolved ways encoded back to back, located through an in-memory
/// offset table.
#[derive(Debug)]
pub struct FileWayStore {
    medium: Medium,
    offsets: HashMap<EntityId, (u64, usize)>,
    scratch: Vec<u8>,
}

impl FileWayStore {
    /// Open a store whose medium starts in memory when `in_memory` is set.
    ///
    /// # Errors
    /// Returns [`WayStoreError::Io`] when the scratch file cannot be created.
    pub fn new(
        config: &IngestConfig,
        scratch: ScratchSpace,
        in_memory: bool,
    ) -> Result<Self, WayStoreError> {
        let medium = Medium::new(scratch, "ways-", in_memory, config.max_in_memory_bytes)
            .map_err(WayStoreError::io("create way medium"))?;
        Ok(Self {
            medium,
            offsets: HashMap::new(),
            scratch: Vec::new(),
        })
    }
}

impl WayStore for FileWayStore {
    fn put(&mut self, way: &ResolvedWay) -> Result<(), WayStoreError> {
        self.scratch.clear();
        codec::encode_resolved_way(way, &mut self.scratch)
            .map_err(|source| WayStoreError::Encode { id: way.id, source })?;
        let offset = self
            .medium
            .append(&self.scratch)
            .map_err(WayStoreError::io("append way"))?;
        self.offsets.insert(way.id, (offset, self.scratch.len()));
        Ok(())
    }

    fn get(&mut self, id: EntityId) -> Result<Option<ResolvedWay>, WayStoreError> {
        let Some(&(offset, len)) = self.offsets.get(&id) else {
            return Ok(None);
        };
        let mut buf = vec![0_u8; len];
        self.medium
            .read_at(offset, &mut buf)
            .map_err(WayStoreError::io("read way"))?;
        codec::decode_resolved_way(&buf)
            .map(Some)
            .map_err(|source| WayStoreError::Corrupt { id, source })
    }

    fn flush(&mut self) -> Result<(), WayStoreError> {
        if self.medium.exceeds_memory_allowance() {
            debug!("way medium exceeded its in-memory allowance");
            return self.spill();
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<(), WayStoreError> {
        self.medium
            .spill()
            .map_err(WayStoreError::io("spill way medium"))
    }

    fn close(self: Box<Self>, retain: bool) -> Result<Option<Utf8PathBuf>, WayStoreError> {
        self.medium
            .close(retain)
            .map_err(WayStoreError::io("close way medium"))
    }

    fn len(&self) -> usize {
        self.offsets.len()
    }

    fn resident_bytes(&self) -> u64 {
        let table = self.offsets.capacity() * std::mem::size_of::<(EntityId, (u64, usize))>();
        self.medium.resident_bytes() + table as u64
    }
}
