//! Identifier lookup index.
//!
//! Maps sparse 64-bit ids onto dense positions in a sorted id batch. The
//! hashed variant sizes a table to the configured load factor and resolves
//! collisions through chains held in an arena, new entries going to the
//! chain head so traversal always terminates. When the arena runs out, the
//! affected slot is marked as overflowed and lookups through it fall back to
//! binary search. Without a hashed table every lookup is a binary search.

use log::debug;
use wayfold_core::{EntityId, IngestConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Empty,
    Direct(u32),
    Chained { head: u32, len: u32 },
    Overflow,
}

#[derive(Debug, Clone, Copy)]
struct ChainNode {
    index: u32,
    next: Option<u32>,
}

/// Dense position lookup over a reserved id batch.
///
/// # Examples
///
/// ```
/// use wayfold_core::IngestConfig;
/// use wayfold_store::IdLookupIndex;
///
/// let mut index = IdLookupIndex::new(&IngestConfig::default());
/// index.reserve(&[10, 2_000_000_000, 35]);
/// assert_eq!(index.find(35), Some(1));
/// assert_eq!(index.find(11), None);
/// ```
#[derive(Debug)]
pub struct IdLookupIndex {
    ids: Vec<EntityId>,
    table: Vec<Slot>,
    chains: Vec<ChainNode>,
    max_chain_len: usize,
    hashed_enabled: bool,
    load_percent: usize,
    max_hashed_ids: usize,
    max_collision_nodes: usize,
}

impl IdLookupIndex {
    /// Create an empty index configured from `config`.
    #[must_use]
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            ids: Vec::new(),
            table: Vec::new(),
            chains: Vec::new(),
            max_chain_len: 0,
            hashed_enabled: config.hashed_index,
            load_percent: usize::from(config.hash_load_percent.clamp(1, 70)),
            max_hashed_ids: config.max_hashed_ids,
            max_collision_nodes: config.max_collision_nodes,
        }
    }

    /// Replace the indexed batch with `ids`.
    ///
    /// Positions returned by [`IdLookupIndex::find`] refer to the sorted,
    /// de-duplicated batch. Callers normally pass ids already in that form.
    pub fn reserve(&mut self, ids: &[EntityId]) {
        self.ids.clear();
        self.ids.extend_from_slice(ids);
        if !self.ids.is_sorted_by(|a, b| a < b) {
            self.ids.sort_unstable();
            self.ids.dedup();
        }
        self.table.clear();
        self.chains.clear();
        self.max_chain_len = 0;

        let count = self.ids.len();
        if !self.hashed_enabled || count == 0 || count > self.max_hashed_ids {
            if count > self.max_hashed_ids {
                debug!("{count} ids exceed the hashed index limit; using binary search");
            }
            return;
        }
        let Ok(indexable) = u32::try_from(count) else {
            return;
        };
        let table_len = next_prime((count * 100).div_ceil(self.load_percent));
        self.table.resize(table_len, Slot::Empty);
        for position in 0..indexable {
            if let Some(id) = self.ids.get(position as usize).copied() {
                self.insert(id, position);
            }
        }
    }

    fn insert(&mut self, id: EntityId, position: u32) {
        let Some(hash) = self.slot_of(id) else {
            return;
        };
        let Some(current) = self.table.get(hash).copied() else {
            return;
        };
        let updated = match current {
            Slot::Empty => Slot::Direct(position),
            Slot::Direct(existing) => self
                .push_chain(existing, None)
                .and_then(|tail| self.push_chain(position, Some(tail)))
                .map_or(Slot::Overflow, |head| Slot::Chained { head, len: 2 }),
            Slot::Chained { head, len } => self
                .push_chain(position, Some(head))
                .map_or(Slot::Overflow, |new_head| Slot::Chained {
                    head: new_head,
                    len: len + 1,
                }),
            Slot::Overflow => Slot::Overflow,
        };
        if let Slot::Chained { len, .. } = updated {
            self.max_chain_len = self.max_chain_len.max(usize::try_from(len).unwrap_or(usize::MAX));
        }
        if let Some(slot) = self.table.get_mut(hash) {
            *slot = updated;
        }
    }

    fn push_chain(&mut self, index: u32, next: Option<u32>) -> Option<u32> {
        if self.chains.len() >= self.max_collision_nodes {
            return None;
        }
        let handle = u32::try_from(self.chains.len()).ok()?;
        self.chains.push(ChainNode { index, next });
        Some(handle)
    }

    fn slot_of(&self, id: EntityId) -> Option<usize> {
        let len = u64::try_from(self.table.len()).ok()?;
        let hash = id.cast_unsigned().checked_rem(len)?;
        usize::try_from(hash).ok()
    }

    /// Dense position of `id` in the reserved batch.
    #[must_use]
    pub fn find(&self, id: EntityId) -> Option<usize> {
        if self.table.is_empty() {
            return self.binary_search(id);
        }
        match self.table.get(self.slot_of(id)?)? {
            Slot::Empty => None,
            Slot::Direct(position) => self.check(id, *position),
            Slot::Chained { head, .. } => {
                let mut cursor = Some(*head);
                while let Some(handle) = cursor {
                    let node = self.chains.get(usize::try_from(handle).ok()?)?;
                    if let Some(found) = self.check(id, node.index) {
                        return Some(found);
                    }
                    cursor = node.next;
                }
                None
            }
            Slot::Overflow => self.binary_search(id),
        }
    }

    fn check(&self, id: EntityId, position: u32) -> Option<usize> {
        let position = usize::try_from(position).ok()?;
        (self.ids.get(position) == Some(&id)).then_some(position)
    }

    fn binary_search(&self, id: EntityId) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    /// Reserved ids in position order.
    #[must_use]
    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }

    /// Longest collision chain built by the last [`IdLookupIndex::reserve`].
    #[must_use]
    pub const fn max_chain_len(&self) -> usize {
        self.max_chain_len
    }

    /// Whether lookups go through the hashed table.
    #[must_use]
    pub fn is_hashed(&self) -> bool {
        !self.table.is_empty()
    }

    /// Number of slots in the hashed table.
    #[must_use]
    pub fn table_len(&self) -> usize {
        self.table.len()
    }
}

fn next_prime(from: usize) -> usize {
    (from.max(2)..)
        .find(|candidate| is_prime(*candidate))
        .unwrap_or(from)
}

fn is_prime(candidate: usize) -> bool {
    if candidate < 4 {
        return candidate >= 2;
    }
    (2..)
        .take_while(|divisor| divisor * divisor <= candidate)
        .all(|divisor| candidate.checked_rem(divisor).is_some_and(|rem| rem != 0))
}
