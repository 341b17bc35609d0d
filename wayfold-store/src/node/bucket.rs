//! Bucket pages of the paged node store.
//!
//! A bucket covers `capacity` consecutive ids. While the nodes phase writes
//! into it, the bucket lives in memory as an [`ActiveBucket`]. Sealing writes
//! it to the medium in one of two layouts:
//!
//! - raw: a presence bitmap kept in memory plus `capacity` fixed 8-byte
//!   slots on the medium, giving O(1) offsets;
//! - sectors: only the 64-id sectors holding at least one node are written,
//!   each as a presence mask followed by varint coordinate deltas.

use std::io;

use bincode::Options;
use serde::{Deserialize, Serialize};
use wayfold_core::Coordinate;

use crate::encoding::{CodecError, decode, encode_into, fixed_component, fixed_options};
use crate::medium::Medium;

/// Ids per sector.
pub(super) const SECTOR_SIZE: usize = 64;
/// Bytes per raw coordinate slot.
pub(super) const RAW_SLOT_BYTES: usize = 8;

/// Decoded contents of one sector.
pub(super) type SectorCoords = [Option<Coordinate>; SECTOR_SIZE];

/// Encoded form of one sector.
#[derive(Serialize, Deserialize)]
struct SectorWire {
    mask: u64,
    deltas: Vec<(i64, i64)>,
}

/// Location of an encoded sector on the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct SectorEntry {
    pub(super) index: u32,
    pub(super) offset: u64,
    pub(super) len: u32,
}

/// A sealed, immutable bucket page.
#[derive(Debug)]
pub(super) enum BucketPage {
    Raw { offset: u64, presence: Box<[u64]> },
    Sectors { entries: Vec<SectorEntry> },
}

impl BucketPage {
    pub(super) const fn is_raw(&self) -> bool {
        matches!(self, Self::Raw { .. })
    }

    /// Bytes this page keeps in process memory.
    pub(super) fn resident_bytes(&self) -> u64 {
        let bytes = match self {
            Self::Raw { presence, .. } => std::mem::size_of_val(&**presence),
            Self::Sectors { entries } => entries.len() * std::mem::size_of::<SectorEntry>(),
        };
        bytes as u64
    }
}

/// Split a slot into its presence word and bit.
pub(super) const fn bit_position(slot: usize) -> (usize, u64) {
    (slot >> 6, 1_u64 << (slot & 63))
}

/// In-memory bucket accepting writes.
#[derive(Debug)]
pub(super) struct ActiveBucket {
    pub(super) bucket: i64,
    coords: Vec<Coordinate>,
    presence: Vec<u64>,
    filled: usize,
}

impl ActiveBucket {
    pub(super) fn new(bucket: i64, capacity: usize) -> Self {
        Self {
            bucket,
            coords: vec![Coordinate::default(); capacity],
            presence: vec![0; capacity >> 6],
            filled: 0,
        }
    }

    /// Clear the bucket for reuse under a new bucket number.
    pub(super) fn reset(&mut self, bucket: i64) {
        self.bucket = bucket;
        self.presence.fill(0);
        self.filled = 0;
    }

    pub(super) const fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub(super) fn resident_bytes(&self) -> u64 {
        (std::mem::size_of_val(self.coords.as_slice())
            + std::mem::size_of_val(self.presence.as_slice())) as u64
    }

    pub(super) fn set(&mut self, slot: usize, coord: Coordinate) {
        let (word, bit) = bit_position(slot);
        let (Some(mask), Some(target)) = (self.presence.get_mut(word), self.coords.get_mut(slot))
        else {
            return;
        };
        if *mask & bit == 0 {
            *mask |= bit;
            self.filled += 1;
        }
        *target = coord;
    }

    pub(super) fn get(&self, slot: usize) -> Option<Coordinate> {
        let (word, bit) = bit_position(slot);
        let mask = self.presence.get(word)?;
        if mask & bit == 0 {
            return None;
        }
        self.coords.get(slot).copied()
    }

    /// Write the bucket to `medium`, choosing the raw layout when at least
    /// `raw_fill_percent` of its slots are filled.
    pub(super) fn seal(&self, raw_fill_percent: u8, medium: &mut Medium) -> io::Result<BucketPage> {
        let capacity = self.coords.len();
        if self.filled * 100 >= capacity * usize::from(raw_fill_percent) {
            self.seal_raw(medium)
        } else {
            self.seal_sectors(medium)
        }
    }

    fn seal_raw(&self, medium: &mut Medium) -> io::Result<BucketPage> {
        let mut buf = Vec::with_capacity(self.coords.len() * RAW_SLOT_BYTES);
        for coord in &self.coords {
            fixed_options()
                .serialize_into(&mut buf, coord)
                .map_err(io::Error::other)?;
        }
        let offset = medium.append(&buf)?;
        Ok(BucketPage::Raw {
            offset,
            presence: self.presence.clone().into_boxed_slice(),
        })
    }

    fn seal_sectors(&self, medium: &mut Medium) -> io::Result<BucketPage> {
        let mut buf = Vec::new();
        let mut spans = Vec::new();
        let sectors = self.coords.chunks(SECTOR_SIZE).zip(&self.presence);
        for (index, (coords, &mask)) in sectors.enumerate() {
            if mask == 0 {
                continue;
            }
            let start = buf.len();
            encode_sector(&mut buf, coords, mask).map_err(io::Error::other)?;
            spans.push((index, start, buf.len() - start));
        }
        let base = medium.append(&buf)?;
        let entries = spans
            .into_iter()
            .map(|(index, start, len)| {
                Ok(SectorEntry {
                    index: u32::try_from(index).map_err(io::Error::other)?,
                    offset: base + start as u64,
                    len: u32::try_from(len).map_err(io::Error::other)?,
                })
            })
            .collect::<io::Result<Vec<_>>>()?;
        Ok(BucketPage::Sectors { entries })
    }
}

fn encode_sector(buf: &mut Vec<u8>, coords: &[Coordinate], mask: u64) -> Result<(), CodecError> {
    let (mut prev_lon, mut prev_lat) = (0_i64, 0_i64);
    let deltas = coords
        .iter()
        .enumerate()
        .filter(|(slot, _)| mask & (1_u64 << slot) != 0)
        .map(|(_, coord)| {
            let (lon, lat) = (i64::from(coord.lon), i64::from(coord.lat));
            let delta = (lon - prev_lon, lat - prev_lat);
            (prev_lon, prev_lat) = (lon, lat);
            delta
        })
        .collect();
    encode_into(buf, &SectorWire { mask, deltas })
}

/// Decode one sector written by [`ActiveBucket::seal`].
pub(super) fn decode_sector(bytes: &[u8]) -> Result<Box<SectorCoords>, CodecError> {
    let wire: SectorWire = decode(bytes)?;
    let mut coords = Box::new([None; SECTOR_SIZE]);
    let (mut lon, mut lat) = (0_i64, 0_i64);
    let filled = coords
        .iter_mut()
        .enumerate()
        .filter(|(slot, _)| wire.mask & (1_u64 << slot) != 0);
    for ((_, target), (lon_delta, lat_delta)) in filled.zip(wire.deltas) {
        *target = Some(Coordinate::from_fixed(
            fixed_component(&mut lon, lon_delta)?,
            fixed_component(&mut lat, lat_delta)?,
        ));
    }
    Ok(coords)
}

/// Decode one raw slot.
pub(super) fn decode_raw_slot(bytes: &[u8]) -> Result<Coordinate, CodecError> {
    fixed_options()
        .deserialize(bytes)
        .map_err(|source| CodecError::Decode { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;
    use wayfold_fs::ScratchSpace;

    #[fixture]
    fn medium() -> (TempDir, Medium) {
        let dir = TempDir::new().expect("create temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 path");
        let scratch = ScratchSpace::new(Some(&path)).expect("scratch space");
        let medium = Medium::new(scratch, "bucket-", true, u64::MAX).expect("medium");
        (dir, medium)
    }

    #[rstest]
    fn sparse_bucket_is_compressed(medium: (TempDir, Medium)) {
        let (_dir, mut medium) = medium;
        let mut bucket = ActiveBucket::new(0, 256);
        bucket.set(3, Coordinate::from_fixed(10, -20));
        bucket.set(200, Coordinate::from_fixed(-5, 7));

        let page = bucket.seal(50, &mut medium).expect("seal");
        let BucketPage::Sectors { entries } = page else {
            panic!("expected sector page");
        };
        assert_eq!(entries.iter().map(|e| e.index).collect::<Vec<_>>(), [0, 3]);

        let entry = entries.get(1).expect("second sector");
        let mut buf = vec![0; entry.len as usize];
        medium.read_at(entry.offset, &mut buf).expect("read sector");
        let coords = decode_sector(&buf).expect("decode sector");
        assert_eq!(coords.get(200 - 192), Some(&Some(Coordinate::from_fixed(-5, 7))));
        assert_eq!(coords.get(0), Some(&None));
    }

    #[rstest]
    fn dense_bucket_is_raw(medium: (TempDir, Medium)) {
        let (_dir, mut medium) = medium;
        let mut bucket = ActiveBucket::new(0, 64);
        for slot in 0..40 {
            let value = i32::try_from(slot).expect("small slot");
            bucket.set(slot, Coordinate::from_fixed(value, -value));
        }
        let page = bucket.seal(50, &mut medium).expect("seal");
        let BucketPage::Raw { offset, presence } = page else {
            panic!("expected raw page");
        };
        assert_eq!(presence.first(), Some(&((1_u64 << 40) - 1)));

        let mut buf = [0_u8; RAW_SLOT_BYTES];
        medium
            .read_at(offset + 39 * RAW_SLOT_BYTES as u64, &mut buf)
            .expect("read slot");
        assert_eq!(
            decode_raw_slot(&buf).expect("decode slot"),
            Coordinate::from_fixed(39, -39)
        );
    }

    #[rstest]
    fn reset_clears_presence() {
        let mut bucket = ActiveBucket::new(4, 64);
        bucket.set(1, Coordinate::from_fixed(1, 1));
        bucket.reset(5);
        assert!(bucket.is_empty());
        assert_eq!(bucket.get(1), None);
        assert_eq!(bucket.bucket, 5);
    }
}
