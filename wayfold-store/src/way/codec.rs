//! Compact binary encoding of way records.
//!
//! Records are written with [`bincode`] through a wire struct that stores
//! node ids (and, for resolved ways, coordinates) as deltas from the
//! previous node. Consecutive ids then encode in a byte or two each.

use serde::{Deserialize, Serialize};
use wayfold_core::{Coordinate, EntityId, TagRef};

use super::{ResolvedWay, WayRecord};
use crate::encoding::{CodecError, decode, encode_into, fixed_component};

#[derive(Serialize, Deserialize)]
struct WayWire<Tags> {
    id: EntityId,
    is_polygon: bool,
    node_deltas: Vec<i64>,
    tags: Tags,
}

#[derive(Serialize, Deserialize)]
struct ResolvedWayWire<Tags> {
    id: EntityId,
    is_polygon: bool,
    node_deltas: Vec<(i64, i64, i64)>,
    tags: Tags,
}

/// Append the encoding of `way` to `buf`.
///
/// # Errors
/// Returns [`CodecError::Encode`] when `bincode` rejects the record.
pub fn encode_way(way: &WayRecord, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    let mut prev = 0_i64;
    let node_deltas = way
        .node_refs
        .iter()
        .map(|id| {
            let delta = id.wrapping_sub(prev);
            prev = *id;
            delta
        })
        .collect();
    encode_into(
        buf,
        &WayWire {
            id: way.id,
            is_polygon: way.is_polygon,
            node_deltas,
            tags: way.tags.as_slice(),
        },
    )
}

/// Decode a record written by [`encode_way`].
///
/// # Errors
/// Returns [`CodecError`] when the bytes are truncated or malformed.
pub fn decode_way(bytes: &[u8]) -> Result<WayRecord, CodecError> {
    let wire: WayWire<Vec<TagRef>> = decode(bytes)?;
    let mut prev = 0_i64;
    let node_refs = wire
        .node_deltas
        .into_iter()
        .map(|delta| {
            prev = prev.wrapping_add(delta);
            prev
        })
        .collect();
    Ok(WayRecord {
        id: wire.id,
        node_refs,
        tags: wire.tags,
        is_polygon: wire.is_polygon,
    })
}

/// Append the encoding of a resolved way to `buf`.
///
/// # Errors
/// Returns [`CodecError::Encode`] when `bincode` rejects the record.
pub fn encode_resolved_way(way: &ResolvedWay, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    let (mut prev_id, mut prev_lon, mut prev_lat) = (0_i64, 0_i64, 0_i64);
    let node_deltas = way
        .nodes
        .iter()
        .map(|(id, coord)| {
            let (lon, lat) = (i64::from(coord.lon), i64::from(coord.lat));
            let delta = (id.wrapping_sub(prev_id), lon - prev_lon, lat - prev_lat);
            (prev_id, prev_lon, prev_lat) = (*id, lon, lat);
            delta
        })
        .collect();
    encode_into(
        buf,
        &ResolvedWayWire {
            id: way.id,
            is_polygon: way.is_polygon,
            node_deltas,
            tags: way.tags.as_slice(),
        },
    )
}

/// Decode a record written by [`encode_resolved_way`].
///
/// # Errors
/// Returns [`CodecError`] when the bytes are truncated or malformed.
pub fn decode_resolved_way(bytes: &[u8]) -> Result<ResolvedWay, CodecError> {
    let wire: ResolvedWayWire<Vec<TagRef>> = decode(bytes)?;
    let (mut node_id, mut lon, mut lat) = (0_i64, 0_i64, 0_i64);
    let nodes = wire
        .node_deltas
        .into_iter()
        .map(|(id_delta, lon_delta, lat_delta)| {
            node_id = node_id.wrapping_add(id_delta);
            let coord = Coordinate::from_fixed(
                fixed_component(&mut lon, lon_delta)?,
                fixed_component(&mut lat, lat_delta)?,
            );
            Ok((node_id, coord))
        })
        .collect::<Result<Vec<_>, CodecError>>()?;
    Ok(ResolvedWay {
        id: wire.id,
        nodes,
        tags: wire.tags,
        is_polygon: wire.is_polygon,
    })
}
