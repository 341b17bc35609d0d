//! Relation resolution and ring assembly.
//!
//! Member ways are fetched from the way store of the pass. Multipolygon and
//! boundary relations chain their ways into closed rings by shared endpoint
//! node ids; routes become multi-line strings; every other relation becomes
//! a geometry collection in member order. Missing members and segments that
//! never close are counted and left out, never fatal.

use std::collections::HashMap;

use geo::{
    Contains, Geometry, GeometryCollection, LineString, MultiLineString, MultiPolygon, Point,
    Polygon,
};
use log::debug;
use thiserror::Error;
use wayfold_core::{Coordinate, EntityId, EntityKind, Layer, RelationNotice, TagRef};
use wayfold_store::{NodeStore, NodeStoreError, ResolvedWay, WayStore, WayStoreError};

/// Extensions tried while searching for one ring before its starting
/// segment is given up as dangling.
const MAX_RING_SEARCH_STEPS: usize = 4096;

/// A resolved node on a way or ring.
pub type RingNode = (EntityId, Coordinate);

/// Layer a relation's feature belongs to, from its `type` tag.
#[must_use]
pub fn relation_layer(relation: &RelationNotice) -> Layer {
    match relation.tag("type") {
        Some("multipolygon" | "boundary") => Layer::MultiPolygons,
        Some("route") => Layer::MultiLineStrings,
        _ => Layer::OtherRelations,
    }
}

/// Rings chained from a set of way segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RingAssembly {
    /// Closed rings; each starts and ends on the same node.
    pub rings: Vec<Vec<RingNode>>,
    /// Segments that could not be part of any closed ring.
    pub dangling: usize,
}

/// Chain `segments` into closed rings by matching endpoint node ids.
///
/// Segments that are already closed become rings on their own. Segments
/// with an endpoint no other segment shares can never close and are
/// dropped first. The rest are joined end to end, reversing them where
/// needed; when a chain runs into a dead end it backs off and tries the
/// other segments at that node until it returns to its first node. Segments
/// left over, and closed rings with fewer than `min_ring_nodes` nodes,
/// count as dangling.
///
/// # Examples
///
/// ```
/// use wayfold_core::Coordinate;
/// use wayfold_ingest::assemble_rings;
///
/// let node = |id: i64| (id, Coordinate::from_fixed(i32::try_from(id).unwrap_or(0), 0));
/// let assembly = assemble_rings(
///     vec![
///         vec![node(1), node(2)],
///         vec![node(3), node(2)],
///         vec![node(3), node(1)],
///     ],
///     4,
/// );
/// assert_eq!(assembly.rings.len(), 1);
/// assert_eq!(assembly.dangling, 0);
/// ```
#[must_use]
pub fn assemble_rings(segments: Vec<Vec<RingNode>>, min_ring_nodes: usize) -> RingAssembly {
    let mut assembly = RingAssembly::default();
    let mut open = Vec::with_capacity(segments.len());
    for segment in segments {
        match endpoints(&segment) {
            Some((head, tail)) if segment.len() >= 2 && head == tail => {
                close_ring(&mut assembly, segment, 1, min_ring_nodes);
            }
            _ if segment.len() >= 2 => open.push(segment),
            _ => assembly.dangling += 1,
        }
    }

    let mut graph = SegmentGraph::new(open);
    assembly.dangling += graph.prune_dead_ends();
    for start in 0..graph.segments.len() {
        if graph.is_used(start) {
            continue;
        }
        match graph.ring_through(start) {
            Some(path) => {
                let parts = path.len();
                let ring = graph.take_ring(&path);
                close_ring(&mut assembly, ring, parts, min_ring_nodes);
            }
            None => {
                graph.set_used(start, true);
                assembly.dangling += 1;
            }
        }
    }
    assembly
}

fn endpoints(nodes: &[RingNode]) -> Option<(EntityId, EntityId)> {
    Some((nodes.first()?.0, nodes.last()?.0))
}

fn close_ring(assembly: &mut RingAssembly, ring: Vec<RingNode>, parts: usize, min_nodes: usize) {
    if ring.len() >= min_nodes {
        assembly.rings.push(ring);
    } else {
        assembly.dangling += parts;
    }
}

/// Open segments indexed by their endpoint node ids.
struct SegmentGraph {
    segments: Vec<Vec<RingNode>>,
    used: Vec<bool>,
    by_endpoint: HashMap<EntityId, Vec<usize>>,
}

impl SegmentGraph {
    fn new(segments: Vec<Vec<RingNode>>) -> Self {
        let mut by_endpoint: HashMap<EntityId, Vec<usize>> = HashMap::new();
        for (index, segment) in segments.iter().enumerate() {
            if let Some((head, tail)) = endpoints(segment) {
                by_endpoint.entry(head).or_default().push(index);
                by_endpoint.entry(tail).or_default().push(index);
            }
        }
        Self {
            used: vec![false; segments.len()],
            segments,
            by_endpoint,
        }
    }

    fn is_used(&self, index: usize) -> bool {
        self.used.get(index).copied().unwrap_or(true)
    }

    fn set_used(&mut self, index: usize, used: bool) {
        if let Some(flag) = self.used.get_mut(index) {
            *flag = used;
        }
    }

    fn ends_of(&self, index: usize) -> Option<(EntityId, EntityId)> {
        self.segments.get(index).and_then(|segment| endpoints(segment))
    }

    /// Mark segments touching a node no other open segment reaches, and
    /// return how many were dropped.
    fn prune_dead_ends(&mut self) -> usize {
        let mut degree: HashMap<EntityId, usize> = self
            .by_endpoint
            .iter()
            .map(|(node, touching)| (*node, touching.len()))
            .collect();
        let mut pending: Vec<EntityId> = degree
            .iter()
            .filter(|(_, count)| **count == 1)
            .map(|(node, _)| *node)
            .collect();
        let mut dropped = 0;
        while let Some(node) = pending.pop() {
            let Some(index) = self
                .by_endpoint
                .get(&node)
                .and_then(|touching| touching.iter().copied().find(|index| !self.is_used(*index)))
            else {
                continue;
            };
            self.set_used(index, true);
            dropped += 1;
            let Some((head, tail)) = self.ends_of(index) else {
                continue;
            };
            for end in [head, tail] {
                if let Some(count) = degree.get_mut(&end) {
                    *count = count.saturating_sub(1);
                    if *count == 1 {
                        pending.push(end);
                    }
                }
            }
        }
        dropped
    }

    /// Search for unused segments leading from the tail of `start` back to
    /// its head. Returns the segments in order with their orientation
    /// (`true` when reversed), leaving them marked as used.
    fn ring_through(&mut self, start: usize) -> Option<Vec<(usize, bool)>> {
        let (head, tail) = self.ends_of(start)?;
        self.set_used(start, true);
        let mut path = vec![(start, false)];
        let mut frames = vec![(tail, 0_usize)];
        let mut steps = 0;
        while let Some(&(at, cursor)) = frames.last() {
            steps += 1;
            if steps > MAX_RING_SEARCH_STEPS {
                debug!("ring search from node {head} gave up after {MAX_RING_SEARCH_STEPS} steps");
                break;
            }
            let next = self.by_endpoint.get(&at).and_then(|touching| {
                touching
                    .iter()
                    .enumerate()
                    .skip(cursor)
                    .find(|(_, index)| !self.is_used(**index))
                    .map(|(position, index)| (position, *index))
            });
            let Some((position, index)) = next else {
                frames.pop();
                if let Some((index, _)) = path.pop() {
                    self.set_used(index, false);
                }
                continue;
            };
            if let Some(frame) = frames.last_mut() {
                frame.1 = position + 1;
            }
            let Some((first, last)) = self.ends_of(index) else {
                continue;
            };
            let (reversed, far) = if first == at { (false, last) } else { (true, first) };
            self.set_used(index, true);
            path.push((index, reversed));
            if far == head {
                return Some(path);
            }
            frames.push((far, 0));
        }
        for (index, _) in path {
            self.set_used(index, false);
        }
        None
    }

    /// Concatenate the segments of a ring found by
    /// [`SegmentGraph::ring_through`].
    fn take_ring(&mut self, path: &[(usize, bool)]) -> Vec<RingNode> {
        let mut ring: Vec<RingNode> = Vec::new();
        for &(index, reversed) in path {
            let Some(segment) = self.segments.get_mut(index).map(std::mem::take) else {
                continue;
            };
            let skip = usize::from(!ring.is_empty());
            if reversed {
                ring.extend(segment.into_iter().rev().skip(skip));
            } else {
                ring.extend(segment.into_iter().skip(skip));
            }
        }
        ring
    }
}

/// Result of resolving one relation.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Assembled geometry; `None` when nothing usable resolved.
    pub geometry: Option<Geometry<f64>>,
    /// Layer the geometry belongs to.
    pub layer: Layer,
    /// Members that were not found.
    pub missing_members: u64,
    /// Ring segments that could not be closed.
    pub dangling_segments: u64,
    /// Way whose standalone polygon this relation replaces.
    pub claimed_way: Option<EntityId>,
    /// Tags inherited from the claimed way.
    pub inherited_tags: Option<Vec<TagRef>>,
}

/// Errors raised while resolving relations.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Reading a member node failed.
    #[error("failed to read relation member node")]
    Nodes(#[from] NodeStoreError),
    /// Reading a member way failed.
    #[error("failed to read relation member way")]
    Ways(#[from] WayStoreError),
}

/// Assembles relation geometries from the stores of a pass.
pub struct RelationResolver<'a> {
    nodes: &'a mut dyn NodeStore,
    ways: &'a mut dyn WayStore,
    min_ring_nodes: usize,
}

impl<'a> RelationResolver<'a> {
    /// Resolve members against `nodes` and `ways`; rings shorter than
    /// `min_ring_nodes` (closing node included) are discarded.
    pub fn new(
        nodes: &'a mut dyn NodeStore,
        ways: &'a mut dyn WayStore,
        min_ring_nodes: usize,
    ) -> Self {
        Self {
            nodes,
            ways,
            min_ring_nodes,
        }
    }

    /// Assemble the geometry of `relation`.
    ///
    /// # Errors
    /// Returns [`ResolveError`] when a store fails. Members that are simply
    /// absent are counted in the [`Resolution`] instead.
    pub fn resolve(&mut self, relation: &RelationNotice) -> Result<Resolution, ResolveError> {
        let layer = relation_layer(relation);
        let mut resolution = Resolution {
            geometry: None,
            layer,
            missing_members: 0,
            dangling_segments: 0,
            claimed_way: None,
            inherited_tags: None,
        };
        match layer {
            Layer::MultiPolygons => self.resolve_area(relation, &mut resolution)?,
            Layer::MultiLineStrings => self.resolve_route(relation, &mut resolution)?,
            _ => self.resolve_collection(relation, &mut resolution)?,
        }
        if resolution.missing_members > 0 {
            debug!(
                "relation {} is missing {} members",
                relation.id, resolution.missing_members
            );
        }
        Ok(resolution)
    }

    fn member_way(
        &mut self,
        id: EntityId,
        resolution: &mut Resolution,
    ) -> Result<Option<ResolvedWay>, ResolveError> {
        let way = self.ways.get(id)?;
        if way.is_none() {
            resolution.missing_members += 1;
        }
        Ok(way)
    }

    fn resolve_area(
        &mut self,
        relation: &RelationNotice,
        resolution: &mut Resolution,
    ) -> Result<(), ResolveError> {
        let mut outer = Vec::new();
        let mut inner = Vec::new();
        let mut first_outer: Option<(EntityId, Vec<TagRef>)> = None;
        for member in &relation.members {
            if member.kind != EntityKind::Way {
                continue;
            }
            let Some(way) = self.member_way(member.id, resolution)? else {
                continue;
            };
            if member.role == "inner" {
                inner.push(way.nodes);
            } else {
                if first_outer.is_none() {
                    first_outer = Some((way.id, way.tags));
                }
                outer.push(way.nodes);
            }
        }

        let outer_rings = assemble_rings(outer, self.min_ring_nodes);
        let inner_rings = assemble_rings(inner, self.min_ring_nodes);
        resolution.dangling_segments = (outer_rings.dangling + inner_rings.dangling) as u64;
        let polygons = place_rings(outer_rings.rings, inner_rings.rings);
        if polygons.is_empty() {
            return Ok(());
        }
        resolution.geometry = Some(Geometry::MultiPolygon(MultiPolygon::new(polygons)));

        let only_type_tag = relation.tags.iter().all(|(key, _)| key == "type");
        if only_type_tag
            && relation.tag("type") == Some("multipolygon")
            && let Some((id, tags)) = first_outer
        {
            resolution.claimed_way = Some(id);
            resolution.inherited_tags = Some(tags);
        }
        Ok(())
    }

    fn resolve_route(
        &mut self,
        relation: &RelationNotice,
        resolution: &mut Resolution,
    ) -> Result<(), ResolveError> {
        let mut lines = Vec::new();
        for member in &relation.members {
            if member.kind != EntityKind::Way {
                continue;
            }
            if let Some(way) = self.member_way(member.id, resolution)?
                && way.nodes.len() >= 2
            {
                lines.push(line_string(&way.nodes));
            }
        }
        if !lines.is_empty() {
            resolution.geometry = Some(Geometry::MultiLineString(MultiLineString::new(lines)));
        }
        Ok(())
    }

    fn resolve_collection(
        &mut self,
        relation: &RelationNotice,
        resolution: &mut Resolution,
    ) -> Result<(), ResolveError> {
        let mut parts = Vec::new();
        for member in &relation.members {
            match member.kind {
                EntityKind::Node => match self.nodes.get(member.id)? {
                    Some(coord) => parts.push(Geometry::Point(Point::from(coord.to_geo()))),
                    None => resolution.missing_members += 1,
                },
                EntityKind::Way => {
                    if let Some(way) = self.member_way(member.id, resolution)? {
                        parts.push(way_geometry(&way, self.min_ring_nodes));
                    }
                }
                EntityKind::Relation => {
                    debug!(
                        "relation {} skips nested relation {}",
                        relation.id, member.id
                    );
                }
            }
        }
        if !parts.is_empty() {
            resolution.geometry = Some(Geometry::GeometryCollection(GeometryCollection(parts)));
        }
        Ok(())
    }
}

/// Attach every inner ring to an outer ring.
///
/// An inner ring goes to the first outer ring containing its first vertex,
/// otherwise to the first outer ring. Without outer rings the inner rings
/// are promoted to outers.
fn place_rings(outer: Vec<Vec<RingNode>>, inner: Vec<Vec<RingNode>>) -> Vec<Polygon<f64>> {
    if outer.is_empty() {
        return inner
            .iter()
            .map(|ring| Polygon::new(line_string(ring), Vec::new()))
            .collect();
    }
    let shells: Vec<Polygon<f64>> = outer
        .iter()
        .map(|ring| Polygon::new(line_string(ring), Vec::new()))
        .collect();
    let mut holes: Vec<Vec<LineString<f64>>> = vec![Vec::new(); shells.len()];
    for ring in &inner {
        let Some(sample_point) = ring.first().map(|(_, coord)| coord.to_geo()) else {
            continue;
        };
        let owner = shells
            .iter()
            .position(|shell| shell.contains(&sample_point))
            .unwrap_or(0);
        if let Some(slot) = holes.get_mut(owner) {
            slot.push(line_string(ring));
        }
    }
    shells
        .into_iter()
        .zip(holes)
        .map(|(shell, interiors)| {
            let (exterior, _) = shell.into_inner();
            Polygon::new(exterior, interiors)
        })
        .collect()
}

/// Line string through the resolved nodes.
#[must_use]
pub fn line_string(nodes: &[RingNode]) -> LineString<f64> {
    nodes.iter().map(|(_, coord)| coord.to_geo()).collect()
}

/// Geometry of a standalone way: a polygon when it is a closed area
/// candidate, a line string otherwise.
#[must_use]
pub fn way_geometry(way: &ResolvedWay, min_ring_nodes: usize) -> Geometry<f64> {
    if way.is_polygon && is_closed_ring(&way.nodes, min_ring_nodes) {
        Geometry::Polygon(Polygon::new(line_string(&way.nodes), Vec::new()))
    } else {
        Geometry::LineString(line_string(&way.nodes))
    }
}

/// Whether `nodes` forms a closed ring of at least `min_nodes` nodes.
#[must_use]
pub fn is_closed_ring(nodes: &[RingNode], min_nodes: usize) -> bool {
    nodes.len() >= min_nodes && endpoints(nodes).is_some_and(|(head, tail)| head == tail)
}

#[cfg(test)]
mod tests;
