//! State of one forward pass: stores, buffers and feature queues.

use std::collections::{HashSet, VecDeque};

use camino::Utf8PathBuf;
use geo::{Geometry, MultiPolygon, Point, Polygon, Rect};
use log::{debug, info, warn};
use wayfold_core::{
    Coordinate, EntityId, EntityKind, Feature, IngestConfig, IngestSummary, Layer, NodeNotice,
    RelationNotice, Tag, TagDictionary, TagRef, WayNotice,
};
use wayfold_fs::ScratchSpace;
use wayfold_store::{
    AddOutcome, IdLookupIndex, PolygonRules, ResolvedWay, StorageBackend, WayBuffer, WayLimits,
    WayRecord, open_backend,
};

use super::Phase;
use crate::error::IngestError;
use crate::relation::{RelationResolver, is_closed_ring, line_string, relation_layer};
use crate::source::EntitySink;

/// Which layers the consumer wants built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct LayerFilter {
    pub(super) interest: [bool; Layer::COUNT],
    pub(super) target: Option<Layer>,
}

impl LayerFilter {
    pub(super) const fn all() -> Self {
        Self {
            interest: [true; Layer::COUNT],
            target: None,
        }
    }

    pub(super) fn wants(&self, layer: Layer) -> bool {
        self.interest.get(layer.index()).copied().unwrap_or(false)
            && self.target.is_none_or(|target| target == layer)
    }
}

pub(super) struct PassState {
    pub(super) phase: Phase,
    pub(super) summary: IngestSummary,
    pub(super) header_bounds: Option<Rect<f64>>,
    pub(super) failure: Option<IngestError>,
    pub(super) filter: LayerFilter,
    pub(super) chunks: u64,
    config: IngestConfig,
    backend: Option<StorageBackend>,
    dictionary: TagDictionary,
    buffer: WayBuffer,
    index: IdLookupIndex,
    rules: PolygonRules,
    lookup: Vec<Option<Coordinate>>,
    queues: [VecDeque<Feature>; Layer::COUNT],
    queue_warned: [bool; Layer::COUNT],
    deferred_polygons: Vec<EntityId>,
    claimed_ways: HashSet<EntityId>,
    flush_baseline: u64,
}

impl PassState {
    pub(super) fn open(
        config: &IngestConfig,
        rules: PolygonRules,
        scratch: &ScratchSpace,
        size_hint: Option<u64>,
        filter: LayerFilter,
    ) -> Result<Self, IngestError> {
        let backend = open_backend(config, scratch, size_hint)?;
        Ok(Self {
            phase: Phase::Init,
            summary: IngestSummary::default(),
            header_bounds: None,
            failure: None,
            filter,
            chunks: 0,
            config: config.clone(),
            backend: Some(backend),
            dictionary: TagDictionary::new(config.max_indexed_keys, config.max_values_per_key),
            buffer: WayBuffer::new(WayLimits::from_config(config)),
            index: IdLookupIndex::new(config),
            rules,
            lookup: Vec::new(),
            queues: std::array::from_fn(|_| VecDeque::new()),
            queue_warned: [false; Layer::COUNT],
            deferred_polygons: Vec::new(),
            claimed_ways: HashSet::new(),
            flush_baseline: 0,
        })
    }

    fn backend_mut(&mut self) -> Result<&mut StorageBackend, IngestError> {
        self.backend.as_mut().ok_or(IngestError::Closed)
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!("ingestion phase {:?} -> {phase:?}", self.phase);
            self.phase = phase;
        }
    }

    fn guarded(&mut self, op: impl FnOnce(&mut Self) -> Result<(), IngestError>) {
        if self.failure.is_some() {
            return;
        }
        if let Err(err) = op(self) {
            self.failure = Some(err);
        }
    }

    fn ingest_nodes(&mut self, nodes: &[NodeNotice]) -> Result<(), IngestError> {
        if self.phase.rank() > Phase::Nodes.rank() {
            self.summary.late_entities += nodes.len() as u64;
            warn!(
                "{} nodes arrived after the nodes phase and were ignored",
                nodes.len()
            );
            return Ok(());
        }
        self.enter(Phase::Nodes);
        let wants_points = self.filter.wants(Layer::Points);
        let mut points = Vec::new();
        let backend = self.backend.as_mut().ok_or(IngestError::Closed)?;
        for node in nodes {
            let Some(coord) = Coordinate::from_degrees(node.lon, node.lat) else {
                self.summary.record_invalid_node();
                continue;
            };
            self.summary.record_node(coord.to_geo());
            backend.nodes.put(node.id, coord)?;
            if !wants_points {
                continue;
            }
            let tags = significant_tags(&self.config, &node.tags);
            if !tags.is_empty() || self.config.report_all_nodes {
                points.push(Feature {
                    id: node.id,
                    kind: EntityKind::Node,
                    layer: Layer::Points,
                    geometry: Geometry::Point(Point::from(coord.to_geo())),
                    tags,
                });
            }
        }
        for feature in points {
            self.emit(feature);
        }
        self.check_memory()
    }

    fn enter_ways(&mut self) -> Result<(), IngestError> {
        self.backend_mut()?.nodes.flush()?;
        self.enter(Phase::Ways);
        Ok(())
    }

    fn ingest_way(&mut self, way: &WayNotice) -> Result<(), IngestError> {
        if self.phase.rank() > Phase::Ways.rank() {
            self.summary.late_entities += 1;
            debug!("way {} arrived after the ways phase and was ignored", way.id);
            return Ok(());
        }
        if self.phase != Phase::Ways {
            self.enter_ways()?;
        }
        self.summary.ways += 1;

        let is_polygon = self.rules.is_polygon(
            &way.node_refs,
            way.tags.iter().map(|(key, value)| (key.as_str(), value.as_str())),
        );
        let tags = significant_tags(&self.config, &way.tags);
        let layer = if is_polygon {
            Layer::MultiPolygons
        } else {
            Layer::Lines
        };
        let emitted = (!tags.is_empty() || self.config.report_all_ways) && self.filter.wants(layer);
        if !emitted && !self.config.index_ways {
            return Ok(());
        }
        let record = WayRecord {
            id: way.id,
            node_refs: way.node_refs.clone(),
            tags: tags
                .iter()
                .map(|(key, value)| self.dictionary.tag_ref(key, value))
                .collect(),
            is_polygon,
        };
        match self.buffer.add_way(record)? {
            AddOutcome::Buffered => {}
            AddOutcome::BatchFull => self.resolve_batch()?,
            AddOutcome::Oversized(oversized) => {
                debug!("way {} is too large to batch; resolving alone", oversized.id);
                self.resolve_records(vec![oversized])?;
            }
        }
        self.check_memory()
    }

    fn resolve_batch(&mut self) -> Result<(), IngestError> {
        let records = self.buffer.drain()?;
        self.resolve_records(records)
    }

    fn resolve_records(&mut self, records: Vec<WayRecord>) -> Result<(), IngestError> {
        let mut refs: Vec<EntityId> = records
            .iter()
            .flat_map(|record| record.node_refs.iter().copied())
            .collect();
        refs.sort_unstable();
        refs.dedup();

        let backend = self.backend.as_mut().ok_or(IngestError::Closed)?;
        backend.nodes.get_many(&refs, &mut self.lookup)?;
        self.index.reserve(&refs);

        let batch = records.len();
        let mut dangling = 0_u64;
        let mut resolved = Vec::new();
        for record in records {
            let nodes: Vec<(EntityId, Coordinate)> = record
                .node_refs
                .iter()
                .filter_map(|id| {
                    let position = self.index.find(*id)?;
                    let coord = (*self.lookup.get(position)?)?;
                    Some((*id, coord))
                })
                .collect();
            dangling += (record.node_refs.len() - nodes.len()) as u64;
            if nodes.len() < 2 {
                self.summary.degenerate_ways += 1;
                debug!("way {} has fewer than two resolved nodes", record.id);
                continue;
            }
            let way = ResolvedWay {
                id: record.id,
                nodes,
                tags: record.tags,
                is_polygon: record.is_polygon,
            };
            if self.config.index_ways {
                backend.ways.put(&way)?;
            }
            if !way.tags.is_empty() || self.config.report_all_ways {
                resolved.push(way);
            }
        }
        if dangling > 0 {
            self.summary.dangling_node_refs += dangling;
            warn!("{dangling} node references in a batch of {batch} ways did not resolve");
        }
        for way in resolved {
            self.emit_way(way);
        }
        Ok(())
    }

    fn emit_way(&mut self, way: ResolvedWay) {
        let layer = if way.is_polygon && is_closed_ring(&way.nodes, self.config.min_ring_nodes) {
            Layer::MultiPolygons
        } else {
            Layer::Lines
        };
        if !self.filter.wants(layer) {
            return;
        }
        if layer == Layer::MultiPolygons && self.config.index_ways {
            self.deferred_polygons.push(way.id);
            return;
        }
        let feature = self.way_feature(way, layer);
        self.emit(feature);
    }

    fn way_feature(&self, way: ResolvedWay, layer: Layer) -> Feature {
        let geometry = if layer == Layer::MultiPolygons {
            Geometry::MultiPolygon(MultiPolygon::new(vec![Polygon::new(
                line_string(&way.nodes),
                Vec::new(),
            )]))
        } else {
            Geometry::LineString(line_string(&way.nodes))
        };
        Feature {
            id: way.id,
            kind: EntityKind::Way,
            layer,
            geometry,
            tags: resolve_tags(&self.dictionary, &way.tags),
        }
    }

    fn enter_relations(&mut self) -> Result<(), IngestError> {
        if self.phase != Phase::Ways {
            self.backend_mut()?.nodes.flush()?;
        }
        if !self.buffer.is_empty() {
            self.resolve_batch()?;
        }
        self.backend_mut()?.ways.flush()?;
        self.enter(Phase::Relations);
        Ok(())
    }

    fn ingest_relation(&mut self, relation: &RelationNotice) -> Result<(), IngestError> {
        if self.phase != Phase::Relations {
            self.enter_relations()?;
        }
        self.summary.relations += 1;
        let layer = relation_layer(relation);
        if !self.filter.wants(layer) {
            return Ok(());
        }
        let backend = self.backend.as_mut().ok_or(IngestError::Closed)?;
        let resolution = RelationResolver::new(
            backend.nodes.as_mut(),
            backend.ways.as_mut(),
            self.config.min_ring_nodes,
        )
        .resolve(relation)?;
        self.summary.missing_members += resolution.missing_members;
        self.summary.dangling_segments += resolution.dangling_segments;
        if let Some(id) = resolution.claimed_way {
            self.claimed_ways.insert(id);
        }
        let Some(geometry) = resolution.geometry else {
            debug!("relation {} produced no geometry", relation.id);
            return Ok(());
        };
        let tags = match resolution.inherited_tags {
            Some(refs) => resolve_tags(&self.dictionary, &refs),
            None => significant_tags(&self.config, &relation.tags),
        };
        self.emit(Feature {
            id: relation.id,
            kind: EntityKind::Relation,
            layer,
            geometry,
            tags,
        });
        self.check_memory()
    }

    /// Resolve what is still buffered and emit the standalone polygons no
    /// relation claimed.
    pub(super) fn finish_pass(&mut self) -> Result<(), IngestError> {
        if !self.buffer.is_empty() {
            self.resolve_batch()?;
        }
        for id in std::mem::take(&mut self.deferred_polygons) {
            if self.claimed_ways.contains(&id) {
                continue;
            }
            let Some(way) = self.backend_mut()?.ways.get(id)? else {
                continue;
            };
            let feature = self.way_feature(way, Layer::MultiPolygons);
            self.emit(feature);
        }
        if self.summary.late_entities > 0 {
            warn!(
                "{} entities arrived out of phase order and were ignored",
                self.summary.late_entities
            );
        }
        self.enter(Phase::Done);
        info!(
            "ingestion pass complete: {} nodes, {} ways, {} relations, {} flushes",
            self.summary.nodes, self.summary.ways, self.summary.relations, self.summary.flushes
        );
        Ok(())
    }

    fn resident_bytes(&self) -> u64 {
        let stores = self.backend.as_ref().map_or(0, |backend| {
            backend.nodes.stats().resident_bytes + backend.ways.resident_bytes()
        });
        stores + self.buffer.resident_bytes()
    }

    fn check_memory(&mut self) -> Result<(), IngestError> {
        let grown = self.resident_bytes().saturating_sub(self.flush_baseline);
        if grown <= self.config.memory_ceiling_bytes {
            return Ok(());
        }
        self.flush()
    }

    fn flush(&mut self) -> Result<(), IngestError> {
        let resume = self.phase;
        self.enter(Phase::Flush);
        if resume == Phase::Ways && !self.buffer.is_empty() {
            self.resolve_batch()?;
        }
        let backend = self.backend_mut()?;
        backend.nodes.spill()?;
        backend.ways.spill()?;
        self.summary.flushes += 1;
        self.flush_baseline = self.resident_bytes();
        debug!(
            "flush {} complete; {} bytes remain resident",
            self.summary.flushes, self.flush_baseline
        );
        self.enter(resume);
        Ok(())
    }

    fn emit(&mut self, feature: Feature) {
        let layer = feature.layer;
        self.summary.features.record(layer);
        let Some(queue) = self.queues.get_mut(layer.index()) else {
            return;
        };
        queue.push_back(feature);
        if self.filter.target.is_none()
            && queue.len() > self.config.max_features_per_layer
            && let Some(warned) = self.queue_warned.get_mut(layer.index())
            && !*warned
        {
            *warned = true;
            warn!(
                "more than {} features are pending in layer {layer}; \
                 read layers in turn to keep memory bounded",
                self.config.max_features_per_layer
            );
        }
    }

    pub(super) fn pop(&mut self, layer: Layer) -> Option<Feature> {
        self.queues.get_mut(layer.index())?.pop_front()
    }

    pub(super) fn discard_features(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
        self.deferred_polygons.clear();
    }

    /// Release both stores, keeping their scratch files when `retain` is
    /// set.
    pub(super) fn close(&mut self, retain: bool) -> Result<Vec<Utf8PathBuf>, IngestError> {
        let Some(StorageBackend { nodes, ways, .. }) = self.backend.take() else {
            return Ok(Vec::new());
        };
        let mut kept = Vec::new();
        kept.extend(nodes.close(retain)?);
        kept.extend(ways.close(retain)?);
        Ok(kept)
    }
}

impl EntitySink for PassState {
    fn notify_bounds(&mut self, bounds: Rect<f64>) {
        if self.phase == Phase::Init {
            self.enter(Phase::Bounds);
        }
        self.header_bounds.get_or_insert(bounds);
    }

    fn notify_nodes(&mut self, nodes: &[NodeNotice]) {
        self.guarded(|state| state.ingest_nodes(nodes));
    }

    fn notify_way(&mut self, way: &WayNotice) {
        self.guarded(|state| state.ingest_way(way));
    }

    fn notify_relation(&mut self, relation: &RelationNotice) {
        self.guarded(|state| state.ingest_relation(relation));
    }
}

fn significant_tags(config: &IngestConfig, tags: &[Tag]) -> Vec<Tag> {
    tags.iter()
        .filter(|(key, _)| !config.is_ignored_key(key))
        .cloned()
        .collect()
}

fn resolve_tags(dictionary: &TagDictionary, refs: &[TagRef]) -> Vec<Tag> {
    refs.iter()
        .filter_map(|tag| dictionary.resolve(tag))
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}
