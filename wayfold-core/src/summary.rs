//! Counters collected during an ingestion pass.
//!
//! Transient resolution gaps never abort a pass; they are tallied here so a
//! caller can judge how complete the produced geometries are.

use geo::{Coord, Rect};
use serde::Serialize;

use crate::feature::Layer;

/// Features emitted per layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LayerCounts {
    /// Features emitted on the points layer.
    pub points: u64,
    /// Features emitted on the lines layer.
    pub lines: u64,
    /// Features emitted on the multilinestrings layer.
    pub multilinestrings: u64,
    /// Features emitted on the multipolygons layer.
    pub multipolygons: u64,
    /// Features emitted on the other relations layer.
    pub other_relations: u64,
}

impl LayerCounts {
    /// Count one feature on `layer`.
    pub const fn record(&mut self, layer: Layer) {
        match layer {
            Layer::Points => self.points += 1,
            Layer::Lines => self.lines += 1,
            Layer::MultiLineStrings => self.multilinestrings += 1,
            Layer::MultiPolygons => self.multipolygons += 1,
            Layer::OtherRelations => self.other_relations += 1,
        }
    }

    /// Features counted on `layer`.
    #[must_use]
    pub const fn get(&self, layer: Layer) -> u64 {
        match layer {
            Layer::Points => self.points,
            Layer::Lines => self.lines,
            Layer::MultiLineStrings => self.multilinestrings,
            Layer::MultiPolygons => self.multipolygons,
            Layer::OtherRelations => self.other_relations,
        }
    }
}

/// Summary of an ingestion pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct IngestSummary {
    /// Node notifications received.
    pub nodes: u64,
    /// Way notifications received.
    pub ways: u64,
    /// Relation notifications received.
    pub relations: u64,
    /// Nodes skipped because their coordinates were invalid.
    pub invalid_coordinates: u64,
    /// Way node references that did not resolve to a stored coordinate.
    pub dangling_node_refs: u64,
    /// Ways dropped because fewer than two node references resolved.
    pub degenerate_ways: u64,
    /// Relation members that could not be found.
    pub missing_members: u64,
    /// Way segments that could not be chained into a closed ring.
    pub dangling_segments: u64,
    /// Entities that arrived after their phase had ended.
    pub late_entities: u64,
    /// Synchronous flushes triggered by the memory ceiling.
    pub flushes: u64,
    /// Features emitted, per layer.
    pub features: LayerCounts,
    /// Bounding box covering all accepted node coordinates.
    /// Coordinates are WGS84 with `x = longitude`, `y = latitude`.
    pub bounds: Option<Rect<f64>>,
}

impl IngestSummary {
    /// Count an accepted node and grow the bounding box around it.
    pub fn record_node(&mut self, location: Coord<f64>) {
        self.nodes += 1;
        self.include_bounds(Rect::new(location, location));
    }

    /// Count a node whose coordinates were rejected.
    pub const fn record_invalid_node(&mut self) {
        self.nodes += 1;
        self.invalid_coordinates += 1;
    }

    /// Grow the bounding box to cover `bounds`.
    pub fn include_bounds(&mut self, bounds: Rect<f64>) {
        match &mut self.bounds {
            Some(existing) => {
                let min = Coord {
                    x: existing.min().x.min(bounds.min().x),
                    y: existing.min().y.min(bounds.min().y),
                };
                let max = Coord {
                    x: existing.max().x.max(bounds.max().x),
                    y: existing.max().y.max(bounds.max().y),
                };
                *existing = Rect::new(min, max);
            }
            None => self.bounds = Some(bounds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn bounds_cover_all_nodes() {
        let mut summary = IngestSummary::default();
        summary.record_node(Coord { x: 1.0, y: 2.0 });
        summary.record_node(Coord { x: -3.0, y: 5.0 });
        summary.record_invalid_node();

        let bounds = summary.bounds.expect("bounds recorded");
        assert_eq!(bounds.min(), Coord { x: -3.0, y: 2.0 });
        assert_eq!(bounds.max(), Coord { x: 1.0, y: 5.0 });
        assert_eq!(summary.nodes, 3);
        assert_eq!(summary.invalid_coordinates, 1);
    }

    #[rstest]
    fn layer_counts_track_each_layer() {
        let mut counts = LayerCounts::default();
        counts.record(Layer::Lines);
        counts.record(Layer::Lines);
        counts.record(Layer::OtherRelations);
        assert_eq!(counts.get(Layer::Lines), 2);
        assert_eq!(counts.get(Layer::OtherRelations), 1);
        assert_eq!(counts.get(Layer::Points), 0);
    }

    #[rstest]
    fn serialises_counts_as_json() {
        let summary = IngestSummary {
            ways: 4,
            ..IngestSummary::default()
        };
        let json = serde_json::to_value(&summary).expect("serialise summary");
        assert_eq!(json["ways"], 4);
        assert_eq!(json["features"]["multipolygons"], 0);
    }
}
