//! Tests for ring assembly and relation resolution.

use super::*;
use camino::Utf8PathBuf;
use geo::Coord;
use rstest::{fixture, rstest};
use tempfile::TempDir;
use wayfold_core::{IngestConfig, KeyId, Member, ValueId};
use wayfold_fs::ScratchSpace;
use wayfold_store::{FileWayStore, PagedNodeStore};

fn node(id: EntityId) -> RingNode {
    let x = i32::try_from(id).expect("small id");
    (id, Coordinate::from_fixed(x * 10_000_000, x.rem_euclid(2) * 10_000_000))
}

fn at(id: EntityId, lon: i32, lat: i32) -> RingNode {
    (id, Coordinate::from_fixed(lon * 10_000_000, lat * 10_000_000))
}

const MIN_RING: usize = 4;

fn ids(ring: &[RingNode]) -> Vec<EntityId> {
    ring.iter().map(|(id, _)| *id).collect()
}

#[rstest]
fn triangle_closes_into_one_ring() {
    let assembly = assemble_rings(
        vec![
            vec![node(1), node(2)],
            vec![node(2), node(3)],
            vec![node(3), node(1)],
        ],
        MIN_RING,
    );
    assert_eq!(assembly.dangling, 0);
    assert_eq!(assembly.rings.len(), 1);
    let ring = assembly.rings.first().expect("one ring");
    assert_eq!(ids(ring), vec![1, 2, 3, 1]);
}

#[rstest]
fn reversed_and_shuffled_segments_still_close() {
    let assembly = assemble_rings(
        vec![
            vec![node(3), node(4), node(1)],
            vec![node(2), node(1)],
            vec![node(2), node(3)],
        ],
        MIN_RING,
    );
    assert_eq!(assembly.dangling, 0);
    let ring = assembly.rings.first().expect("one ring");
    assert_eq!(ring.first().map(|n| n.0), ring.last().map(|n| n.0));
    assert_eq!(ring.len(), 5);
}

#[rstest]
fn unmatched_segments_are_dangling() {
    let assembly = assemble_rings(
        vec![
            vec![node(1), node(2), node(3), node(1)],
            vec![node(5), node(6)],
            vec![node(6), node(7)],
            vec![node(9)],
        ],
        MIN_RING,
    );
    assert_eq!(assembly.rings.len(), 1);
    assert_eq!(assembly.dangling, 3);
}

#[rstest]
#[case(MIN_RING, 0, 2)]
#[case(3, 1, 0)]
fn two_node_loops_follow_the_ring_minimum(
    #[case] min_ring_nodes: usize,
    #[case] rings: usize,
    #[case] dangling: usize,
) {
    let assembly = assemble_rings(
        vec![vec![node(1), node(2)], vec![node(2), node(1)]],
        min_ring_nodes,
    );
    assert_eq!(assembly.rings.len(), rings);
    assert_eq!(assembly.dangling, dangling);
}

#[rstest]
fn spur_at_a_ring_node_does_not_break_the_ring() {
    let assembly = assemble_rings(
        vec![
            vec![node(1), node(2)],
            vec![node(2), node(5)],
            vec![node(2), node(3)],
            vec![node(3), node(1)],
        ],
        MIN_RING,
    );
    assert_eq!(assembly.rings.len(), 1);
    assert_eq!(assembly.dangling, 1);
    let ring = assembly.rings.first().expect("one ring");
    assert_eq!(ids(ring), vec![1, 2, 3, 1]);
}

#[rstest]
fn dead_end_loops_are_backed_out_of() {
    let assembly = assemble_rings(
        vec![
            vec![node(1), node(2)],
            vec![node(2), node(3)],
            vec![node(3), node(4)],
            vec![node(4), node(3)],
            vec![node(2), node(5), node(1)],
        ],
        MIN_RING,
    );
    assert_eq!(assembly.rings.len(), 1);
    let ring = assembly.rings.first().expect("one ring");
    assert_eq!(ids(ring), vec![1, 2, 5, 1]);
    assert_eq!(assembly.dangling, 3);
}

#[rstest]
fn bow_tie_splits_into_two_rings() {
    let assembly = assemble_rings(
        vec![
            vec![node(1), node(2)],
            vec![node(2), node(3)],
            vec![node(3), node(1)],
            vec![node(2), node(4)],
            vec![node(4), node(6)],
            vec![node(6), node(2)],
        ],
        MIN_RING,
    );
    assert_eq!(assembly.dangling, 0);
    let rings: Vec<Vec<EntityId>> = assembly.rings.iter().map(|ring| ids(ring.as_slice())).collect();
    assert_eq!(rings, vec![vec![1, 2, 3, 1], vec![2, 4, 6, 2]]);
}

struct Stores {
    _dir: TempDir,
    nodes: PagedNodeStore,
    ways: FileWayStore,
}

#[fixture]
fn stores() -> Stores {
    let dir = TempDir::new().expect("create temp dir");
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 path");
    let scratch = ScratchSpace::new(Some(&path)).expect("scratch space");
    let config = IngestConfig::default();
    Stores {
        nodes: PagedNodeStore::new(&config, scratch.clone(), true).expect("node store"),
        ways: FileWayStore::new(&config, scratch, true).expect("way store"),
        _dir: dir,
    }
}

fn tagged_way(id: EntityId, nodes: Vec<RingNode>) -> ResolvedWay {
    ResolvedWay {
        id,
        nodes,
        tags: vec![TagRef::Indexed {
            key: KeyId::new(0),
            value: ValueId::new(0),
        }],
        is_polygon: false,
    }
}

fn put_ways(stores: &mut Stores, ways: &[ResolvedWay]) {
    for way in ways {
        stores.ways.put(way).expect("put way");
    }
}

fn multipolygon(members: &[(EntityId, &str)]) -> RelationNotice {
    RelationNotice::new(
        100,
        members
            .iter()
            .map(|(id, role)| Member::new(EntityKind::Way, *id, role))
            .collect(),
    )
    .with_tag("type", "multipolygon")
}

#[rstest]
fn multipolygon_from_outer_triangle(mut stores: Stores) {
    put_ways(
        &mut stores,
        &[
            tagged_way(1, vec![at(1, 0, 0), at(2, 4, 0)]),
            tagged_way(2, vec![at(2, 4, 0), at(3, 0, 4)]),
            tagged_way(3, vec![at(3, 0, 4), at(1, 0, 0)]),
        ],
    );
    let relation = multipolygon(&[(1, "outer"), (2, "outer"), (3, "outer")])
        .with_tag("landuse", "forest");
    let mut resolver = RelationResolver::new(&mut stores.nodes, &mut stores.ways, MIN_RING);
    let resolution = resolver.resolve(&relation).expect("resolve");

    assert_eq!(resolution.layer, Layer::MultiPolygons);
    assert_eq!(resolution.missing_members, 0);
    assert_eq!(resolution.claimed_way, None);
    let Some(Geometry::MultiPolygon(polygons)) = resolution.geometry else {
        panic!("expected a multipolygon, got {:?}", resolution.geometry);
    };
    let polygon = polygons.0.first().expect("one polygon");
    assert_eq!(polygon.exterior().0.len(), 4);
}

#[rstest]
fn missing_member_is_counted_not_fatal(mut stores: Stores) {
    put_ways(
        &mut stores,
        &[tagged_way(
            1,
            vec![at(1, 0, 0), at(2, 4, 0), at(3, 0, 4), at(1, 0, 0)],
        )],
    );
    let relation = multipolygon(&[(1, "outer"), (99, "outer")]);
    let mut resolver = RelationResolver::new(&mut stores.nodes, &mut stores.ways, MIN_RING);
    let resolution = resolver.resolve(&relation).expect("resolve");

    assert_eq!(resolution.missing_members, 1);
    assert!(matches!(resolution.geometry, Some(Geometry::MultiPolygon(_))));
}

#[rstest]
fn old_style_multipolygon_claims_its_outer_way(mut stores: Stores) {
    let outer = tagged_way(
        7,
        vec![at(1, 0, 0), at(2, 8, 0), at(3, 8, 8), at(4, 0, 8), at(1, 0, 0)],
    );
    let hole = tagged_way(
        8,
        vec![at(5, 2, 2), at(6, 4, 2), at(7, 4, 4), at(5, 2, 2)],
    );
    put_ways(&mut stores, &[outer.clone(), hole]);
    let relation = multipolygon(&[(7, "outer"), (8, "inner")]);
    let mut resolver = RelationResolver::new(&mut stores.nodes, &mut stores.ways, MIN_RING);
    let resolution = resolver.resolve(&relation).expect("resolve");

    assert_eq!(resolution.claimed_way, Some(7));
    assert_eq!(resolution.inherited_tags, Some(outer.tags));
    let Some(Geometry::MultiPolygon(polygons)) = resolution.geometry else {
        panic!("expected a multipolygon");
    };
    let polygon = polygons.0.first().expect("one polygon");
    assert_eq!(polygon.interiors().len(), 1);
}

#[rstest]
fn inner_rings_join_the_outer_that_contains_them() {
    let square = |id: EntityId, x: i32| {
        vec![
            at(id, x, 0),
            at(id + 1, x + 2, 0),
            at(id + 2, x + 2, 2),
            at(id + 3, x, 2),
            at(id, x, 0),
        ]
    };
    let hole = vec![at(50, 11, 1), at(51, 12, 1), at(52, 12, 2), at(50, 11, 1)];
    let polygons = place_rings(vec![square(1, 0), square(10, 10)], vec![hole]);
    assert_eq!(polygons.len(), 2);
    assert!(polygons.first().expect("first").interiors().is_empty());
    assert_eq!(polygons.get(1).expect("second").interiors().len(), 1);
}

#[rstest]
fn inner_rings_without_outer_are_promoted() {
    let hole = vec![at(1, 0, 0), at(2, 1, 0), at(3, 1, 1), at(1, 0, 0)];
    let polygons = place_rings(Vec::new(), vec![hole]);
    assert_eq!(polygons.len(), 1);
}

#[rstest]
fn routes_become_multilinestrings(mut stores: Stores) {
    put_ways(
        &mut stores,
        &[
            tagged_way(1, vec![at(1, 0, 0), at(2, 1, 0)]),
            tagged_way(2, vec![at(2, 1, 0), at(3, 2, 0)]),
        ],
    );
    let relation = RelationNotice::new(
        5,
        vec![
            Member::new(EntityKind::Way, 1, ""),
            Member::new(EntityKind::Node, 1, "stop"),
            Member::new(EntityKind::Way, 2, ""),
        ],
    )
    .with_tag("type", "route");
    let mut resolver = RelationResolver::new(&mut stores.nodes, &mut stores.ways, MIN_RING);
    let resolution = resolver.resolve(&relation).expect("resolve");

    assert_eq!(resolution.layer, Layer::MultiLineStrings);
    let Some(Geometry::MultiLineString(lines)) = resolution.geometry else {
        panic!("expected a multilinestring");
    };
    assert_eq!(lines.0.len(), 2);
}

#[rstest]
fn other_relations_keep_member_order(mut stores: Stores) {
    stores
        .nodes
        .put(42, Coordinate::from_fixed(10_000_000, 20_000_000))
        .expect("put node");
    put_ways(&mut stores, &[tagged_way(1, vec![at(1, 0, 0), at(2, 1, 0)])]);
    let relation = RelationNotice::new(
        6,
        vec![
            Member::new(EntityKind::Way, 1, ""),
            Member::new(EntityKind::Node, 42, "label"),
            Member::new(EntityKind::Node, 43, "label"),
            Member::new(EntityKind::Relation, 9, ""),
        ],
    )
    .with_tag("type", "site");
    let mut resolver = RelationResolver::new(&mut stores.nodes, &mut stores.ways, MIN_RING);
    let resolution = resolver.resolve(&relation).expect("resolve");

    assert_eq!(resolution.layer, Layer::OtherRelations);
    assert_eq!(resolution.missing_members, 1);
    let Some(Geometry::GeometryCollection(collection)) = resolution.geometry else {
        panic!("expected a geometry collection");
    };
    assert!(matches!(collection.0.first(), Some(Geometry::LineString(_))));
    assert_eq!(
        collection.0.get(1),
        Some(&Geometry::Point(Point::from(Coord { x: 1.0, y: 2.0 })))
    );
}

#[rstest]
#[case(Some("multipolygon"), Layer::MultiPolygons)]
#[case(Some("boundary"), Layer::MultiPolygons)]
#[case(Some("route"), Layer::MultiLineStrings)]
#[case(Some("restriction"), Layer::OtherRelations)]
#[case(None, Layer::OtherRelations)]
fn relation_type_selects_layer(#[case] kind: Option<&str>, #[case] expected: Layer) {
    let untyped = RelationNotice::new(1, Vec::new());
    let relation = match kind {
        Some(value) => untyped.with_tag("type", value),
        None => untyped,
    };
    assert_eq!(relation_layer(&relation), expected);
}

#[rstest]
fn rings_below_the_configured_minimum_are_dropped(mut stores: Stores) {
    put_ways(
        &mut stores,
        &[
            tagged_way(1, vec![at(1, 0, 0), at(2, 4, 0)]),
            tagged_way(2, vec![at(2, 4, 0), at(3, 0, 4)]),
            tagged_way(3, vec![at(3, 0, 4), at(1, 0, 0)]),
        ],
    );
    let relation = multipolygon(&[(1, "outer"), (2, "outer"), (3, "outer")]);
    let mut resolver = RelationResolver::new(&mut stores.nodes, &mut stores.ways, 5);
    let resolution = resolver.resolve(&relation).expect("resolve");

    assert_eq!(resolution.geometry, None);
    assert_eq!(resolution.dangling_segments, 3);
}

#[rstest]
#[case(4, true)]
#[case(5, false)]
fn closed_ring_minimum_is_configurable(#[case] min_nodes: usize, #[case] closed: bool) {
    let ring = vec![node(1), node(2), node(3), node(1)];
    assert_eq!(is_closed_ring(&ring, min_nodes), closed);
}
