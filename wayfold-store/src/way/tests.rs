//! Tests for way buffering, classification and storage.

use super::*;
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;
use wayfold_core::{KeyId, ValueId};
use wayfold_fs::ScratchSpace;

fn limits(max_batch_node_refs: usize) -> WayLimits {
    WayLimits {
        max_batch_node_refs,
        max_nodes_per_way: 5,
        max_tags_per_way: 2,
        max_tag_bytes_per_way: 16,
    }
}

fn way(id: EntityId, node_refs: Vec<EntityId>) -> WayRecord {
    WayRecord {
        id,
        node_refs,
        tags: vec![TagRef::Indexed {
            key: KeyId::new(0),
            value: ValueId::new(1),
        }],
        is_polygon: false,
    }
}

#[rstest]
fn buffer_signals_full_batches_and_drains_in_order() {
    let mut buffer = WayBuffer::new(limits(5));
    assert_eq!(
        buffer.add_way(way(1, vec![1, 2])).expect("encode way"),
        AddOutcome::Buffered
    );
    assert_eq!(
        buffer.add_way(way(2, vec![3, 4, 5])).expect("encode way"),
        AddOutcome::BatchFull
    );
    assert_eq!(buffer.node_ref_count(), 5);

    let drained = buffer.drain().expect("drain");
    assert_eq!(drained, vec![way(1, vec![1, 2]), way(2, vec![3, 4, 5])]);
    assert!(buffer.is_empty());
    assert_eq!(buffer.node_ref_count(), 0);
}

#[rstest]
#[case(way(1, (0..6).collect()))]
#[case(WayRecord { tags: vec![TagRef::Indexed { key: KeyId::new(0), value: ValueId::new(0) }; 3], ..way(2, vec![1, 2]) })]
#[case(WayRecord { tags: vec![TagRef::Raw { key: "description".into(), value: "a long free text".into() }], ..way(3, vec![1, 2]) })]
fn oversized_ways_are_handed_back(#[case] record: WayRecord) {
    let mut buffer = WayBuffer::new(limits(100));
    assert_eq!(
        buffer.add_way(record.clone()).expect("encode way"),
        AddOutcome::Oversized(record)
    );
    assert!(buffer.is_empty());
}

#[fixture]
fn rules() -> PolygonRules {
    PolygonRules::from_config(&IngestConfig::default()).expect("default rules")
}

#[rstest]
#[case(&[1, 2, 3, 1], &[("building", "yes")], true)]
#[case(&[1, 2, 3, 1], &[("highway", "residential")], false)]
#[case(&[1, 2, 3, 1], &[("highway", "platform")], true)]
#[case(&[1, 2, 3, 1], &[("highway", "pedestrian"), ("area", "yes")], true)]
#[case(&[1, 2, 3, 1], &[("building", "yes"), ("area", "no")], false)]
#[case(&[1, 2, 3, 4], &[("building", "yes")], false)]
#[case(&[1, 2, 1], &[("building", "yes")], false)]
fn closed_way_classification(
    rules: PolygonRules,
    #[case] node_refs: &[EntityId],
    #[case] tags: &[(&str, &str)],
    #[case] expected: bool,
) {
    assert_eq!(rules.is_polygon(node_refs, tags.iter().copied()), expected);
}

#[fixture]
fn temp_dir() -> TempDir {
    TempDir::new().expect("create temp dir")
}

fn open(relational: bool, dir: &TempDir, in_memory: bool) -> Box<dyn WayStore> {
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 path");
    let scratch = ScratchSpace::new(Some(&path)).expect("scratch space");
    let config = IngestConfig {
        max_in_memory_bytes: 256,
        ..IngestConfig::default()
    };
    if relational {
        Box::new(SqliteWayStore::new(&config, scratch, in_memory).expect("sqlite way store"))
    } else {
        Box::new(FileWayStore::new(&config, scratch, in_memory).expect("file way store"))
    }
}

fn resolved(id: EntityId) -> ResolvedWay {
    ResolvedWay {
        id,
        nodes: (0..4)
            .map(|n| (id * 10 + n, Coordinate::from_fixed(i32::try_from(n).expect("small"), -1)))
            .collect(),
        tags: vec![TagRef::KeyIndexed {
            key: KeyId::new(3),
            value: "Main Street".into(),
        }],
        is_polygon: id.rem_euclid(2) == 0,
    }
}

#[rstest]
#[case(false, true)]
#[case(false, false)]
#[case(true, true)]
#[case(true, false)]
fn way_stores_return_what_was_put(
    temp_dir: TempDir,
    #[case] relational: bool,
    #[case] in_memory: bool,
) {
    let mut store = open(relational, &temp_dir, in_memory);
    assert!(store.is_empty());
    for id in 1..=50 {
        store.put(&resolved(id)).expect("put");
    }
    store.put(&resolved(7)).expect("replace");
    store.flush().expect("flush");

    assert_eq!(store.len(), 50);
    assert!(!store.is_empty());
    for id in 1..=50 {
        assert_eq!(store.get(id).expect("get"), Some(resolved(id)));
    }
    assert_eq!(store.get(51).expect("get"), None);
}

#[rstest]
#[case(false)]
#[case(true)]
fn spilled_way_store_keeps_records(temp_dir: TempDir, #[case] relational: bool) {
    let mut store = open(relational, &temp_dir, true);
    store.put(&resolved(1)).expect("put");
    store.spill().expect("spill");
    store.put(&resolved(2)).expect("put after spill");
    assert_eq!(store.get(1).expect("get"), Some(resolved(1)));
    assert_eq!(store.get(2).expect("get"), Some(resolved(2)));
    assert_eq!(store.close(false).expect("close"), None);
}
