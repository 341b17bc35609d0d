//! Behaviour shared by both node store backends.

use super::*;
use camino::Utf8PathBuf;
use proptest::prelude::*;
use rstest::{fixture, rstest};
use std::collections::BTreeMap;
use tempfile::TempDir;
use wayfold_core::IngestConfig;
use wayfold_fs::ScratchSpace;

#[fixture]
fn temp_dir() -> TempDir {
    TempDir::new().expect("create temp dir")
}

fn small_config() -> IngestConfig {
    IngestConfig {
        bucket_capacity: 256,
        max_in_memory_bytes: 1024,
        ..IngestConfig::default()
    }
}

fn open(kind: BackendKind, dir: &TempDir, in_memory: bool) -> Box<dyn NodeStore> {
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 path");
    let scratch = ScratchSpace::new(Some(&path)).expect("scratch space");
    let config = small_config();
    match kind {
        BackendKind::Paged => {
            Box::new(PagedNodeStore::new(&config, scratch, in_memory).expect("paged store"))
        }
        BackendKind::Relational => {
            Box::new(SqliteNodeStore::new(&config, scratch, in_memory).expect("sqlite store"))
        }
    }
}

fn coord(id: EntityId) -> Coordinate {
    let lon = i32::try_from(id.rem_euclid(3_600_000)).expect("fits");
    let lat = i32::try_from(id.rem_euclid(1_800_000)).expect("fits") - 900_000;
    Coordinate::from_fixed(lon, lat)
}

#[rstest]
#[case(BackendKind::Paged, true)]
#[case(BackendKind::Paged, false)]
#[case(BackendKind::Relational, true)]
#[case(BackendKind::Relational, false)]
fn stored_coordinates_are_exact(
    temp_dir: TempDir,
    #[case] kind: BackendKind,
    #[case] in_memory: bool,
) {
    let mut store = open(kind, &temp_dir, in_memory);
    let ids: Vec<EntityId> = (0..2_000).map(|n| n * 7 + 3).collect();
    for id in &ids {
        store.put(*id, coord(*id)).expect("put");
    }
    store.flush().expect("flush");

    for id in &ids {
        assert_eq!(store.get(*id).expect("get"), Some(coord(*id)), "id {id}");
    }
    assert_eq!(store.get(4).expect("get"), None);
    assert_eq!(store.get(-1).expect("get"), None);
    assert_eq!(store.stats().nodes, 2_000);
    assert_eq!(store.kind(), kind);
}

#[rstest]
#[case(BackendKind::Paged)]
#[case(BackendKind::Relational)]
fn get_many_preserves_order_and_misses(temp_dir: TempDir, #[case] kind: BackendKind) {
    let mut store = open(kind, &temp_dir, true);
    store.put(10, Coordinate::from_fixed(1, 1)).expect("put");
    store.put(20, Coordinate::from_fixed(2, 2)).expect("put");

    let mut out = vec![Some(Coordinate::default())];
    store.get_many(&[10, 15, 20], &mut out).expect("get many");
    assert_eq!(
        out,
        [
            Some(Coordinate::from_fixed(1, 1)),
            None,
            Some(Coordinate::from_fixed(2, 2))
        ]
    );
}

#[rstest]
#[case(BackendKind::Paged)]
#[case(BackendKind::Relational)]
fn spill_keeps_every_coordinate(temp_dir: TempDir, #[case] kind: BackendKind) {
    let mut store = open(kind, &temp_dir, true);
    for id in 0..1_000 {
        store.put(id, coord(id)).expect("put");
    }
    store.spill().expect("spill");
    assert!(store.stats().on_disk);
    for id in 1_000..1_100 {
        store.put(id, coord(id)).expect("put after spill");
    }
    for id in 0..1_100 {
        assert_eq!(store.get(id).expect("get"), Some(coord(id)));
    }
}

#[rstest]
fn flush_spills_oversized_paged_medium(temp_dir: TempDir) {
    let mut store = open(BackendKind::Paged, &temp_dir, true);
    for id in 0..1_000 {
        store.put(id, coord(id)).expect("put");
    }
    store.flush().expect("flush");
    let stats = store.stats();
    assert!(stats.on_disk);
    assert!(stats.raw_buckets > 0);
}

#[rstest]
fn out_of_order_ids_replace_and_reopen_buckets(temp_dir: TempDir) {
    let mut store = open(BackendKind::Paged, &temp_dir, true);
    store.put(5, Coordinate::from_fixed(5, 5)).expect("put");
    store.put(900, Coordinate::from_fixed(9, 9)).expect("put");
    store.put(6, Coordinate::from_fixed(6, 6)).expect("put back into bucket 0");
    store.put(5, Coordinate::from_fixed(50, 50)).expect("overwrite");
    store.flush().expect("flush");

    assert_eq!(store.get(5).expect("get"), Some(Coordinate::from_fixed(50, 50)));
    assert_eq!(store.get(6).expect("get"), Some(Coordinate::from_fixed(6, 6)));
    assert_eq!(store.get(900).expect("get"), Some(Coordinate::from_fixed(9, 9)));
    assert_eq!(store.get(7).expect("get"), None);
}

#[rstest]
#[case(BackendKind::Paged)]
#[case(BackendKind::Relational)]
fn close_removes_or_retains_scratch(temp_dir: TempDir, #[case] kind: BackendKind) {
    let mut store = open(kind, &temp_dir, false);
    store.put(1, coord(1)).expect("put");
    store.flush().expect("flush");
    let kept = store.close(true).expect("close").expect("retained path");
    assert!(kept.exists());

    let mut other = open(kind, &temp_dir, false);
    other.put(1, coord(1)).expect("put");
    assert_eq!(other.close(false).expect("close"), None);
    let remaining = std::fs::read_dir(temp_dir.path()).expect("list").count();
    assert_eq!(remaining, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn paged_store_returns_exactly_what_was_put(
        entries in prop::collection::btree_map(
            -5_000_i64..50_000,
            (-1_800_000_000_i32..=1_800_000_000, -900_000_000_i32..=900_000_000),
            1..400,
        ),
        lookups in prop::collection::vec(-5_000_i64..50_000, 0..100),
    ) {
        let dir = TempDir::new().expect("create temp dir");
        let mut store = open(BackendKind::Paged, &dir, true);
        let expected: BTreeMap<EntityId, Coordinate> = entries
            .into_iter()
            .map(|(id, (lon, lat))| (id, Coordinate::from_fixed(lon, lat)))
            .collect();
        for (id, value) in &expected {
            store.put(*id, *value).expect("put");
        }
        store.flush().expect("flush");
        for (id, value) in &expected {
            prop_assert_eq!(store.get(*id).expect("get"), Some(*value));
        }
        for id in lookups {
            prop_assert_eq!(store.get(id).expect("get"), expected.get(&id).copied());
        }
    }
}
