//! Focused unit tests covering ingest CLI configuration and output.

use super::helpers::{DatasetFiles, counter};
use super::*;
use crate::ingest::{IngestPlan, execute_ingest, run_ingest_with};
use camino::Utf8Path;
use rstest::rstest;
use wayfold_core::{BackendChoice, IngestConfig, ReadingMode};

fn plan_for(dataset: &DatasetFiles) -> IngestPlan {
    IngestPlan {
        osm_pbf: dataset.osm().to_path_buf(),
        engine: IngestConfig {
            scratch_dir: Some(dataset.root().to_path_buf()),
            ..IngestConfig::default()
        },
    }
}

#[rstest]
fn converting_without_dataset_errors() {
    let err = IngestPlan::try_from(IngestArgs::default()).expect_err("missing path should error");
    match err {
        CliError::MissingArgument { field, env } => {
            assert_eq!(field, ARG_OSM_PBF);
            assert_eq!(env, ENV_OSM_PBF);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
fn flags_override_engine_defaults() {
    let cli = Cli::try_parse_from([
        "wayfold",
        "ingest",
        "--osm-pbf",
        "planet.osm.pbf",
        "--backend",
        "relational",
        "--interleaved",
        "--retain-scratch",
        "--scratch-dir",
        "/var/tmp/wayfold",
        "--memory-ceiling-mb",
        "64",
    ])
    .expect("arguments parse");
    let Command::Ingest(args) = cli.command;
    let plan = IngestPlan::try_from(args).expect("plan builds");

    assert_eq!(plan.osm_pbf, "planet.osm.pbf");
    assert_eq!(plan.engine.backend, BackendChoice::Relational);
    assert_eq!(plan.engine.reading_mode, ReadingMode::Interleaved);
    assert!(plan.engine.retain_scratch);
    assert_eq!(
        plan.engine.scratch_dir.as_deref(),
        Some(Utf8Path::new("/var/tmp/wayfold"))
    );
    assert_eq!(plan.engine.memory_ceiling_bytes, 64 * 1024 * 1024);
}

#[rstest]
fn omitted_flags_keep_engine_defaults() {
    let args = IngestArgs {
        osm_pbf: Some("planet.osm.pbf".into()),
        ..IngestArgs::default()
    };
    let plan = IngestPlan::try_from(args).expect("plan builds");
    let expected = IngestConfig::default();
    assert_eq!(plan.engine, expected);
}

#[rstest]
fn unknown_backend_is_a_parse_error() {
    let err = Cli::try_parse_from(["wayfold", "ingest", "--backend", "lmdb"])
        .expect_err("backend should be rejected");
    assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
}

#[rstest]
#[case(0, false)]
#[case(u64::MAX, true)]
fn memory_ceiling_is_checked(#[case] megabytes: u64, #[case] overflows: bool) {
    let args = IngestArgs {
        osm_pbf: Some("planet.osm.pbf".into()),
        memory_ceiling_mb: Some(megabytes),
        ..IngestArgs::default()
    };
    match IngestPlan::try_from(args) {
        Err(CliError::MemoryCeilingOverflow { megabytes: reported }) if overflows => {
            assert_eq!(reported, megabytes);
        }
        Err(CliError::InvalidSettings(_)) if !overflows => {}
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[rstest]
fn validate_sources_reports_missing_files() {
    let dataset = DatasetFiles::new();
    let plan = IngestPlan {
        osm_pbf: dataset.missing(),
        ..plan_for(&dataset)
    };
    match plan.validate_sources().expect_err("expected failure") {
        CliError::MissingSourceFile { field, path } => {
            assert_eq!(field, ARG_OSM_PBF);
            assert_eq!(path, dataset.missing());
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[rstest]
fn validate_sources_rejects_directories() {
    let dataset = DatasetFiles::new();
    let plan = IngestPlan {
        osm_pbf: dataset.root().to_path_buf(),
        ..plan_for(&dataset)
    };
    match plan.validate_sources().expect_err("expected directory rejection") {
        CliError::SourcePathNotFile { field, .. } => assert_eq!(field, ARG_OSM_PBF),
        other => panic!("unexpected error {other:?}"),
    }
}

#[rstest]
#[case(ReadingMode::Sequential)]
#[case(ReadingMode::Interleaved)]
fn ingest_counts_features_across_layers(#[case] reading_mode: ReadingMode) {
    let dataset = DatasetFiles::new();
    let mut plan = plan_for(&dataset);
    plan.engine.reading_mode = reading_mode;

    let output = execute_ingest(&plan).expect("ingest succeeds");
    let features = output.summary.features;
    assert_eq!(output.summary.nodes, 5);
    assert_eq!(features.points, 1);
    assert_eq!(features.lines, 1);
    assert_eq!(features.multilinestrings, 1);
    assert_eq!(features.multipolygons, 1);
    assert_eq!(features.other_relations, 0);
    assert!(output.retained.is_empty());
}

#[rstest]
fn summary_is_printed_as_json() {
    let dataset = DatasetFiles::new();
    let args = IngestArgs {
        osm_pbf: Some(dataset.osm().to_path_buf()),
        scratch_dir: Some(dataset.root().to_path_buf()),
        ..IngestArgs::default()
    };
    let mut buffer = Vec::new();
    run_ingest_with(args, &mut buffer).expect("ingest succeeds");

    let output: serde_json::Value = serde_json::from_slice(&buffer).expect("valid JSON");
    assert_eq!(counter(&output, "/summary/nodes"), 5);
    assert_eq!(counter(&output, "/summary/ways"), 2);
    assert_eq!(counter(&output, "/summary/relations"), 1);
    assert_eq!(
        output.pointer("/reading_mode").and_then(serde_json::Value::as_str),
        Some("sequential")
    );
}
