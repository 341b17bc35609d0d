//! Ingest command implementation for the Wayfold CLI.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use log::info;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use wayfold_core::{BackendChoice, IngestConfig, IngestSummary, Layer, LayerCounts, ReadingMode};
use wayfold_ingest::{IngestController, IngestError, PbfSource};

use crate::{
    ARG_BACKEND, ARG_INTERLEAVED, ARG_MEMORY_CEILING_MB, ARG_OSM_PBF, ARG_RETAIN_SCRATCH,
    ARG_SCRATCH_DIR, CliError, ENV_OSM_PBF,
};

const MIB: u64 = 1024 * 1024;

/// CLI arguments for the `ingest` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Stream an OpenStreetMap PBF extract through the ingestion \
                 engine, drain every output layer and print the pass summary \
                 as JSON. Options can come from CLI flags, configuration \
                 files, or environment variables.",
    about = "Ingest an OSM PBF file"
)]
#[ortho_config(prefix = "WAYFOLD")]
pub(crate) struct IngestArgs {
    /// Path to the OpenStreetMap PBF file.
    #[arg(long = ARG_OSM_PBF, value_name = "path")]
    #[serde(default)]
    pub(crate) osm_pbf: Option<Utf8PathBuf>,
    /// Storage backend: auto, paged or relational.
    #[arg(long = ARG_BACKEND, value_name = "backend")]
    #[serde(default)]
    pub(crate) backend: Option<BackendChoice>,
    /// Build every layer in one pass instead of one pass per layer.
    #[arg(long = ARG_INTERLEAVED)]
    #[serde(default)]
    pub(crate) interleaved: bool,
    /// Directory for scratch files; the system temporary directory if unset.
    #[arg(long = ARG_SCRATCH_DIR, value_name = "dir")]
    #[serde(default)]
    pub(crate) scratch_dir: Option<Utf8PathBuf>,
    /// Keep scratch files once the pass completes.
    #[arg(long = ARG_RETAIN_SCRATCH)]
    #[serde(default)]
    pub(crate) retain_scratch: bool,
    /// Flush buffers to disk after this much growth, in MiB.
    #[arg(long = ARG_MEMORY_CEILING_MB, value_name = "MiB")]
    #[serde(default)]
    pub(crate) memory_ceiling_mb: Option<u64>,
}

impl IngestArgs {
    pub(crate) fn into_plan(self) -> Result<IngestPlan, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        IngestPlan::try_from(merged)
    }
}

/// Resolved `ingest` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IngestPlan {
    /// Input file.
    pub(crate) osm_pbf: Utf8PathBuf,
    /// Engine settings after applying the command options.
    pub(crate) engine: IngestConfig,
}

impl IngestPlan {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        require_existing(&self.osm_pbf, ARG_OSM_PBF)
    }
}

fn require_existing(path: &Utf8Path, field: &'static str) -> Result<(), CliError> {
    match wayfold_fs::file_is_file(path) {
        Ok(true) => Ok(()),
        Ok(false) => Err(CliError::SourcePathNotFile {
            field,
            path: path.to_path_buf(),
        }),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            Err(CliError::MissingSourceFile {
                field,
                path: path.to_path_buf(),
            })
        }
        Err(source) => Err(CliError::InspectSourcePath {
            field,
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl TryFrom<IngestArgs> for IngestPlan {
    type Error = CliError;

    fn try_from(args: IngestArgs) -> Result<Self, Self::Error> {
        let osm_pbf = args.osm_pbf.ok_or(CliError::MissingArgument {
            field: ARG_OSM_PBF,
            env: ENV_OSM_PBF,
        })?;
        let defaults = IngestConfig::default();
        let memory_ceiling_bytes = match args.memory_ceiling_mb {
            Some(megabytes) => megabytes
                .checked_mul(MIB)
                .ok_or(CliError::MemoryCeilingOverflow { megabytes })?,
            None => defaults.memory_ceiling_bytes,
        };
        let engine = IngestConfig {
            backend: args.backend.unwrap_or(defaults.backend),
            reading_mode: if args.interleaved {
                ReadingMode::Interleaved
            } else {
                ReadingMode::Sequential
            },
            scratch_dir: args.scratch_dir,
            retain_scratch: args.retain_scratch,
            memory_ceiling_bytes,
            ..defaults
        };
        engine.validate()?;
        Ok(Self { osm_pbf, engine })
    }
}

/// Summary printed once the pass completes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct IngestOutput {
    /// Input file.
    pub(crate) input: Utf8PathBuf,
    /// Backend that was requested.
    pub(crate) backend: BackendChoice,
    /// Consumption mode of the pass.
    pub(crate) reading_mode: ReadingMode,
    /// Counters of the final pass, with feature counts over every layer.
    pub(crate) summary: IngestSummary,
    /// Scratch files kept on request.
    pub(crate) retained: Vec<Utf8PathBuf>,
}

pub(crate) fn run_ingest(args: IngestArgs) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    run_ingest_with(args, &mut stdout)
}

pub(crate) fn run_ingest_with(args: IngestArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let plan = resolve_ingest_plan(args)?;
    let output = execute_ingest(&plan).map_err(|source| CliError::Ingest {
        path: plan.osm_pbf.clone(),
        source: Box::new(source),
    })?;
    write_output(writer, &output)
}

pub(crate) fn resolve_ingest_plan(args: IngestArgs) -> Result<IngestPlan, CliError> {
    let plan = args.into_plan()?;
    plan.validate_sources()?;
    Ok(plan)
}

/// Drain every layer of the input and collect the pass summary.
pub(crate) fn execute_ingest(plan: &IngestPlan) -> Result<IngestOutput, IngestError> {
    let source = PbfSource::open(&plan.osm_pbf)?;
    let mut controller = IngestController::new(source, plan.engine.clone())?;
    let mut counts = LayerCounts::default();
    match plan.engine.reading_mode {
        ReadingMode::Interleaved => {
            while let Some((layer, _)) = controller.next_any_feature()? {
                counts.record(layer);
            }
        }
        ReadingMode::Sequential => {
            for layer in Layer::ALL {
                while controller.next_feature(layer)?.is_some() {
                    counts.record(layer);
                }
                info!("layer {layer}: {} features", counts.get(layer));
            }
        }
    }
    let report = controller.finish()?;
    Ok(IngestOutput {
        input: plan.osm_pbf.clone(),
        backend: plan.engine.backend,
        reading_mode: plan.engine.reading_mode,
        summary: IngestSummary {
            features: counts,
            ..report.summary
        },
        retained: report.retained,
    })
}

fn write_output(writer: &mut dyn Write, output: &IngestOutput) -> Result<(), CliError> {
    let payload = serde_json::to_string_pretty(output).map_err(CliError::SerializeSummary)?;
    writer
        .write_all(payload.as_bytes())
        .map_err(CliError::WriteSummary)?;
    writer.write_all(b"\n").map_err(CliError::WriteSummary)?;
    Ok(())
}

