//! Test helpers for materialising PBF datasets for the ingest command.

use base64::{Engine as _, engine::general_purpose};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use tempfile::TempDir;

/// Dataset files living in a temporary directory.
#[derive(Debug)]
pub(super) struct DatasetFiles {
    _dir: TempDir,
    root: Utf8PathBuf,
    osm: Utf8PathBuf,
}

impl DatasetFiles {
    /// Decode the `square` fixture into a fresh temporary directory.
    pub(super) fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 tempdir");
        let fixture = Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures/square.osm.pbf.b64");
        let encoded = fs::read_to_string(&fixture)
            .unwrap_or_else(|err| panic!("failed to read fixture {fixture}: {err}"));
        let cleaned: String = encoded
            .chars()
            .filter(|ch| !ch.is_ascii_whitespace())
            .collect();
        let decoded = general_purpose::STANDARD
            .decode(cleaned.as_bytes())
            .unwrap_or_else(|err| panic!("failed to decode fixture {fixture}: {err}"));
        let osm = root.join("square.osm.pbf");
        fs::write(&osm, decoded).expect("write dataset file");
        Self {
            _dir: dir,
            root,
            osm,
        }
    }

    pub(super) fn osm(&self) -> &Utf8Path {
        &self.osm
    }

    pub(super) fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub(super) fn missing(&self) -> Utf8PathBuf {
        self.root.join("missing.osm.pbf")
    }
}

/// Read an unsigned counter from the printed JSON summary.
pub(super) fn counter(output: &serde_json::Value, pointer: &str) -> u64 {
    output
        .pointer(pointer)
        .and_then(serde_json::Value::as_u64)
        .unwrap_or_else(|| panic!("summary has no counter at {pointer}: {output}"))
}
