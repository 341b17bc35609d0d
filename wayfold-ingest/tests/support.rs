//! Shared helpers for the ingest behaviour tests.

use base64::{Engine as _, engine::general_purpose};
use camino::{Utf8Path, Utf8PathBuf};
use std::{fs, io::Write};
use tempfile::{Builder, TempPath};

/// Epsilon for floating-point coordinate comparisons in tests
const COORDINATE_EPSILON: f64 = 1.0e-7;

/// Input file handed to a scenario.
pub enum Fixture {
    /// Decoded fixture, removed when dropped.
    Decoded {
        /// Keeps the temporary file alive.
        _file: TempPath,
        /// UTF-8 view of the file path.
        path: Utf8PathBuf,
    },
    /// Path that does not exist.
    Missing(Utf8PathBuf),
}

impl Fixture {
    /// Path of the fixture file.
    pub fn path(&self) -> &Utf8Path {
        match self {
            Self::Decoded { path, .. } | Self::Missing(path) => path,
        }
    }
}

/// Directory containing the encoded fixture blobs.
pub fn fixtures_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// Decode `tests/fixtures/<stem>.osm.pbf.b64` into a temporary file.
pub fn materialise_fixture(stem: &str) -> Fixture {
    let encoded_path = fixtures_dir().join(format!("{stem}.osm.pbf.b64"));
    let encoded = fs::read_to_string(&encoded_path)
        .unwrap_or_else(|err| panic!("failed to read fixture {encoded_path}: {err}"));
    let cleaned: String = encoded
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect();
    let decoded = general_purpose::STANDARD
        .decode(cleaned.as_bytes())
        .unwrap_or_else(|err| panic!("failed to decode fixture {encoded_path}: {err}"));
    let mut file = Builder::new()
        .prefix(stem)
        .suffix(".osm.pbf")
        .tempfile()
        .unwrap_or_else(|err| panic!("failed to create temporary {stem} fixture: {err}"));
    file.write_all(&decoded)
        .and_then(|()| file.flush())
        .unwrap_or_else(|err| panic!("failed to write {stem} fixture: {err}"));
    let temp = file.into_temp_path();
    let path = Utf8PathBuf::from_path_buf(temp.to_path_buf())
        .unwrap_or_else(|raw| panic!("fixture path is not UTF-8: {raw:?}"));
    Fixture::Decoded { _file: temp, path }
}

/// Compare floating-point coordinates within a small epsilon.
#[expect(
    clippy::float_arithmetic,
    reason = "test delta computation requires float maths"
)]
pub fn assert_close(actual: f64, expected: f64) {
    let delta = (actual - expected).abs();
    assert!(
        delta <= COORDINATE_EPSILON,
        "expected {expected}, got {actual} (|Δ| = {delta})"
    );
}
