//! Ingestion configuration shared by the store and ingest crates.
//!
//! The defaults mirror the limits used by established OSM readers: 64 Ki ids
//! per node bucket, 1024 distinct values per indexed key, rings of at least
//! four nodes, and a closed-way polygon list covering the common area keys.

use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MIB: u64 = 1024 * 1024;

/// Storage backend requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendChoice {
    /// Pick the paged backend unless custom indexing is disabled.
    #[default]
    Auto,
    /// Custom bucketed file format.
    Paged,
    /// Embedded `SQLite` database.
    Relational,
}

impl BackendChoice {
    /// Name used in configuration files and on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Paged => "paged",
            Self::Relational => "relational",
        }
    }
}

/// Error returned when parsing an unknown backend name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown backend {name:?}; expected auto, paged or relational")]
pub struct ParseBackendError {
    /// The rejected input.
    pub name: String,
}

impl FromStr for BackendChoice {
    type Err = ParseBackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Auto, Self::Paged, Self::Relational]
            .into_iter()
            .find(|choice| choice.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseBackendError { name: s.to_owned() })
    }
}

/// How consumers drain the output layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingMode {
    /// Drain one layer fully before asking for the next.
    #[default]
    Sequential,
    /// Pull features from all layers in round-robin order.
    Interleaved,
}

/// A tag-based classification rule: `key` matches any value, `key=value`
/// matches one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRule {
    key: String,
    value: Option<String>,
}

impl TagRule {
    /// Parse a rule written as `key` or `key=value`.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidTagRule`] when the key is empty.
    pub fn parse(rule: &str) -> Result<Self, ConfigError> {
        let (key, value) = match rule.split_once('=') {
            Some((key, value)) => (key.trim(), Some(value.trim())),
            None => (rule.trim(), None),
        };
        if key.is_empty() {
            return Err(ConfigError::InvalidTagRule {
                rule: rule.to_owned(),
            });
        }
        Ok(Self {
            key: key.to_owned(),
            value: value.map(str::to_owned),
        })
    }

    /// Whether the tag `key=value` satisfies this rule.
    #[must_use]
    pub fn matches(&self, key: &str, value: &str) -> bool {
        self.key == key && self.value.as_deref().is_none_or(|expected| expected == value)
    }
}

/// Tunables for one ingestion pass.
///
/// # Examples
///
/// ```
/// use wayfold_core::{BackendChoice, IngestConfig};
///
/// let config = IngestConfig {
///     backend: BackendChoice::Relational,
///     ..IngestConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Requested storage backend.
    pub backend: BackendChoice,
    /// When false, `auto` resolves to the relational backend.
    pub custom_indexing: bool,
    /// Node ids per bucket. Power of two and a multiple of 64.
    pub bucket_capacity: u32,
    /// Fill ratio at or above which a bucket is stored as a raw array.
    pub raw_fill_percent: u8,
    /// Build the hashed identifier index before way resolution.
    pub hashed_index: bool,
    /// Target load factor of the hashed index, at most 70.
    pub hash_load_percent: u8,
    /// Largest batch the hashed index accepts before falling back to binary
    /// search.
    pub max_hashed_ids: usize,
    /// Capacity of the collision chain arena.
    pub max_collision_nodes: usize,
    /// Size at which in-memory backing media spill to a scratch file.
    pub max_in_memory_bytes: u64,
    /// Buffered bytes that trigger a synchronous flush.
    pub memory_ceiling_bytes: u64,
    /// Node references accumulated before a way batch is resolved.
    pub max_batch_node_refs: usize,
    /// Ways with more node references are resolved on their own.
    pub max_nodes_per_way: usize,
    /// Ways with more tags are resolved on their own.
    pub max_tags_per_way: usize,
    /// Ways whose tags take more bytes are resolved on their own.
    pub max_tag_bytes_per_way: usize,
    /// Capacity of the tag dictionary key table.
    pub max_indexed_keys: usize,
    /// Distinct values a key may intern before it saturates.
    pub max_values_per_key: usize,
    /// Tags that make a closed way an area.
    pub closed_ways_are_polygons: Vec<String>,
    /// Tags that keep a closed way a line. Checked first.
    pub closed_ways_are_lines: Vec<String>,
    /// Fewest node references a ring may have, closing node included.
    pub min_ring_nodes: usize,
    /// Keys dropped from feature attributes.
    pub ignored_keys: Vec<String>,
    /// Keep resolved ways for relation assembly.
    pub index_ways: bool,
    /// Layer consumption mode.
    pub reading_mode: ReadingMode,
    /// Pending features per layer before the queue is considered full.
    pub max_features_per_layer: usize,
    /// Emit nodes even when they carry no significant tags.
    pub report_all_nodes: bool,
    /// Emit ways even when they carry no significant tags.
    pub report_all_ways: bool,
    /// Directory for scratch files. The system temporary directory when
    /// unset.
    pub scratch_dir: Option<Utf8PathBuf>,
    /// Keep scratch files after a successful pass.
    pub retain_scratch: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            custom_indexing: true,
            bucket_capacity: 65_536,
            raw_fill_percent: 50,
            hashed_index: true,
            hash_load_percent: 70,
            max_hashed_ids: 16_777_216,
            max_collision_nodes: 4_194_304,
            max_in_memory_bytes: 100 * MIB,
            memory_ceiling_bytes: 256 * MIB,
            max_batch_node_refs: 1_000_000,
            max_nodes_per_way: 2_000,
            max_tags_per_way: 255,
            max_tag_bytes_per_way: 1_024,
            max_indexed_keys: 32_768,
            max_values_per_key: 1_024,
            closed_ways_are_polygons: default_polygon_rules(),
            closed_ways_are_lines: vec!["area=no".to_owned()],
            min_ring_nodes: 4,
            ignored_keys: [
                "area",
                "created_by",
                "converted_by",
                "note",
                "todo",
                "fixme",
                "FIXME",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            index_ways: true,
            reading_mode: ReadingMode::Sequential,
            max_features_per_layer: 100_000,
            report_all_nodes: false,
            report_all_ways: false,
            scratch_dir: None,
            retain_scratch: false,
        }
    }
}

fn default_polygon_rules() -> Vec<String> {
    [
        "aeroway",
        "amenity",
        "boundary",
        "building",
        "craft",
        "geological",
        "historic",
        "landuse",
        "leisure",
        "military",
        "natural",
        "office",
        "place",
        "shop",
        "sport",
        "tourism",
        "highway=platform",
        "public_transport=platform",
        "area=yes",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

impl IngestConfig {
    /// Check the configuration for values the stores cannot honour.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.bucket_capacity.is_power_of_two() || self.bucket_capacity < 64 {
            return Err(ConfigError::InvalidBucketCapacity {
                capacity: self.bucket_capacity,
            });
        }
        if self.raw_fill_percent > 100 {
            return Err(ConfigError::InvalidFillPercent {
                percent: self.raw_fill_percent,
            });
        }
        if self.hash_load_percent == 0 || self.hash_load_percent > 70 {
            return Err(ConfigError::InvalidLoadFactor {
                percent: self.hash_load_percent,
            });
        }
        let limits = [
            ("max_batch_node_refs", self.max_batch_node_refs),
            ("max_nodes_per_way", self.max_nodes_per_way),
            ("max_tags_per_way", self.max_tags_per_way),
            ("max_tag_bytes_per_way", self.max_tag_bytes_per_way),
            ("max_features_per_layer", self.max_features_per_layer),
        ];
        if let Some((field, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroLimit { field });
        }
        if self.memory_ceiling_bytes == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "memory_ceiling_bytes",
            });
        }
        if self.min_ring_nodes < 3 {
            return Err(ConfigError::InvalidRingSize {
                nodes: self.min_ring_nodes,
            });
        }
        self.polygon_rules()?;
        self.line_rules()?;
        Ok(())
    }

    /// Parsed `closed_ways_are_polygons` rules.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidTagRule`] for a malformed entry.
    pub fn polygon_rules(&self) -> Result<Vec<TagRule>, ConfigError> {
        parse_rules(&self.closed_ways_are_polygons)
    }

    /// Parsed `closed_ways_are_lines` rules.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidTagRule`] for a malformed entry.
    pub fn line_rules(&self) -> Result<Vec<TagRule>, ConfigError> {
        parse_rules(&self.closed_ways_are_lines)
    }

    /// Whether `key` is dropped from feature attributes.
    #[must_use]
    pub fn is_ignored_key(&self, key: &str) -> bool {
        self.ignored_keys.iter().any(|ignored| ignored == key)
    }
}

fn parse_rules(rules: &[String]) -> Result<Vec<TagRule>, ConfigError> {
    rules.iter().map(|rule| TagRule::parse(rule)).collect()
}

/// Errors raised by [`IngestConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Bucket capacity must be a power of two no smaller than 64.
    #[error("bucket capacity {capacity} must be a power of two of at least 64")]
    InvalidBucketCapacity {
        /// Rejected capacity.
        capacity: u32,
    },
    /// Raw fill threshold above 100 percent.
    #[error("raw fill threshold {percent}% exceeds 100%")]
    InvalidFillPercent {
        /// Rejected percentage.
        percent: u8,
    },
    /// Hash load factor outside `1..=70`.
    #[error("hash load factor {percent}% must lie in 1..=70")]
    InvalidLoadFactor {
        /// Rejected percentage.
        percent: u8,
    },
    /// A limit that must be positive was zero.
    #[error("{field} must be greater than zero")]
    ZeroLimit {
        /// Name of the offending field.
        field: &'static str,
    },
    /// Rings need at least three nodes to enclose an area.
    #[error("minimum ring size {nodes} is below 3")]
    InvalidRingSize {
        /// Rejected node count.
        nodes: usize,
    },
    /// A tag rule had an empty key.
    #[error("invalid tag rule {rule:?}")]
    InvalidTagRule {
        /// The malformed rule.
        rule: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn defaults_are_valid() {
        assert_eq!(IngestConfig::default().validate(), Ok(()));
    }

    #[rstest]
    #[case(0)]
    #[case(32)]
    #[case(1000)]
    fn rejects_bad_bucket_capacity(#[case] capacity: u32) {
        let config = IngestConfig {
            bucket_capacity: capacity,
            ..IngestConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBucketCapacity { capacity })
        );
    }

    #[rstest]
    #[case(0)]
    #[case(71)]
    fn rejects_bad_load_factor(#[case] percent: u8) {
        let config = IngestConfig {
            hash_load_percent: percent,
            ..IngestConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLoadFactor { percent })
        );
    }

    #[rstest]
    fn rejects_zero_limits() {
        let config = IngestConfig {
            max_nodes_per_way: 0,
            ..IngestConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroLimit {
                field: "max_nodes_per_way"
            })
        );
    }

    #[rstest]
    fn rejects_empty_rule_key() {
        let config = IngestConfig {
            closed_ways_are_lines: vec!["=no".to_owned()],
            ..IngestConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTagRule { .. })
        ));
    }

    #[rstest]
    #[case("building", "building", "yes", true)]
    #[case("building", "highway", "yes", false)]
    #[case("area=yes", "area", "yes", true)]
    #[case("area=yes", "area", "no", false)]
    fn tag_rules_match(
        #[case] rule: &str,
        #[case] key: &str,
        #[case] value: &str,
        #[case] expected: bool,
    ) {
        let parsed = TagRule::parse(rule).expect("valid rule");
        assert_eq!(parsed.matches(key, value), expected);
    }

    #[rstest]
    #[case("auto", Ok(BackendChoice::Auto))]
    #[case("Paged", Ok(BackendChoice::Paged))]
    #[case("relational", Ok(BackendChoice::Relational))]
    #[case("lmdb", Err(ParseBackendError { name: "lmdb".to_owned() }))]
    fn parses_backend_names(
        #[case] input: &str,
        #[case] expected: Result<BackendChoice, ParseBackendError>,
    ) {
        assert_eq!(input.parse::<BackendChoice>(), expected);
    }

    #[rstest]
    fn deserialises_partial_documents() {
        let config: IngestConfig =
            serde_json::from_str(r#"{"backend":"relational","reading_mode":"interleaved"}"#)
                .expect("parse config");
        assert_eq!(config.backend, BackendChoice::Relational);
        assert_eq!(config.reading_mode, ReadingMode::Interleaved);
        assert_eq!(config.bucket_capacity, 65_536);
    }
}
