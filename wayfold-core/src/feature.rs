//! Output layers and assembled features.

use std::{fmt, str::FromStr};

use geo::Geometry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::{EntityId, EntityKind, Tag};

/// Output layer a feature belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Tagged nodes.
    Points,
    /// Ways that are not areas.
    Lines,
    /// Route relations.
    MultiLineStrings,
    /// Multipolygon and boundary relations, plus area ways.
    MultiPolygons,
    /// Every other relation, as a geometry collection.
    OtherRelations,
}

impl Layer {
    /// All layers in production order.
    pub const ALL: [Self; 5] = [
        Self::Points,
        Self::Lines,
        Self::MultiLineStrings,
        Self::MultiPolygons,
        Self::OtherRelations,
    ];

    /// Number of layers.
    pub const COUNT: usize = Self::ALL.len();

    /// Dense index of the layer, matching [`Layer::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Points => 0,
            Self::Lines => 1,
            Self::MultiLineStrings => 2,
            Self::MultiPolygons => 3,
            Self::OtherRelations => 4,
        }
    }

    /// Layer name as exposed to consumers.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Points => "points",
            Self::Lines => "lines",
            Self::MultiLineStrings => "multilinestrings",
            Self::MultiPolygons => "multipolygons",
            Self::OtherRelations => "other_relations",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown layer name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown layer {name:?}")]
pub struct ParseLayerError {
    /// The rejected input.
    pub name: String,
}

impl FromStr for Layer {
    type Err = ParseLayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|layer| layer.name() == s)
            .ok_or_else(|| ParseLayerError { name: s.to_owned() })
    }
}

/// A fully resolved feature ready for consumption.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Identifier of the source entity.
    pub id: EntityId,
    /// Class of the source entity.
    pub kind: EntityKind,
    /// Layer the feature was produced for.
    pub layer: Layer,
    /// Geometry in WGS84 degrees.
    pub geometry: Geometry<f64>,
    /// Significant tags, in source order.
    pub tags: Vec<Tag>,
}

impl Feature {
    /// Value of the first tag with `key`, if any.
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
