//! Entity records handed from a decoder to the ingestion controller.
//!
//! These are plain data carriers: the decoder fills them in, the controller
//! classifies and routes them. Coordinates arrive as floating degrees and are
//! only scaled once they reach the node store.

use serde::{Deserialize, Serialize};

/// Identifier of a node, way or relation. Unique within its entity class.
pub type EntityId = i64;

/// A raw key/value tag pair as produced by a decoder.
pub type Tag = (String, String);

/// Class of an entity, also used as the member type of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A point with coordinates.
    Node,
    /// An ordered list of node references.
    Way,
    /// A collection of members with roles.
    Relation,
}

/// A node notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeNotice {
    /// Node identifier.
    pub id: EntityId,
    /// Longitude in WGS84 degrees.
    pub lon: f64,
    /// Latitude in WGS84 degrees.
    pub lat: f64,
    /// Tags attached to the node.
    pub tags: Vec<Tag>,
}

impl NodeNotice {
    /// Create an untagged node.
    #[must_use]
    pub const fn new(id: EntityId, lon: f64, lat: f64) -> Self {
        Self {
            id,
            lon,
            lat,
            tags: Vec::new(),
        }
    }

    /// Attach a tag, returning the updated node.
    #[must_use]
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_owned(), value.to_owned()));
        self
    }
}

/// A way notification: node references that still need coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WayNotice {
    /// Way identifier.
    pub id: EntityId,
    /// Ordered node references.
    pub node_refs: Vec<EntityId>,
    /// Tags attached to the way.
    pub tags: Vec<Tag>,
}

impl WayNotice {
    /// Create an untagged way.
    #[must_use]
    pub const fn new(id: EntityId, node_refs: Vec<EntityId>) -> Self {
        Self {
            id,
            node_refs,
            tags: Vec::new(),
        }
    }

    /// Attach a tag, returning the updated way.
    #[must_use]
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_owned(), value.to_owned()));
        self
    }
}

/// A single relation member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Class of the referenced entity.
    pub kind: EntityKind,
    /// Identifier of the referenced entity.
    pub id: EntityId,
    /// Role string, empty when the source carries none.
    pub role: String,
}

impl Member {
    /// Create a member reference.
    #[must_use]
    pub fn new(kind: EntityKind, id: EntityId, role: &str) -> Self {
        Self {
            kind,
            id,
            role: role.to_owned(),
        }
    }
}

/// A relation notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationNotice {
    /// Relation identifier.
    pub id: EntityId,
    /// Members in source order.
    pub members: Vec<Member>,
    /// Tags attached to the relation.
    pub tags: Vec<Tag>,
}

impl RelationNotice {
    /// Create an untagged relation.
    #[must_use]
    pub const fn new(id: EntityId, members: Vec<Member>) -> Self {
        Self {
            id,
            members,
            tags: Vec::new(),
        }
    }

    /// Attach a tag, returning the updated relation.
    #[must_use]
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_owned(), value.to_owned()));
        self
    }

    /// Value of the first tag with `key`, if any.
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
