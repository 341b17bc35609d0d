//! Tag dictionary: deduplicates keys and bounded-cardinality values.
//!
//! Keys are interned while the key table has room. Each key tracks its
//! distinct values until the per-key ceiling is reached; after that the key
//! is *saturated* and new values for it are carried inline as raw strings.
//! Values interned before saturation keep their ids, so existing references
//! stay valid. Identifiers are never reused during a pass.

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

/// Dense identifier of an interned key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(u32);

impl KeyId {
    /// Wrap a raw key index.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw key index.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Dense identifier of an interned value, scoped to its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(u32);

impl ValueId {
    /// Wrap a raw value index.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value index.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Compact reference to a tag.
///
/// The variant records which parts went through the dictionary; the
/// remaining parts are carried inline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagRef {
    /// Both key and value are interned.
    Indexed {
        /// Interned key.
        key: KeyId,
        /// Interned value of that key.
        value: ValueId,
    },
    /// The key is interned but its value cardinality ceiling was exceeded.
    KeyIndexed {
        /// Interned key.
        key: KeyId,
        /// Raw value.
        value: Box<str>,
    },
    /// The key table was full; both parts are raw.
    Raw {
        /// Raw key.
        key: Box<str>,
        /// Raw value.
        value: Box<str>,
    },
}

impl TagRef {
    /// Whether both parts are served by the dictionary.
    #[must_use]
    pub const fn is_indexed(&self) -> bool {
        matches!(self, Self::Indexed { .. })
    }
}

#[derive(Debug)]
struct KeyEntry {
    name: Box<str>,
    values: Vec<Box<str>>,
    lookup: HashMap<Box<str>, ValueId>,
    saturated: bool,
}

/// Interning table for tag keys and values.
///
/// # Examples
///
/// ```
/// use wayfold_core::{TagDictionary, TagRef};
///
/// let mut dictionary = TagDictionary::new(16, 2);
/// let highway = dictionary.tag_ref("highway", "primary");
/// assert!(highway.is_indexed());
/// assert_eq!(dictionary.resolve(&highway), Some(("highway", "primary")));
/// ```
#[derive(Debug)]
pub struct TagDictionary {
    keys: Vec<KeyEntry>,
    lookup: HashMap<Box<str>, KeyId>,
    max_keys: usize,
    max_values_per_key: usize,
}

impl TagDictionary {
    /// Create a dictionary bounded to `max_keys` keys and
    /// `max_values_per_key` distinct values per key.
    #[must_use]
    pub fn new(max_keys: usize, max_values_per_key: usize) -> Self {
        Self {
            keys: Vec::new(),
            lookup: HashMap::new(),
            max_keys,
            max_values_per_key,
        }
    }

    /// Intern a key name.
    ///
    /// Returns `None` once the key table holds `max_keys` entries and `name`
    /// is not among them.
    pub fn intern_key(&mut self, name: &str) -> Option<KeyId> {
        if let Some(id) = self.lookup.get(name) {
            return Some(*id);
        }
        if self.keys.len() >= self.max_keys {
            return None;
        }
        let id = KeyId(u32::try_from(self.keys.len()).ok()?);
        self.keys.push(KeyEntry {
            name: name.into(),
            values: Vec::new(),
            lookup: HashMap::new(),
            saturated: false,
        });
        self.lookup.insert(name.into(), id);
        Some(id)
    }

    /// Intern `value` under `key`.
    ///
    /// Returns `None` when the value must be stored raw: either the key is
    /// unknown, or it has already reached its distinct-value ceiling and
    /// `value` was not interned before.
    pub fn intern_value(&mut self, key: KeyId, value: &str) -> Option<ValueId> {
        let max_values = self.max_values_per_key;
        let entry = self.keys.get_mut(usize::try_from(key.0).ok()?)?;
        if let Some(id) = entry.lookup.get(value) {
            return Some(*id);
        }
        if entry.saturated {
            return None;
        }
        if entry.values.len() >= max_values {
            debug!(
                "tag key {:?} exceeded {max_values} distinct values; storing further values raw",
                entry.name
            );
            entry.saturated = true;
            return None;
        }
        let id = ValueId(u32::try_from(entry.values.len()).ok()?);
        entry.values.push(value.into());
        entry.lookup.insert(value.into(), id);
        Some(id)
    }

    /// Intern a key/value pair, choosing the most compact representation.
    pub fn tag_ref(&mut self, key: &str, value: &str) -> TagRef {
        let Some(key_id) = self.intern_key(key) else {
            return TagRef::Raw {
                key: key.into(),
                value: value.into(),
            };
        };
        match self.intern_value(key_id, value) {
            Some(value_id) => TagRef::Indexed {
                key: key_id,
                value: value_id,
            },
            None => TagRef::KeyIndexed {
                key: key_id,
                value: value.into(),
            },
        }
    }

    /// Name of an interned key.
    #[must_use]
    pub fn key_name(&self, key: KeyId) -> Option<&str> {
        self.entry(key).map(|entry| &*entry.name)
    }

    /// Interned value of `key`.
    #[must_use]
    pub fn value(&self, key: KeyId, value: ValueId) -> Option<&str> {
        let entry = self.entry(key)?;
        entry
            .values
            .get(usize::try_from(value.0).ok()?)
            .map(|v| &**v)
    }

    /// Resolve a reference back into its strings.
    #[must_use]
    pub fn resolve<'a>(&'a self, tag: &'a TagRef) -> Option<(&'a str, &'a str)> {
        match tag {
            TagRef::Indexed { key, value } => {
                Some((self.key_name(*key)?, self.value(*key, *value)?))
            }
            TagRef::KeyIndexed { key, value } => Some((self.key_name(*key)?, &**value)),
            TagRef::Raw { key, value } => Some((&**key, &**value)),
        }
    }

    /// Whether `key` has stopped accepting new indexed values.
    #[must_use]
    pub fn is_saturated(&self, key: KeyId) -> bool {
        self.entry(key).is_some_and(|entry| entry.saturated)
    }

    /// Number of interned keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn entry(&self, key: KeyId) -> Option<&KeyEntry> {
        self.keys.get(usize::try_from(key.0).ok()?)
    }
}
