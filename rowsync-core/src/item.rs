//! Items, keys and the raw snapshots carried by remote events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Stable identifier of an item, independent of its position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A record mirrored from the remote collection.
///
/// Identity is the key alone: two items with the same key compare equal
/// even when their payloads differ.
#[derive(Debug, Clone)]
pub struct Item {
    pub key: Key,
    pub value: Value,
}

impl Item {
    pub fn new(key: impl Into<Key>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Look up a top-level child of an object payload.
    pub fn child(&self, name: &str) -> Option<&Value> {
        self.value.get(name)
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Item {}

/// Raw record as delivered by the remote collaborator.
///
/// The key is optional on the wire; a snapshot without one is malformed
/// and is rejected when the mirror applies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub key: Option<Key>,
    pub value: Value,
}

impl Snapshot {
    pub fn new(key: impl Into<Key>, value: Value) -> Self {
        Self {
            key: Some(key.into()),
            value,
        }
    }

    /// A snapshot with no key at all.
    pub fn keyless(value: Value) -> Self {
        Self { key: None, value }
    }

    /// The key, if present and non-empty.
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref().filter(|k| !k.as_str().is_empty())
    }

    pub fn into_item(self) -> Option<Item> {
        match self.key {
            Some(key) if !key.as_str().is_empty() => Some(Item {
                key,
                value: self.value,
            }),
            _ => None,
        }
    }
}
