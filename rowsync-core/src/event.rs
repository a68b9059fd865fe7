//! Remote events consumed by the mirror and the deltas it produces.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::item::{Item, Key, Snapshot};

/// The four kinds of child events a remote collection emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Added,
    Changed,
    Removed,
    Moved,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Added,
        EventKind::Changed,
        EventKind::Removed,
        EventKind::Moved,
    ];

    /// Whether events of this kind carry a preceding-sibling key.
    pub fn is_ordered(&self) -> bool {
        matches!(self, EventKind::Added | EventKind::Moved)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Added => "added",
            EventKind::Changed => "changed",
            EventKind::Removed => "removed",
            EventKind::Moved => "moved",
        };
        f.write_str(name)
    }
}

/// A single event from the remote collection.
///
/// `prev_key` names the sibling that should immediately precede the item
/// in server order; `None` means the item is first.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    Added {
        snapshot: Snapshot,
        prev_key: Option<Key>,
    },
    Changed {
        snapshot: Snapshot,
    },
    Removed {
        snapshot: Snapshot,
    },
    Moved {
        snapshot: Snapshot,
        prev_key: Option<Key>,
    },
}

impl RemoteEvent {
    pub fn added(snapshot: Snapshot, prev_key: Option<Key>) -> Self {
        Self::Added { snapshot, prev_key }
    }

    pub fn changed(snapshot: Snapshot) -> Self {
        Self::Changed { snapshot }
    }

    pub fn removed(snapshot: Snapshot) -> Self {
        Self::Removed { snapshot }
    }

    pub fn moved(snapshot: Snapshot, prev_key: Option<Key>) -> Self {
        Self::Moved { snapshot, prev_key }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Added { .. } => EventKind::Added,
            Self::Changed { .. } => EventKind::Changed,
            Self::Removed { .. } => EventKind::Removed,
            Self::Moved { .. } => EventKind::Moved,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        match self {
            Self::Added { snapshot, .. }
            | Self::Changed { snapshot }
            | Self::Removed { snapshot }
            | Self::Moved { snapshot, .. } => snapshot,
        }
    }

    pub fn key(&self) -> Option<&Key> {
        self.snapshot().key()
    }

    /// Preceding-sibling key for ordered events; always `None` otherwise.
    pub fn prev_key(&self) -> Option<&Key> {
        match self {
            Self::Added { prev_key, .. } | Self::Moved { prev_key, .. } => prev_key.as_ref(),
            _ => None,
        }
    }
}

/// How one applied event changed the local sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Added { index: usize, item: Item },
    Changed { index: usize, item: Item },
    Removed { index: usize, item: Item },
    Moved { from: usize, to: usize, item: Item },
}

impl Delta {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Added { .. } => EventKind::Added,
            Self::Changed { .. } => EventKind::Changed,
            Self::Removed { .. } => EventKind::Removed,
            Self::Moved { .. } => EventKind::Moved,
        }
    }

    pub fn item(&self) -> &Item {
        match self {
            Self::Added { item, .. }
            | Self::Changed { item, .. }
            | Self::Removed { item, .. }
            | Self::Moved { item, .. } => item,
        }
    }
}
