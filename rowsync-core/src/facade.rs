//! Presentation-facing wrapper around [`OrderedMirror`].
//!
//! Re-publishes mirror deltas as position notifications addressed by
//! [`IndexPath`], and forwards lifecycle and write intents.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{MirrorError, Result};
use crate::event::Delta;
use crate::item::{Item, Key};
use crate::mirror::{MirrorConfig, OrderedMirror, Target};
use crate::observer::{ObserverId, Observers};
use crate::remote::RemoteCollection;

/// Row + section address used by list widgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexPath {
    pub section: usize,
    pub row: usize,
}

impl IndexPath {
    pub fn new(row: usize, section: usize) -> Self {
        Self { section, row }
    }
}

/// Facade settings.
#[derive(Debug, Clone, Default)]
pub struct FacadeConfig {
    /// Section reported in every [`IndexPath`].
    pub section: usize,
}

/// One position change, as seen by the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ItemAdded { path: IndexPath, item: Item },
    ItemChanged { path: IndexPath, item: Item },
    ItemRemoved { path: IndexPath, item: Item },
    ItemMoved { from: IndexPath, to: IndexPath, item: Item },
}

impl Notification {
    pub fn item(&self) -> &Item {
        match self {
            Self::ItemAdded { item, .. }
            | Self::ItemChanged { item, .. }
            | Self::ItemRemoved { item, .. }
            | Self::ItemMoved { item, .. } => item,
        }
    }
}

type PathCallback = dyn FnMut(IndexPath, &Item);
type MoveCallback = dyn FnMut(IndexPath, IndexPath, &Item);

/// Count / indexed access / notifications over a mirrored collection.
pub struct CollectionFacade<R: RemoteCollection + ?Sized> {
    mirror: OrderedMirror<R>,
    config: FacadeConfig,
    added: Observers<PathCallback>,
    changed: Observers<PathCallback>,
    removed: Observers<PathCallback>,
    moved: Observers<MoveCallback>,
}

impl<R: RemoteCollection + ?Sized> CollectionFacade<R> {
    pub fn new(remote: Arc<R>) -> Self {
        Self::with_config(remote, FacadeConfig::default(), MirrorConfig::default())
    }

    pub fn with_config(remote: Arc<R>, config: FacadeConfig, mirror: MirrorConfig) -> Self {
        Self {
            mirror: OrderedMirror::with_config(remote, mirror),
            config,
            added: Observers::new(),
            changed: Observers::new(),
            removed: Observers::new(),
            moved: Observers::new(),
        }
    }

    // ── Read access ─────────────────────────────────────────────────

    pub fn count(&self) -> usize {
        self.mirror.len()
    }

    pub fn item_at(&self, index: usize) -> Result<&Item> {
        self.mirror.get(index).ok_or(MirrorError::IndexOutOfRange {
            index,
            count: self.mirror.len(),
        })
    }

    pub fn items(&self) -> &[Item] {
        self.mirror.items()
    }

    pub fn mirror(&self) -> &OrderedMirror<R> {
        &self.mirror
    }

    /// Flat index → presentation address. Pure.
    pub fn index_path(&self, index: usize) -> IndexPath {
        IndexPath::new(index, self.config.section)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Call once the list becomes visible.
    pub fn start_syncing(&mut self) {
        self.mirror.attach();
    }

    /// Call once the list is no longer visible. Drops all items.
    pub fn stop_syncing(&mut self) {
        self.mirror.detach();
    }

    pub fn is_syncing(&self) -> bool {
        self.mirror.is_attached()
    }

    // ── Write intents ───────────────────────────────────────────────

    pub fn append(&self, value: Value) -> Key {
        self.mirror.enqueue_append(value)
    }

    pub fn update_at(&self, index: usize, patch: Map<String, Value>) -> Result<()> {
        self.mirror.enqueue_update(index, patch)
    }

    pub fn remove_at(&self, index: usize) -> Result<()> {
        self.mirror.enqueue_remove(index)
    }

    pub fn update(&self, target: impl Into<Target>, patch: Map<String, Value>) -> Result<()> {
        self.mirror.enqueue_update(target, patch)
    }

    pub fn remove(&self, target: impl Into<Target>) -> Result<()> {
        self.mirror.enqueue_remove(target)
    }

    // ── Notifications ───────────────────────────────────────────────

    pub fn on_item_added(&mut self, callback: impl FnMut(IndexPath, &Item) + 'static) -> ObserverId {
        self.added.insert(Box::new(callback))
    }

    pub fn on_item_changed(&mut self, callback: impl FnMut(IndexPath, &Item) + 'static) -> ObserverId {
        self.changed.insert(Box::new(callback))
    }

    pub fn on_item_removed(&mut self, callback: impl FnMut(IndexPath, &Item) + 'static) -> ObserverId {
        self.removed.insert(Box::new(callback))
    }

    pub fn on_item_moved(
        &mut self,
        callback: impl FnMut(IndexPath, IndexPath, &Item) + 'static,
    ) -> ObserverId {
        self.moved.insert(Box::new(callback))
    }

    /// Remove a callback registered through any of the `on_item_*` methods.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.added.remove(id) || self.changed.remove(id) || self.removed.remove(id) || self.moved.remove(id)
    }

    // ── Event processing ────────────────────────────────────────────

    /// Apply every queued remote event and relay the results.
    pub fn process_pending(&mut self) -> Vec<Notification> {
        let deltas = self.mirror.process_pending();
        deltas.into_iter().map(|delta| self.relay(delta)).collect()
    }

    /// Wait for the next remote event that changes the list.
    pub async fn process_next(&mut self) -> Option<Notification> {
        let delta = self.mirror.next_delta().await?;
        Some(self.relay(delta))
    }

    fn relay(&mut self, delta: Delta) -> Notification {
        let notification = match delta {
            Delta::Added { index, item } => Notification::ItemAdded {
                path: self.index_path(index),
                item,
            },
            Delta::Changed { index, item } => Notification::ItemChanged {
                path: self.index_path(index),
                item,
            },
            Delta::Removed { index, item } => Notification::ItemRemoved {
                path: self.index_path(index),
                item,
            },
            Delta::Moved { from, to, item } => Notification::ItemMoved {
                from: self.index_path(from),
                to: self.index_path(to),
                item,
            },
        };

        match &notification {
            Notification::ItemAdded { path, item } => {
                for callback in self.added.iter_mut() {
                    callback(*path, item);
                }
            }
            Notification::ItemChanged { path, item } => {
                for callback in self.changed.iter_mut() {
                    callback(*path, item);
                }
            }
            Notification::ItemRemoved { path, item } => {
                for callback in self.removed.iter_mut() {
                    callback(*path, item);
                }
            }
            Notification::ItemMoved { from, to, item } => {
                for callback in self.moved.iter_mut() {
                    callback(*from, *to, item);
                }
            }
        }
        notification
    }
}
