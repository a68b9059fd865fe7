//! Local ordered copy of a remote collection.
//!
//! ## Event flow
//!
//! ```text
//! RemoteCollection ──listener──► inbox (epoch-tagged)
//!                                   │
//!                  process_pending() / next_delta()
//!                                   │
//!                                   ▼
//!                               apply(event) ──► items: Vec<Item>
//!                                   │
//!                                   ▼
//!                           Delta ──► observers
//! ```
//!
//! Listeners only enqueue. Every change to the sequence happens inside
//! [`OrderedMirror::apply`], called by whoever owns the mirror, so two events
//! never interleave.
//!
//! ## Positioning
//!
//! Added and moved events name the key that should precede the item:
//! - no preceding key: the item becomes the new head (index 0);
//! - preceding key at index `i`: the item goes to `i + 1`;
//! - preceding key not known locally: the item is appended. Order degrades
//!   until the server reports a later move, but nothing fails.
//!
//! Key lookup is a linear scan, which is fine for list-sized collections.
//! [`MirrorConfig::key_index`] switches on a key→position map that is
//! rebuilt from the first shifted position after each structural change.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{MirrorError, Result};
use crate::event::{Delta, EventKind, RemoteEvent};
use crate::item::{Item, Key};
use crate::observer::{ObserverId, Observers};
use crate::remote::{Listener, RemoteCollection, SubscriptionHandle};

/// Addresses an item either by key or by its current position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Key(Key),
    Index(usize),
}

impl From<usize> for Target {
    fn from(index: usize) -> Self {
        Target::Index(index)
    }
}

impl From<Key> for Target {
    fn from(key: Key) -> Self {
        Target::Key(key)
    }
}

impl From<&Key> for Target {
    fn from(key: &Key) -> Self {
        Target::Key(key.clone())
    }
}

impl From<&str> for Target {
    fn from(key: &str) -> Self {
        Target::Key(Key::from(key))
    }
}

/// Mirror tuning.
#[derive(Debug, Clone, Default)]
pub struct MirrorConfig {
    /// Maintain a key→position map instead of scanning on every lookup.
    pub key_index: bool,
}

/// An event as queued by a listener, tagged with the attach it belongs to.
#[derive(Debug)]
struct Envelope {
    epoch: u64,
    event: RemoteEvent,
}

/// Keeps a local `Vec<Item>` in the same order as the remote collection.
pub struct OrderedMirror<R: RemoteCollection + ?Sized> {
    remote: Arc<R>,
    config: MirrorConfig,
    items: Vec<Item>,
    positions: HashMap<Key, usize>,
    subscriptions: Vec<SubscriptionHandle>,
    /// Bumped on every attach; events from older attaches are dropped.
    epoch: u64,
    inbox_tx: mpsc::UnboundedSender<Envelope>,
    inbox_rx: mpsc::UnboundedReceiver<Envelope>,
    observers: Observers<dyn FnMut(&Delta)>,
}

impl<R: RemoteCollection + ?Sized> OrderedMirror<R> {
    pub fn new(remote: Arc<R>) -> Self {
        Self::with_config(remote, MirrorConfig::default())
    }

    pub fn with_config(remote: Arc<R>, config: MirrorConfig) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            remote,
            config,
            items: Vec::new(),
            positions: HashMap::new(),
            subscriptions: Vec::new(),
            epoch: 0,
            inbox_tx,
            inbox_rx,
            observers: Observers::new(),
        }
    }

    // ── Syncing ─────────────────────────────────────────────────────

    /// Subscribe to the four child events. No-op when already attached.
    pub fn attach(&mut self) {
        if self.is_attached() {
            log::debug!("Mirror already attached; ignoring attach");
            return;
        }

        self.epoch += 1;
        for kind in EventKind::ALL {
            let tx = self.inbox_tx.clone();
            let epoch = self.epoch;
            let listener: Listener = Arc::new(move |event: RemoteEvent| {
                // Receiver lives as long as the mirror.
                let _ = tx.send(Envelope { epoch, event });
            });
            self.subscriptions.push(self.remote.subscribe(kind, listener));
        }
        log::info!("Mirror attached (epoch {})", self.epoch);
    }

    /// Drop every subscription and forget all items. Idempotent.
    pub fn detach(&mut self) {
        let was_attached = self.is_attached();
        for handle in self.subscriptions.drain(..) {
            self.remote.unsubscribe(handle);
        }
        while self.inbox_rx.try_recv().is_ok() {}

        let dropped = self.items.len();
        self.items.clear();
        self.positions.clear();

        if was_attached {
            log::info!("Mirror detached; cleared {dropped} items");
        }
    }

    pub fn is_attached(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    // ── Write requests ──────────────────────────────────────────────
    //
    // None of these touch `items`. The server echoes the write back as an
    // event and that event is what updates the mirror.

    /// Ask the remote to store `value` under a fresh key.
    pub fn enqueue_append(&self, value: Value) -> Key {
        let key = self.remote.push(value);
        log::debug!("Requested append under {key}");
        key
    }

    /// Ask the remote to merge `patch` into an item's value.
    pub fn enqueue_update(&self, target: impl Into<Target>, patch: Map<String, Value>) -> Result<()> {
        let key = self.resolve(target.into())?;
        self.remote.update(&key, patch);
        log::debug!("Requested update of {key}");
        Ok(())
    }

    /// Ask the remote to delete an item.
    pub fn enqueue_remove(&self, target: impl Into<Target>) -> Result<()> {
        let key = self.resolve(target.into())?;
        self.remote.remove(&key);
        log::debug!("Requested removal of {key}");
        Ok(())
    }

    fn resolve(&self, target: Target) -> Result<Key> {
        match target {
            Target::Key(key) => Ok(key),
            Target::Index(index) => self
                .items
                .get(index)
                .map(|item| item.key.clone())
                .ok_or(MirrorError::IndexOutOfRange {
                    index,
                    count: self.items.len(),
                }),
        }
    }

    // ── Event processing ────────────────────────────────────────────

    /// Apply every queued event, in arrival order.
    ///
    /// Events that cannot be applied are logged and skipped; they never stop
    /// later events from being processed.
    pub fn process_pending(&mut self) -> Vec<Delta> {
        let mut deltas = Vec::new();
        while let Ok(envelope) = self.inbox_rx.try_recv() {
            if let Some(delta) = self.handle(envelope) {
                deltas.push(delta);
            }
        }
        deltas
    }

    /// Wait for the next event that changes the sequence and apply it.
    pub async fn next_delta(&mut self) -> Option<Delta> {
        loop {
            let envelope = self.inbox_rx.recv().await?;
            if let Some(delta) = self.handle(envelope) {
                return Some(delta);
            }
        }
    }

    fn handle(&mut self, envelope: Envelope) -> Option<Delta> {
        if envelope.epoch != self.epoch || !self.is_attached() {
            log::trace!("Dropping {} event from a previous attach", envelope.event.kind());
            return None;
        }
        match self.apply(envelope.event) {
            Ok(delta) => Some(delta),
            Err(e) if e.is_race() => {
                log::debug!("Ignoring event: {e}");
                None
            }
            Err(e) => {
                log::warn!("Dropping event: {e}");
                None
            }
        }
    }

    /// Apply one event to the sequence and notify observers.
    ///
    /// Fails without touching the sequence when the event has no key, or
    /// when a change/remove/move names a key that is not present.
    pub fn apply(&mut self, event: RemoteEvent) -> Result<Delta> {
        let kind = event.kind();
        let delta = match event {
            RemoteEvent::Added { snapshot, prev_key } => {
                let item = snapshot.into_item().ok_or(MirrorError::MissingKey { kind })?;
                match self.position_of(&item.key) {
                    // Re-delivered add (e.g. a resubscribe replay): reposition
                    // and take the newer payload.
                    Some(from) => {
                        self.take(from);
                        let to = self.place(item.clone(), prev_key.as_ref());
                        if to == from {
                            Delta::Changed { index: to, item }
                        } else {
                            Delta::Moved { from, to, item }
                        }
                    }
                    None => {
                        let index = self.place(item.clone(), prev_key.as_ref());
                        Delta::Added { index, item }
                    }
                }
            }
            RemoteEvent::Changed { snapshot } => {
                let item = snapshot.into_item().ok_or(MirrorError::MissingKey { kind })?;
                let index = self.require(&item.key, kind)?;
                self.items[index] = item.clone();
                Delta::Changed { index, item }
            }
            RemoteEvent::Removed { snapshot } => {
                let key = snapshot.key().cloned().ok_or(MirrorError::MissingKey { kind })?;
                let index = self.require(&key, kind)?;
                let item = self.take(index);
                Delta::Removed { index, item }
            }
            RemoteEvent::Moved { snapshot, prev_key } => {
                let key = snapshot.key().cloned().ok_or(MirrorError::MissingKey { kind })?;
                let from = self.require(&key, kind)?;
                let item = self.take(from);
                let to = self.place(item.clone(), prev_key.as_ref());
                Delta::Moved { from, to, item }
            }
        };

        log::trace!("Applied {kind} for {} ({} items)", delta.item().key, self.items.len());
        for observer in self.observers.iter_mut() {
            observer(&delta);
        }
        Ok(delta)
    }

    fn require(&self, key: &Key, kind: EventKind) -> Result<usize> {
        self.position_of(key).ok_or_else(|| MirrorError::UnknownKey {
            key: key.clone(),
            kind,
        })
    }

    /// Index an item should be inserted at, given its preceding sibling.
    fn target_position(&self, prev_key: Option<&Key>) -> usize {
        match prev_key {
            None => 0,
            Some(prev) => match self.position_of(prev) {
                Some(index) => index + 1,
                None => {
                    log::debug!("Preceding sibling {prev} not present; appending");
                    self.items.len()
                }
            },
        }
    }

    fn place(&mut self, item: Item, prev_key: Option<&Key>) -> usize {
        let index = self.target_position(prev_key);
        self.items.insert(index, item);
        self.reindex_from(index);
        index
    }

    fn take(&mut self, index: usize) -> Item {
        let item = self.items.remove(index);
        if self.config.key_index {
            self.positions.remove(&item.key);
        }
        self.reindex_from(index);
        item
    }

    fn reindex_from(&mut self, start: usize) {
        if !self.config.key_index {
            return;
        }
        for (offset, item) in self.items[start..].iter().enumerate() {
            self.positions.insert(item.key.clone(), start + offset);
        }
    }

    // ── Observers ───────────────────────────────────────────────────

    /// Register a callback run for every delta, in application order.
    pub fn subscribe_deltas(&mut self, callback: impl FnMut(&Delta) + 'static) -> ObserverId {
        self.observers.insert(Box::new(callback))
    }

    pub fn unsubscribe_deltas(&mut self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    // ── Read access ─────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn keys(&self) -> Vec<Key> {
        self.items.iter().map(|item| item.key.clone()).collect()
    }

    pub fn position_of(&self, key: &Key) -> Option<usize> {
        if self.config.key_index {
            self.positions.get(key).copied()
        } else {
            self.items.iter().position(|item| &item.key == key)
        }
    }
}

impl<R: RemoteCollection + ?Sized> Drop for OrderedMirror<R> {
    fn drop(&mut self) {
        for handle in self.subscriptions.drain(..) {
            self.remote.unsubscribe(handle);
        }
    }
}
