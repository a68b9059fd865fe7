//! In-process authoritative collection.
//!
//! Behaves like the remote service the mirror is written against: it owns
//! the order, generates push keys, and reports every write as child events
//! carrying the preceding-sibling key. Used by tests, benches and
//! `rowsync-collab`'s host.

use serde_json::{Map, Value};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::event::{EventKind, RemoteEvent};
use crate::item::{Item, Key, Snapshot};
use crate::remote::order::OrderBy;
use crate::remote::push_id::PushIdGenerator;
use crate::remote::{Listener, RemoteCollection, SubscriptionHandle};

/// Events waiting to be delivered once the lock is released.
struct Dispatch {
    events: Vec<RemoteEvent>,
    listeners: Vec<(EventKind, Listener)>,
}

impl Dispatch {
    fn run(self) {
        for event in &self.events {
            let kind = event.kind();
            for (listener_kind, listener) in &self.listeners {
                if *listener_kind == kind {
                    listener(event.clone());
                }
            }
        }
    }
}

struct Inner {
    order: OrderBy,
    /// Children, sorted by `order`.
    entries: Vec<Item>,
    listeners: Vec<(SubscriptionHandle, Listener)>,
    next_subscription: u64,
    push_ids: PushIdGenerator,
}

impl Inner {
    fn position(&self, key: &Key) -> Option<usize> {
        self.entries.iter().position(|item| &item.key == key)
    }

    fn insertion_point(&self, key: &Key, value: &Value) -> usize {
        self.entries.partition_point(|item| {
            self.order.compare(&item.key, &item.value, key, value) == std::cmp::Ordering::Less
        })
    }

    fn prev_key(&self, index: usize) -> Option<Key> {
        index.checked_sub(1).map(|i| self.entries[i].key.clone())
    }

    fn write(&mut self, key: Key, value: Value) -> Vec<RemoteEvent> {
        if is_empty_value(&value) {
            return self.delete(&key);
        }

        match self.position(&key) {
            None => {
                let index = self.insertion_point(&key, &value);
                self.entries.insert(index, Item::new(key.clone(), value.clone()));
                vec![RemoteEvent::added(Snapshot::new(key, value), self.prev_key(index))]
            }
            Some(old_index) => {
                if self.entries[old_index].value == value {
                    return Vec::new();
                }
                self.entries.remove(old_index);
                let new_index = self.insertion_point(&key, &value);
                self.entries.insert(new_index, Item::new(key.clone(), value.clone()));

                let mut events = Vec::with_capacity(2);
                if new_index != old_index {
                    events.push(RemoteEvent::moved(
                        Snapshot::new(key.clone(), value.clone()),
                        self.prev_key(new_index),
                    ));
                }
                events.push(RemoteEvent::changed(Snapshot::new(key, value)));
                events
            }
        }
    }

    fn delete(&mut self, key: &Key) -> Vec<RemoteEvent> {
        match self.position(key) {
            Some(index) => {
                let item = self.entries.remove(index);
                vec![RemoteEvent::removed(Snapshot::new(item.key, item.value))]
            }
            None => Vec::new(),
        }
    }

    fn merged(&self, key: &Key, patch: Map<String, Value>) -> Value {
        let mut base = match self.position(key).map(|i| &self.entries[i].value) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        for (child, value) in patch {
            if value.is_null() {
                base.remove(&child);
            } else {
                base.insert(child, value);
            }
        }
        Value::Object(base)
    }

    fn dispatch(&self, events: Vec<RemoteEvent>) -> Dispatch {
        let listeners = if events.is_empty() {
            Vec::new()
        } else {
            self.listeners
                .iter()
                .map(|(handle, listener)| (handle.kind(), listener.clone()))
                .collect()
        };
        Dispatch { events, listeners }
    }
}

/// Null and empty objects are deletions.
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Thread-safe ordered collection with child-event listeners.
///
/// Listeners run outside the state lock but one write at a time, so every
/// listener sees writes in the order they were applied. A listener must not
/// write back into the collection it is subscribed to.
pub struct MemoryCollection {
    inner: Mutex<Inner>,
    /// Held from a write until its listeners have returned.
    delivery: Mutex<()>,
}

impl Default for MemoryCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCollection {
    /// Collection ordered by key.
    pub fn new() -> Self {
        Self::ordered_by(OrderBy::Key)
    }

    pub fn ordered_by(order: OrderBy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                order,
                entries: Vec::new(),
                listeners: Vec::new(),
                next_subscription: 1,
                push_ids: PushIdGenerator::new(),
            }),
            delivery: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` under `key`, replacing what was there.
    /// Storing `null` deletes the child.
    pub fn set(&self, key: impl Into<Key>, value: Value) {
        let _delivery = self.deliver();
        let dispatch = {
            let mut inner = self.lock();
            let events = inner.write(key.into(), value);
            inner.dispatch(events)
        };
        dispatch.run();
    }

    /// Keys in server order.
    pub fn keys(&self) -> Vec<Key> {
        self.lock().entries.iter().map(|item| item.key.clone()).collect()
    }

    /// Snapshot of all children in server order.
    pub fn items(&self) -> Vec<Item> {
        self.lock().entries.clone()
    }

    pub fn get(&self, key: &Key) -> Option<Value> {
        let inner = self.lock();
        inner.position(key).map(|i| inner.entries[i].value.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Number of live subscriptions across all kinds.
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }
}

impl RemoteCollection for MemoryCollection {
    fn subscribe(&self, kind: EventKind, listener: Listener) -> SubscriptionHandle {
        // No write may reach the new listener ahead of its replay.
        let _delivery = self.deliver();
        let (handle, replay) = {
            let mut inner = self.lock();
            let handle = SubscriptionHandle::new(inner.next_subscription, kind);
            inner.next_subscription += 1;
            inner.listeners.push((handle, listener.clone()));

            let replay: Vec<RemoteEvent> = if kind == EventKind::Added {
                inner
                    .entries
                    .iter()
                    .enumerate()
                    .map(|(index, item)| {
                        RemoteEvent::added(
                            Snapshot::new(item.key.clone(), item.value.clone()),
                            inner.prev_key(index),
                        )
                    })
                    .collect()
            } else {
                Vec::new()
            };
            (handle, replay)
        };

        log::trace!("Subscription {} ({kind}) replaying {} children", handle.id(), replay.len());
        for event in replay {
            listener(event);
        }
        handle
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.lock().listeners.retain(|(h, _)| *h != handle);
    }

    fn push(&self, value: Value) -> Key {
        let _delivery = self.deliver();
        let (key, dispatch) = {
            let mut inner = self.lock();
            let key = inner.push_ids.next_key();
            let events = inner.write(key.clone(), value);
            (key, inner.dispatch(events))
        };
        dispatch.run();
        key
    }

    fn update(&self, key: &Key, patch: Map<String, Value>) {
        let _delivery = self.deliver();
        let dispatch = {
            let mut inner = self.lock();
            let merged = inner.merged(key, patch);
            let events = inner.write(key.clone(), merged);
            inner.dispatch(events)
        };
        dispatch.run();
    }

    fn remove(&self, key: &Key) {
        let _delivery = self.deliver();
        let dispatch = {
            let mut inner = self.lock();
            let events = inner.delete(key);
            inner.dispatch(events)
        };
        dispatch.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn recorder(collection: &MemoryCollection, kind: EventKind) -> Arc<Mutex<Vec<RemoteEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        collection.subscribe(kind, Arc::new(move |event: RemoteEvent| sink.lock().unwrap().push(event)));
        seen
    }

    fn patch(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("patch must be an object"),
        }
    }

    #[test]
    fn test_push_keys_follow_insertion_order() {
        let collection = MemoryCollection::new();
        let a = collection.push(json!({"text": "a"}));
        let b = collection.push(json!({"text": "b"}));
        let c = collection.push(json!({"text": "c"}));
        assert_eq!(collection.keys(), vec![a, b, c]);
    }

    #[test]
    fn test_added_carries_prev_key() {
        let collection = MemoryCollection::new();
        let added = recorder(&collection, EventKind::Added);

        collection.set("b", json!(2));
        collection.set("a", json!(1));
        collection.set("c", json!(3));

        let events = added.lock().unwrap();
        let prevs: Vec<Option<&str>> = events
            .iter()
            .map(|e| e.prev_key().map(Key::as_str))
            .collect();
        assert_eq!(prevs, vec![None, None, Some("b")]);
    }

    #[test]
    fn test_subscribe_added_replays_existing_children() {
        let collection = MemoryCollection::new();
        collection.set("a", json!(1));
        collection.set("b", json!(2));

        let added = recorder(&collection, EventKind::Added);
        let events = added.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], RemoteEvent::added(Snapshot::new("a", json!(1)), None));
        assert_eq!(
            events[1],
            RemoteEvent::added(Snapshot::new("b", json!(2)), Some(Key::from("a")))
        );
    }

    #[test]
    fn test_child_order_change_emits_moved_then_changed() {
        let collection = MemoryCollection::ordered_by(OrderBy::Child("rank".into()));
        collection.set("a", json!({"rank": 1}));
        collection.set("b", json!({"rank": 2}));

        let moved = recorder(&collection, EventKind::Moved);
        let changed = recorder(&collection, EventKind::Changed);

        collection.update(&Key::from("a"), patch(json!({"rank": 3})));

        assert_eq!(collection.keys(), vec![Key::from("b"), Key::from("a")]);
        let moved = moved.lock().unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].prev_key().map(Key::as_str), Some("b"));
        assert_eq!(changed.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_update_merges_and_null_deletes_child() {
        let collection = MemoryCollection::new();
        collection.set("a", json!({"text": "hi", "done": false}));
        collection.update(&Key::from("a"), patch(json!({"done": true, "text": null})));
        assert_eq!(collection.get(&Key::from("a")), Some(json!({"done": true})));
    }

    #[test]
    fn test_update_to_empty_object_removes() {
        let collection = MemoryCollection::new();
        collection.set("a", json!({"text": "hi"}));
        let removed = recorder(&collection, EventKind::Removed);
        collection.update(&Key::from("a"), patch(json!({"text": null})));
        assert!(collection.is_empty());
        assert_eq!(removed.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_identical_write_emits_nothing() {
        let collection = MemoryCollection::new();
        collection.set("a", json!(1));
        let changed = recorder(&collection, EventKind::Changed);
        collection.set("a", json!(1));
        assert!(changed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_remove_absent_key_is_noop() {
        let collection = MemoryCollection::new();
        let removed = recorder(&collection, EventKind::Removed);
        collection.remove(&Key::from("ghost"));
        assert!(removed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let collection = MemoryCollection::new();
        let seen = Arc::new(Mutex::new(0usize));
        let sink = seen.clone();
        let handle = collection.subscribe(
            EventKind::Added,
            Arc::new(move |_: RemoteEvent| *sink.lock().unwrap() += 1),
        );
        collection.set("a", json!(1));
        collection.unsubscribe(handle);
        collection.set("b", json!(2));
        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(collection.listener_count(), 0);
    }

    #[test]
    fn test_concurrent_writers_deliver_in_apply_order() {
        let collection = Arc::new(MemoryCollection::new());
        collection.set("x", json!(0));
        let changed = recorder(&collection, EventKind::Changed);

        let writers: Vec<_> = (1..=4)
            .map(|writer| {
                let collection = collection.clone();
                std::thread::spawn(move || {
                    for n in 0..250 {
                        collection.set("x", json!(writer * 1000 + n));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let events = changed.lock().unwrap();
        assert_eq!(events.len(), 1000);
        let last = events.last().map(|event| event.snapshot().value.clone());
        assert_eq!(last, collection.get(&Key::from("x")));
    }

    #[test]
    fn test_replay_precedes_later_writes() {
        let collection = Arc::new(MemoryCollection::new());
        collection.set("a", json!(1));

        let writer = {
            let collection = collection.clone();
            std::thread::spawn(move || {
                for n in 0..100 {
                    collection.set(format!("k{n:03}"), json!(n));
                }
            })
        };
        let added = recorder(&collection, EventKind::Added);
        writer.join().unwrap();

        // Every event is positioned after something already delivered.
        let events = added.lock().unwrap();
        let mut delivered: Vec<&Key> = Vec::new();
        for event in events.iter() {
            if let Some(prev) = event.prev_key() {
                assert!(delivered.contains(&prev), "{prev} not delivered yet");
            }
            delivered.push(event.key().unwrap());
        }
        assert_eq!(delivered.len(), collection.len());
    }
}
