//! Integration tests for mirrors speaking to a host over the wire protocol.
//!
//! These tests run a real host session per client and verify the full
//! write → echo → mirror pipeline.

use rowsync_collab::{CollectionHost, ConnectionState, SyncMessage, Transport, WireCollection};
use rowsync_core::{
    CollectionFacade, EventKind, Key, MemoryCollection, Notification, OrderBy, RemoteCollection,
    RemoteEvent, Snapshot,
};
use serde_json::{json, Map};
use std::sync::Arc;
use tokio::time::{timeout, Duration};

fn ranked_host() -> CollectionHost {
    CollectionHost::new(Arc::new(MemoryCollection::ordered_by(OrderBy::Child(
        "rank".into(),
    ))))
}

fn connected(host: &CollectionHost) -> Arc<WireCollection> {
    let client = Arc::new(WireCollection::new());
    client.connect(host.connect());
    client
}

/// Pump notifications until `done` holds, failing after two seconds.
async fn pump_until(
    facade: &mut CollectionFacade<WireCollection>,
    mut done: impl FnMut(&CollectionFacade<WireCollection>) -> bool,
) -> Vec<Notification> {
    let mut seen = Vec::new();
    timeout(Duration::from_secs(2), async {
        while !done(facade) {
            if let Some(notification) = facade.process_next().await {
                seen.push(notification);
            }
        }
    })
    .await
    .expect("condition within timeout");
    seen
}

fn keys(facade: &CollectionFacade<WireCollection>) -> Vec<Key> {
    facade.items().iter().map(|item| item.key.clone()).collect()
}

#[tokio::test]
async fn test_append_round_trips_through_host() {
    let host = CollectionHost::new(Arc::new(MemoryCollection::new()));
    let mut facade = CollectionFacade::new(connected(&host));
    facade.start_syncing();

    let key = facade.append(json!({"text": "hello"}));
    assert_eq!(facade.count(), 0);

    let seen = pump_until(&mut facade, |f| f.count() == 1).await;
    assert!(matches!(&seen[0], Notification::ItemAdded { path, .. } if path.row == 0));
    assert_eq!(facade.item_at(0).unwrap().key, key);
    assert_eq!(host.collection().get(&key), Some(json!({"text": "hello"})));
}

#[tokio::test]
async fn test_two_clients_converge() {
    let host = ranked_host();
    let mut left = CollectionFacade::new(connected(&host));
    let mut right = CollectionFacade::new(connected(&host));
    left.start_syncing();
    right.start_syncing();

    left.append(json!({"rank": 3, "text": "c"}));
    right.append(json!({"rank": 1, "text": "a"}));
    left.append(json!({"rank": 2, "text": "b"}));

    pump_until(&mut left, |f| f.count() == 3).await;
    pump_until(&mut right, |f| f.count() == 3).await;
    assert_eq!(keys(&left), keys(&right));

    // Move the head to the tail from the other client.
    let mut patch = Map::new();
    patch.insert("rank".into(), json!(10));
    right.update_at(0, patch).unwrap();

    let seen = pump_until(&mut left, |f| f.item_at(2).map(|i| i.value["rank"] == 10).unwrap_or(false)).await;
    assert!(seen
        .iter()
        .any(|n| matches!(n, Notification::ItemMoved { from, to, .. } if from.row == 0 && to.row == 2)));

    pump_until(&mut right, |f| f.item_at(2).map(|i| i.value["rank"] == 10).unwrap_or(false)).await;
    assert_eq!(keys(&left), keys(&right));
    let server: Vec<Key> = host.collection().keys();
    assert_eq!(keys(&left), server);
}

#[tokio::test]
async fn test_offline_writes_replay_on_connect() {
    let host = CollectionHost::new(Arc::new(MemoryCollection::new()));
    let client = Arc::new(WireCollection::new());
    let mut facade = CollectionFacade::new(client.clone());
    facade.start_syncing();

    let first = facade.append(json!({"text": "one"}));
    let second = facade.append(json!({"text": "two"}));
    assert_eq!(client.offline_queue_len(), 2);

    client.connect(host.connect());
    pump_until(&mut facade, |f| f.count() == 2).await;
    assert_eq!(keys(&facade), vec![first, second]);
    assert_eq!(client.offline_queue_len(), 0);
}

#[tokio::test]
async fn test_resubscribe_replay_is_reported_as_changes() {
    let host = CollectionHost::new(Arc::new(MemoryCollection::new()));
    let client = connected(&host);
    let mut facade = CollectionFacade::new(client.clone());
    facade.start_syncing();
    facade.append(json!({"text": "a"}));
    facade.append(json!({"text": "b"}));
    pump_until(&mut facade, |f| f.count() == 2).await;
    let before = keys(&facade);

    client.disconnect();
    client.connect(host.connect());

    let mut replayed = Vec::new();
    timeout(Duration::from_secs(2), async {
        while replayed.len() < 2 {
            if let Some(notification) = facade.process_next().await {
                replayed.push(notification);
            }
        }
    })
    .await
    .unwrap();

    // The new session replays every child as added; each lands where it is.
    assert!(replayed
        .iter()
        .all(|n| matches!(n, Notification::ItemChanged { .. })));
    assert_eq!(keys(&facade), before);
}

#[tokio::test]
async fn test_reconnect_drops_children_removed_while_offline() {
    let host = CollectionHost::new(Arc::new(MemoryCollection::new()));
    let client = connected(&host);
    let mut facade = CollectionFacade::new(client.clone());
    facade.start_syncing();
    let first = facade.append(json!({"text": "one"}));
    let second = facade.append(json!({"text": "two"}));
    pump_until(&mut facade, |f| f.count() == 2).await;

    client.disconnect();
    host.collection().remove(&first);
    let third = host.collection().push(json!({"text": "three"}));
    client.connect(host.connect());
    assert_eq!(client.subscription_count(), EventKind::ALL.len());

    let server = host.collection().keys();
    assert_eq!(server, vec![second.clone(), third.clone()]);
    let seen = pump_until(&mut facade, |f| keys(f) == server).await;

    assert!(seen.iter().any(
        |n| matches!(n, Notification::ItemRemoved { item, .. } if item.key == first)
    ));
    assert!(seen.iter().any(
        |n| matches!(n, Notification::ItemAdded { path, item } if path.row == 1 && item.key == third)
    ));
    assert_eq!(facade.count(), 2);
}

#[tokio::test]
async fn test_corrupt_frame_is_skipped() {
    let client = Arc::new(WireCollection::new());
    let (local, fake_host) = Transport::pair();
    client.connect(local);

    let mut facade = CollectionFacade::new(client.clone());
    facade.start_syncing();

    // Added is the first kind subscribed, so it gets subscription 1.
    let event = RemoteEvent::added(Snapshot::new("a", json!({"text": "ok"})), None);
    fake_host.outgoing.send(b"not a frame".to_vec()).unwrap();
    let mut keyless = SyncMessage::event(1, &event).unwrap();
    keyless.key = None;
    fake_host.outgoing.send(keyless.encode().unwrap()).unwrap();
    fake_host
        .outgoing
        .send(SyncMessage::event(1, &event).unwrap().encode().unwrap())
        .unwrap();

    pump_until(&mut facade, |f| f.count() == 1).await;
    assert_eq!(facade.item_at(0).unwrap().key, Key::from("a"));
    assert_eq!(client.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_stop_syncing_unsubscribes_on_host() {
    let host = CollectionHost::new(Arc::new(MemoryCollection::new()));
    let mut facade = CollectionFacade::new(connected(&host));
    facade.start_syncing();

    timeout(Duration::from_secs(2), async {
        while host.collection().listener_count() < EventKind::ALL.len() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    facade.stop_syncing();
    timeout(Duration::from_secs(2), async {
        while host.collection().listener_count() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(facade.count(), 0);
}
