//! [`RemoteCollection`] spoken over a byte [`Transport`].
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, reconnect on a new transport)
//! - Subscription bookkeeping that survives reconnects
//! - Resync on reconnect: children deleted while offline are reported removed
//! - Offline queue for writes made while disconnected
//!
//! Writes are sent and forgotten. Their effect comes back from the host as
//! ordinary child events, exactly as for writes made by anyone else.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rowsync_core::{
    EventKind, Key, Listener, PushIdGenerator, RemoteCollection, RemoteEvent, Snapshot,
    SubscriptionHandle,
};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::protocol::{MessageType, ProtocolError, SyncMessage};

/// Default number of frames kept while disconnected.
pub const DEFAULT_OFFLINE_CAPACITY: usize = 10_000;

/// One side of a bidirectional byte channel.
pub struct Transport {
    pub outgoing: mpsc::UnboundedSender<Vec<u8>>,
    pub incoming: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Transport {
    /// Two cross-wired ends: whatever one side sends, the other receives.
    pub fn pair() -> (Transport, Transport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Transport {
                outgoing: a_tx,
                incoming: b_rx,
            },
            Transport {
                outgoing: b_tx,
                incoming: a_rx,
            },
        )
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Offline queue for writes made while disconnected.
///
/// Queued frames are replayed, in order, on the next connect.
#[derive(Debug)]
pub struct OfflineQueue {
    queue: VecDeque<Vec<u8>>,
    max_size: usize,
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new(DEFAULT_OFFLINE_CAPACITY)
    }
}

impl OfflineQueue {
    /// Create a new offline queue with max capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue a frame for later replay. Returns `false` when full.
    pub fn enqueue(&mut self, frame: Vec<u8>) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(frame);
        true
    }

    /// Drain all queued frames for replay.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Total bytes queued.
    pub fn total_bytes(&self) -> usize {
        self.queue.iter().map(Vec::len).sum()
    }
}

/// Reconnect in progress: keys not yet seen in the host's replay.
struct Resync {
    stale: BTreeSet<Key>,
    /// Added subscriptions whose replay has not finished.
    awaiting: BTreeSet<u64>,
}

struct Session {
    state: ConnectionState,
    /// Bumped on every connect/disconnect so a stale reader cannot clobber a
    /// newer connection.
    generation: u64,
    outgoing: Option<mpsc::UnboundedSender<Vec<u8>>>,
    listeners: BTreeMap<u64, (EventKind, Listener)>,
    next_subscription: u64,
    offline_queue: OfflineQueue,
    push_ids: PushIdGenerator,
    /// Keys added and not yet removed, as last reported by the host.
    known: BTreeSet<Key>,
    resync: Option<Resync>,
}

impl Session {
    /// Send now, or queue for the next connect.
    fn send_or_queue(&mut self, frame: Vec<u8>) {
        let mut frame = frame;
        if self.state == ConnectionState::Connected {
            if let Some(tx) = &self.outgoing {
                match tx.send(frame) {
                    Ok(()) => return,
                    Err(mpsc::error::SendError(returned)) => frame = returned,
                }
            }
            log::info!("Transport closed; switching to offline mode");
            self.state = ConnectionState::Disconnected;
            self.outgoing = None;
        }
        if !self.offline_queue.enqueue(frame) {
            log::warn!(
                "Offline queue full ({} frames); dropping write",
                self.offline_queue.len()
            );
        }
    }

    /// Control frames are only meaningful on a live connection.
    fn send_if_connected(&mut self, frame: Vec<u8>) {
        if self.state != ConnectionState::Connected {
            return;
        }
        if let Some(tx) = &self.outgoing {
            if tx.send(frame).is_err() {
                self.state = ConnectionState::Disconnected;
                self.outgoing = None;
            }
        }
    }

    fn added_subscriptions(&self) -> BTreeSet<u64> {
        self.listeners
            .iter()
            .filter(|(_, (kind, _))| *kind == EventKind::Added)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Track which keys the host has reported, and strike them off the
    /// stale set during a resync.
    fn observe(&mut self, event: &RemoteEvent) {
        let Some(key) = event.key() else {
            return;
        };
        match event.kind() {
            EventKind::Added => {
                self.known.insert(key.clone());
            }
            EventKind::Removed => {
                self.known.remove(key);
            }
            EventKind::Changed | EventKind::Moved => return,
        }
        if let Some(resync) = &mut self.resync {
            resync.stale.remove(key);
        }
    }

    /// The host finished replaying `subscription`. Once every Added replay
    /// is in, returns the keys that were not replayed and the listeners that
    /// should hear about their removal.
    fn replay_finished(&mut self, subscription: u64) -> Option<(Vec<Key>, Vec<Listener>)> {
        let resync = self.resync.as_mut()?;
        resync.awaiting.remove(&subscription);
        if !resync.awaiting.is_empty() {
            return None;
        }
        let stale = self.resync.take()?.stale;
        let listeners = self
            .listeners
            .values()
            .filter(|(kind, _)| *kind == EventKind::Removed)
            .map(|(_, listener)| listener.clone())
            .collect();
        Some((stale.into_iter().collect(), listeners))
    }
}

/// A remote collection reached through a [`Transport`].
///
/// Cloning shares the same connection and subscriptions.
#[derive(Clone)]
pub struct WireCollection {
    session: Arc<Mutex<Session>>,
}

impl Default for WireCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl WireCollection {
    /// Create a disconnected client.
    pub fn new() -> Self {
        Self::with_offline_capacity(DEFAULT_OFFLINE_CAPACITY)
    }

    pub fn with_offline_capacity(capacity: usize) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session {
                state: ConnectionState::Disconnected,
                generation: 0,
                outgoing: None,
                listeners: BTreeMap::new(),
                next_subscription: 1,
                offline_queue: OfflineQueue::new(capacity),
                push_ids: PushIdGenerator::new(),
                known: BTreeSet::new(),
                resync: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start talking over `transport`.
    ///
    /// Re-subscribes every live listener, replays queued writes, then spawns
    /// the reader task on the current Tokio runtime.
    ///
    /// The host answers each Added subscription with a full replay. Keys
    /// mirrored before the connect that do not show up in it were deleted in
    /// the meantime and are delivered to Removed listeners as removals.
    pub fn connect(&self, transport: Transport) {
        let Transport { outgoing, incoming } = transport;

        let generation = {
            let mut session = self.lock();
            session.generation += 1;
            session.state = ConnectionState::Connected;
            session.outgoing = Some(outgoing.clone());

            let mut stale = std::mem::take(&mut session.known);
            if let Some(unfinished) = session.resync.take() {
                stale.extend(unfinished.stale);
            }
            let awaiting = session.added_subscriptions();
            if !stale.is_empty() && !awaiting.is_empty() {
                session.resync = Some(Resync { stale, awaiting });
            }

            for (id, (kind, _)) in &session.listeners {
                match SyncMessage::subscribe(*id, *kind).encode() {
                    Ok(frame) => {
                        let _ = outgoing.send(frame);
                    }
                    Err(e) => log::error!("Failed to encode subscribe {id}: {e}"),
                }
            }

            let queued = session.offline_queue.drain();
            if !queued.is_empty() {
                log::info!("Replaying {} queued writes", queued.len());
            }
            for frame in queued {
                session.send_or_queue(frame);
            }
            session.generation
        };
        log::info!("Connected (generation {generation})");

        tokio::spawn(read_loop(Arc::downgrade(&self.session), incoming, generation));
    }

    /// Stop sending. Later writes are queued until the next connect.
    pub fn disconnect(&self) {
        let mut session = self.lock();
        if session.state == ConnectionState::Disconnected {
            return;
        }
        session.generation += 1;
        session.state = ConnectionState::Disconnected;
        session.outgoing = None;
        log::info!("Disconnected");
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn offline_queue_len(&self) -> usize {
        self.lock().offline_queue.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Send a heartbeat. Fails when not connected.
    pub fn ping(&self) -> Result<(), ProtocolError> {
        let frame = SyncMessage::ping().encode()?;
        let session = self.lock();
        match (&session.state, &session.outgoing) {
            (ConnectionState::Connected, Some(tx)) => {
                tx.send(frame).map_err(|_| ProtocolError::ConnectionClosed)
            }
            _ => Err(ProtocolError::ConnectionClosed),
        }
    }

    fn write(&self, frame: Result<SyncMessage, ProtocolError>, key: &Key) {
        match frame.and_then(|msg| msg.encode()) {
            Ok(bytes) => self.lock().send_or_queue(bytes),
            Err(e) => log::error!("Dropping write to {key}: {e}"),
        }
    }
}

impl RemoteCollection for WireCollection {
    fn subscribe(&self, kind: EventKind, listener: Listener) -> SubscriptionHandle {
        let mut session = self.lock();
        let id = session.next_subscription;
        session.next_subscription += 1;
        session.listeners.insert(id, (kind, listener));

        match SyncMessage::subscribe(id, kind).encode() {
            Ok(frame) => session.send_if_connected(frame),
            Err(e) => log::error!("Failed to encode subscribe {id}: {e}"),
        }
        SubscriptionHandle::new(id, kind)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut session = self.lock();
        if session.listeners.remove(&handle.id()).is_none() {
            return;
        }
        if session.added_subscriptions().is_empty() {
            session.known.clear();
            session.resync = None;
        }
        match SyncMessage::unsubscribe(handle.id()).encode() {
            Ok(frame) => session.send_if_connected(frame),
            Err(e) => log::error!("Failed to encode unsubscribe {}: {e}", handle.id()),
        }
    }

    fn push(&self, value: Value) -> Key {
        let key = self.lock().push_ids.next_key();
        self.write(SyncMessage::set(&key, &value), &key);
        key
    }

    fn update(&self, key: &Key, patch: Map<String, Value>) {
        self.write(SyncMessage::update(key, &patch), key);
    }

    fn remove(&self, key: &Key) {
        self.write(Ok(SyncMessage::remove(key)), key);
    }
}

/// Decode frames and hand events to their listeners until the peer hangs up
/// or every [`WireCollection`] handle is gone.
async fn read_loop(
    session: Weak<Mutex<Session>>,
    mut incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    generation: u64,
) {
    while let Some(bytes) = incoming.recv().await {
        let Some(shared) = session.upgrade() else {
            return;
        };
        let lock = || shared.lock().unwrap_or_else(PoisonError::into_inner);
        if lock().generation != generation {
            return;
        }

        let msg = match SyncMessage::decode(&bytes) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Skipping undecodable frame ({} bytes): {e}", bytes.len());
                continue;
            }
        };

        match msg.msg_type {
            MessageType::Event => {
                let event = match msg.remote_event() {
                    Ok(event) => event,
                    Err(e) => {
                        log::warn!("Skipping malformed event: {e}");
                        continue;
                    }
                };
                let listener = {
                    let mut current = lock();
                    let listener = current
                        .listeners
                        .get(&msg.subscription)
                        .map(|(_, listener)| listener.clone());
                    if listener.is_some() {
                        current.observe(&event);
                    }
                    listener
                };
                // Events for a subscription that is already gone are expected.
                if let Some(listener) = listener {
                    listener(event);
                }
            }
            MessageType::Synced => {
                let finished = lock().replay_finished(msg.subscription);
                if let Some((stale, listeners)) = finished {
                    if !stale.is_empty() {
                        log::info!("Resync: {} children were removed while offline", stale.len());
                    }
                    for key in stale {
                        let event = RemoteEvent::removed(Snapshot::new(key, Value::Null));
                        for listener in &listeners {
                            listener(event.clone());
                        }
                    }
                }
            }
            MessageType::Pong => log::trace!("Pong"),
            other => log::debug!("Ignoring {other:?} from host"),
        }
    }

    let Some(shared) = session.upgrade() else {
        return;
    };
    let mut current = shared.lock().unwrap_or_else(PoisonError::into_inner);
    if current.generation == generation && current.state == ConnectionState::Connected {
        current.state = ConnectionState::Disconnected;
        current.outgoing = None;
        log::info!("Host closed the connection");
    }
}
