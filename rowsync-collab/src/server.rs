//! Serves a shared [`MemoryCollection`] to any number of wire clients.
//!
//! Architecture:
//! ```text
//! Client A ──Transport──► session task ──┐
//!                                        ├── MemoryCollection (authority)
//! Client B ──Transport──► session task ──┘          │
//!     ▲                                              │ child events
//!     └──────────────── Event frames ◄───────────────┘
//! ```
//!
//! Each session owns the subscriptions its client asked for and drops them
//! when the client hangs up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rowsync_core::{Listener, MemoryCollection, RemoteCollection, RemoteEvent, SubscriptionHandle};
use tokio::sync::mpsc;

use crate::client::Transport;
use crate::protocol::{MessageType, ProtocolError, SyncMessage};

/// Host statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostStats {
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub undecodable_frames: u64,
}

#[derive(Default)]
struct Counters {
    total_sessions: AtomicU64,
    active_sessions: AtomicU64,
    total_frames: AtomicU64,
    total_bytes: AtomicU64,
    undecodable_frames: AtomicU64,
}

/// The collection host.
#[derive(Clone)]
pub struct CollectionHost {
    collection: Arc<MemoryCollection>,
    counters: Arc<Counters>,
}

impl CollectionHost {
    pub fn new(collection: Arc<MemoryCollection>) -> Self {
        Self {
            collection,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Open a session and return the client's end of its transport.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn connect(&self) -> Transport {
        let (client, host) = Transport::pair();
        let session_id = self.counters.total_sessions.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters.active_sessions.fetch_add(1, Ordering::Relaxed);
        log::info!("Session {session_id} opened");

        let session = HostSession {
            id: session_id,
            collection: self.collection.clone(),
            counters: self.counters.clone(),
            outgoing: host.outgoing,
            subscriptions: HashMap::new(),
        };
        tokio::spawn(session.run(host.incoming));
        client
    }

    pub fn collection(&self) -> &Arc<MemoryCollection> {
        &self.collection
    }

    pub fn stats(&self) -> HostStats {
        let c = &self.counters;
        HostStats {
            total_sessions: c.total_sessions.load(Ordering::Relaxed),
            active_sessions: c.active_sessions.load(Ordering::Relaxed),
            total_frames: c.total_frames.load(Ordering::Relaxed),
            total_bytes: c.total_bytes.load(Ordering::Relaxed),
            undecodable_frames: c.undecodable_frames.load(Ordering::Relaxed),
        }
    }
}

struct HostSession {
    id: u64,
    collection: Arc<MemoryCollection>,
    counters: Arc<Counters>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    /// Client subscription id → handle on the collection
    subscriptions: HashMap<u64, SubscriptionHandle>,
}

impl HostSession {
    async fn run(mut self, mut incoming: mpsc::UnboundedReceiver<Vec<u8>>) {
        while let Some(bytes) = incoming.recv().await {
            self.counters.total_frames.fetch_add(1, Ordering::Relaxed);
            self.counters.total_bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);

            let msg = match SyncMessage::decode(&bytes) {
                Ok(msg) => msg,
                Err(e) => {
                    self.counters.undecodable_frames.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Session {}: skipping undecodable frame: {e}", self.id);
                    continue;
                }
            };
            if let Err(e) = self.handle(msg) {
                log::warn!("Session {}: rejected request: {e}", self.id);
            }
        }

        for (_, handle) in self.subscriptions.drain() {
            self.collection.unsubscribe(handle);
        }
        self.counters.active_sessions.fetch_sub(1, Ordering::Relaxed);
        log::info!("Session {} closed", self.id);
    }

    fn handle(&mut self, msg: SyncMessage) -> Result<(), ProtocolError> {
        match msg.msg_type {
            MessageType::Subscribe => {
                let kind = msg.kind.ok_or(ProtocolError::MissingField("kind"))?;
                if let Some(old) = self.subscriptions.remove(&msg.subscription) {
                    self.collection.unsubscribe(old);
                }
                let handle = self.collection.subscribe(kind, self.forwarder(msg.subscription));
                self.subscriptions.insert(msg.subscription, handle);
                log::debug!("Session {}: subscription {} ({kind})", self.id, msg.subscription);

                // The replay went out through the same channel, so this
                // lands after it.
                let frame = SyncMessage::synced(msg.subscription).encode()?;
                self.outgoing.send(frame).map_err(|_| ProtocolError::ConnectionClosed)?;
            }
            MessageType::Unsubscribe => {
                if let Some(handle) = self.subscriptions.remove(&msg.subscription) {
                    self.collection.unsubscribe(handle);
                }
            }
            MessageType::Set => {
                let key = msg.require_key()?.clone();
                self.collection.set(key, msg.value()?);
            }
            MessageType::Update => {
                let key = msg.require_key()?.clone();
                self.collection.update(&key, msg.patch()?);
            }
            MessageType::Remove => {
                self.collection.remove(msg.require_key()?);
            }
            MessageType::Ping => {
                let frame = SyncMessage::pong().encode()?;
                self.outgoing.send(frame).map_err(|_| ProtocolError::ConnectionClosed)?;
            }
            MessageType::Event | MessageType::Pong | MessageType::Synced => {
                return Err(ProtocolError::InvalidMessageType)
            }
        }
        Ok(())
    }

    /// Listener that turns child events into Event frames for one subscription.
    fn forwarder(&self, subscription: u64) -> Listener {
        let outgoing = self.outgoing.clone();
        let session = self.id;
        Arc::new(move |event: RemoteEvent| {
            match SyncMessage::event(subscription, &event).and_then(|msg| msg.encode()) {
                Ok(frame) => {
                    // A closed client is cleaned up when its session loop ends.
                    let _ = outgoing.send(frame);
                }
                Err(e) => log::error!("Session {session}: failed to encode event: {e}"),
            }
        })
    }
}
