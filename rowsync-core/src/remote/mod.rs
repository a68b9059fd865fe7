//! Interface to the remote collection that owns the authoritative order.
//!
//! The mirror never talks to a network directly. It is handed something
//! that implements [`RemoteCollection`]: an in-process
//! [`MemoryCollection`], or a wire client such as the one in
//! `rowsync-collab`.

pub mod memory;
pub mod order;
pub mod push_id;

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::event::{EventKind, RemoteEvent};
use crate::item::Key;

pub use memory::MemoryCollection;
pub use order::{compare_values, OrderBy};
pub use push_id::PushIdGenerator;

/// Callback invoked for every event of the subscribed kind.
///
/// May be called from any thread. Implementations of [`RemoteCollection`]
/// invoke listeners with no internal lock held.
pub type Listener = Arc<dyn Fn(RemoteEvent) + Send + Sync>;

/// Revocable token for one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    kind: EventKind,
}

impl SubscriptionHandle {
    pub fn new(id: u64, kind: EventKind) -> Self {
        Self { id, kind }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

/// The remote collaborator.
///
/// Writes are requests: none of them report completion. Their effect is
/// observed only when the matching event comes back through a listener.
pub trait RemoteCollection: Send + Sync {
    /// Start receiving events of one kind. Subscribing to
    /// [`EventKind::Added`] replays the current children first.
    fn subscribe(&self, kind: EventKind, listener: Listener) -> SubscriptionHandle;

    /// Revoke a subscription. Unknown handles are ignored.
    fn unsubscribe(&self, handle: SubscriptionHandle);

    /// Generate a fresh unique key and store `value` under it.
    fn push(&self, value: Value) -> Key;

    /// Merge `patch` into the value stored under `key`.
    fn update(&self, key: &Key, patch: Map<String, Value>);

    /// Delete the value stored under `key`.
    fn remove(&self, key: &Key);
}
