//! # rowsync-core: Ordered mirrors of remote collections
//!
//! Keeps a local, ordered copy of a server-side child collection in step
//! with the server's child events, and exposes it to list widgets as
//! row/section positions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  added/changed/   ┌──────────────────┐
//! │ RemoteCollection │  removed/moved    │  OrderedMirror   │
//! │ (server handle)  │ ────────────────► │  Vec<Item>       │
//! └────────▲─────────┘                   └────────┬─────────┘
//!          │ push / update / remove               │ Delta
//!          │                                      ▼
//!          │                             ┌──────────────────┐
//!          └──────────────────────────── │ CollectionFacade │
//!                                        │ (IndexPath)      │
//!                                        └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`item`]: Keys, items and event snapshots
//! - [`event`]: Remote events and the deltas they produce
//! - [`remote`]: The server handle trait, push keys and an in-process server
//! - [`mirror`]: The ordered mirror
//! - [`facade`]: Presentation-facing notifications
//! - [`observer`]: Callback registries
//! - [`error`]: Error type

pub mod error;
pub mod event;
pub mod facade;
pub mod item;
pub mod mirror;
pub mod observer;
pub mod remote;

// Re-exports for convenience
pub use error::{MirrorError, Result};
pub use event::{Delta, EventKind, RemoteEvent};
pub use facade::{CollectionFacade, FacadeConfig, IndexPath, Notification};
pub use item::{Item, Key, Snapshot};
pub use mirror::{MirrorConfig, OrderedMirror, Target};
pub use observer::ObserverId;
pub use remote::{
    Listener, MemoryCollection, OrderBy, PushIdGenerator, RemoteCollection, SubscriptionHandle,
};
