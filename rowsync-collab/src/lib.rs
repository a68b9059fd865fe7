//! # rowsync-collab: Remote collections over a byte transport
//!
//! Puts a wire between an [`OrderedMirror`](rowsync_core::OrderedMirror) and
//! the collection it mirrors.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐    Transport     ┌────────────────┐
//! │ WireCollection │ ◄──────────────► │ CollectionHost │
//! │ (per client)   │   Binary Proto   │ (one session   │
//! └───────┬────────┘                  │  per client)   │
//!         │                           └───────┬────────┘
//!         ▼                                   ▼
//! ┌────────────────┐                  ┌────────────────┐
//! │ OrderedMirror  │                  │MemoryCollection│
//! │ (local order)  │                  │ (authority)    │
//! └────────────────┘                  └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Binary wire protocol (bincode-encoded SyncMessage)
//! - [`client`]: `RemoteCollection` client with offline queue
//! - [`server`]: Host sessions over a shared collection

pub mod client;
pub mod protocol;
pub mod server;

// Re-exports for convenience
pub use client::{ConnectionState, OfflineQueue, Transport, WireCollection, DEFAULT_OFFLINE_CAPACITY};
pub use protocol::{MessageType, ProtocolError, SyncMessage};
pub use server::{CollectionHost, HostStats};
