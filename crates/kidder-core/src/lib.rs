//! # kidder-core
//!
//! The real-time message hub behind Kidder chat.
//!
//! This crate provides the moving parts of the hub:
//!
//! - **Registry** - the live set of participants, behind one lock
//! - **Hub** - the single ordered broadcast queue and its fan-out task
//! - **Session** - one participant's connection lifecycle
//! - **NameAllocator** - best-effort unique display names
//! - **MessageStore** - append-only message persistence
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  accept   ┌─────────────┐  queue   ┌─────────────┐
//! │   Session   │──────────▶│     Hub     │─────────▶│   FanOut    │
//! └─────────────┘           └─────────────┘          └─────────────┘
//!        │                         │                        │
//!        │ register                ▼                        ▼
//!        │                  ┌─────────────┐          ┌─────────────┐
//!        └─────────────────▶│  Registry   │◀─────────│   (prune)   │
//!                           └─────────────┘          └─────────────┘
//! ```

pub mod hub;
pub mod message;
pub mod names;
pub mod registry;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use hub::{BroadcastQueue, DeliveryReport, FanOut, Hub, HubConfig, HubError, Publisher};
pub use message::{InboundMessage, StoredMessage, ValidationError, SYSTEM_NICKNAME};
pub use names::NameAllocator;
pub use registry::{Participant, Registry, Visit};
pub use session::{Session, SessionError, SessionState};
pub use store::{MemoryStore, MessageStore, SqliteStore, StorageError};
