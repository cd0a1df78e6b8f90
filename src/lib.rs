//! Hydration sanctuary: shared water-bottle state for two viewers.
//!
//! ARCHITECTURE
//! ============
//! The [`controller::SanctuaryController`] mirrors one room document held by a
//! [`store::DocumentStore`]. It reduces every snapshot the store pushes into
//! local state, applies the daily-reset rule, and turns user intents (add a
//! sip, send a note, open a note) into optimistic local mutations followed by
//! fire-and-forget partial updates.
//!
//! Store implementations:
//! - [`store::MemoryStore`]: in-process, used by tests and demos.
//! - [`store::RemoteStore`]: websocket client for the `server` crate.

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod gesture;
pub mod room;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::SanctuaryConfig;
pub use controller::{LocalState, PendingWrite, SanctuaryController, SnapshotAction, SyncEvent, WriteKind};
pub use error::{ConfigError, StoreError};
pub use room::{DayStatus, Field, RoomDocument, RoomPatch};
pub use store::{CreateOutcome, DocumentStore, MemoryStore, RemoteStore, Snapshot, Subscription, WriteAck};
