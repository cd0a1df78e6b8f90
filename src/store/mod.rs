//! Document store client interface.
//!
//! DESIGN
//! ======
//! The controller never reaches a global store handle; it is handed an
//! implementation of [`DocumentStore`] at construction. Every write returns the
//! document version it produced, and every snapshot carries the version it
//! reflects, so callers can order what they see against what they wrote.
//!
//! LIFECYCLE
//! =========
//! A [`Subscription`] first yields the current snapshot, then one snapshot per
//! subsequent write to the document. Dropping it releases the subscription at
//! the store.

mod memory;
mod remote;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::room::{RoomDocument, RoomPatch};

pub use memory::MemoryStore;
pub use remote::RemoteStore;

/// Point-in-time copy of a room document.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub room_id: String,
    /// `None` when the document does not exist yet.
    pub document: Option<RoomDocument>,
    /// Monotonic per-document write counter; 0 while absent.
    pub version: u64,
}

/// Acknowledgement of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
    /// Document version produced by the write.
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOutcome {
    /// `false` when the document already existed and was left untouched.
    pub created: bool,
    pub version: u64,
}

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Read the document once.
    async fn get(&self, room_id: &str) -> Result<Snapshot, StoreError>;

    /// Create the document unless it already exists.
    async fn create_if_absent(&self, room_id: &str, document: &RoomDocument) -> Result<CreateOutcome, StoreError>;

    /// Replace the whole document, creating it if needed.
    async fn set(&self, room_id: &str, document: &RoomDocument) -> Result<WriteAck, StoreError>;

    /// Merge the patch's fields into an existing document.
    ///
    /// Fails with [`StoreError::NotFound`] when the document is absent.
    async fn update(&self, room_id: &str, patch: &RoomPatch) -> Result<WriteAck, StoreError>;

    /// Open a live subscription to the document.
    async fn subscribe(&self, room_id: &str) -> Result<Subscription, StoreError>;
}

/// Live stream of snapshots for one room.
pub struct Subscription {
    room_id: String,
    rx: mpsc::Receiver<Result<Snapshot, StoreError>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap a snapshot channel. `release` runs exactly once, on drop.
    pub fn new(
        room_id: impl Into<String>,
        rx: mpsc::Receiver<Result<Snapshot, StoreError>>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self { room_id: room_id.into(), rx, release: Some(Box::new(release)) }
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Next snapshot, an error that ends the stream, or `None` once closed.
    pub async fn next(&mut self) -> Option<Result<Snapshot, StoreError>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("room_id", &self.room_id)
            .finish_non_exhaustive()
    }
}
