//! In-process document store.
//!
//! Rooms live in a map behind a std mutex that is never held across an await.
//! Each successful write bumps the room's version and pushes a snapshot to
//! every subscriber with `try_send`; a full or closed subscriber channel
//! drops that push.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{CreateOutcome, DocumentStore, Snapshot, Subscription, WriteAck};
use crate::error::StoreError;
use crate::room::{RoomDocument, RoomPatch};

const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

type SnapshotSender = mpsc::Sender<Result<Snapshot, StoreError>>;

#[derive(Default)]
struct RoomEntry {
    document: Option<RoomDocument>,
    version: u64,
    subscribers: HashMap<u64, SnapshotSender>,
}

impl RoomEntry {
    fn snapshot(&self, room_id: &str) -> Snapshot {
        Snapshot { room_id: room_id.to_owned(), document: self.document.clone(), version: self.version }
    }

    fn commit(&mut self, room_id: &str) -> WriteAck {
        self.version += 1;
        let snapshot = self.snapshot(room_id);
        self.subscribers.retain(|id, tx| match tx.try_send(Ok(snapshot.clone())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%room_id, subscriber = id, version = snapshot.version, "memory store: subscriber queue full; dropping snapshot");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        WriteAck { version: self.version }
    }
}

#[derive(Default)]
struct Inner {
    rooms: Mutex<HashMap<String, RoomEntry>>,
    fail_writes: AtomicBool,
    next_subscriber: AtomicU64,
}

impl Inner {
    fn rooms(&self) -> MutexGuard<'_, HashMap<String, RoomEntry>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected {
                code: "E_UNAVAILABLE".into(),
                message: "writes are disabled".into(),
            });
        }
        Ok(())
    }
}

/// Shared in-memory store. Clones share the same rooms.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a room with an existing document at version 1.
    #[must_use]
    pub fn with_document(self, room_id: &str, document: RoomDocument) -> Self {
        {
            let mut rooms = self.inner.rooms();
            let entry = rooms.entry(room_id.to_owned()).or_default();
            entry.document = Some(document);
            entry.version = 1;
        }
        self
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn document(&self, room_id: &str) -> Option<RoomDocument> {
        self.inner.rooms().get(room_id).and_then(|e| e.document.clone())
    }

    #[must_use]
    pub fn version(&self, room_id: &str) -> u64 {
        self.inner.rooms().get(room_id).map_or(0, |e| e.version)
    }

    #[must_use]
    pub fn subscriber_count(&self, room_id: &str) -> usize {
        self.inner.rooms().get(room_id).map_or(0, |e| e.subscribers.len())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, room_id: &str) -> Result<Snapshot, StoreError> {
        let rooms = self.inner.rooms();
        Ok(rooms.get(room_id).map_or_else(
            || Snapshot { room_id: room_id.to_owned(), document: None, version: 0 },
            |e| e.snapshot(room_id),
        ))
    }

    async fn create_if_absent(&self, room_id: &str, document: &RoomDocument) -> Result<CreateOutcome, StoreError> {
        self.inner.check_writable()?;
        let mut rooms = self.inner.rooms();
        let entry = rooms.entry(room_id.to_owned()).or_default();
        if entry.document.is_some() {
            return Ok(CreateOutcome { created: false, version: entry.version });
        }
        entry.document = Some(document.clone());
        let ack = entry.commit(room_id);
        debug!(%room_id, version = ack.version, "memory store: created");
        Ok(CreateOutcome { created: true, version: ack.version })
    }

    async fn set(&self, room_id: &str, document: &RoomDocument) -> Result<WriteAck, StoreError> {
        self.inner.check_writable()?;
        let mut rooms = self.inner.rooms();
        let entry = rooms.entry(room_id.to_owned()).or_default();
        entry.document = Some(document.clone());
        Ok(entry.commit(room_id))
    }

    async fn update(&self, room_id: &str, patch: &RoomPatch) -> Result<WriteAck, StoreError> {
        self.inner.check_writable()?;
        let mut rooms = self.inner.rooms();
        let Some(entry) = rooms.get_mut(room_id) else {
            return Err(StoreError::NotFound(room_id.to_owned()));
        };
        let Some(document) = entry.document.as_mut() else {
            return Err(StoreError::NotFound(room_id.to_owned()));
        };
        patch.apply_to(document);
        Ok(entry.commit(room_id))
    }

    async fn subscribe(&self, room_id: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        {
            let mut rooms = self.inner.rooms();
            let entry = rooms.entry(room_id.to_owned()).or_default();
            // First delivery is the current state, queued before any later write.
            let _ = tx.try_send(Ok(entry.snapshot(room_id)));
            entry.subscribers.insert(id, tx);
        }

        let inner = Arc::clone(&self.inner);
        let room = room_id.to_owned();
        Ok(Subscription::new(room_id, rx, move || {
            if let Some(entry) = inner.rooms().get_mut(&room) {
                entry.subscribers.remove(&id);
            }
            debug!(room_id = %room, subscriber = id, "memory store: subscription released");
        }))
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
