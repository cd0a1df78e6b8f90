//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the database pool and a map of live documents. Each document
//! has its current fields, a version counter, subscribed connections, and a
//! dirty flag for debounced persistence. A document is live while it has
//! subscribers or unflushed writes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use frames::Frame;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

// =============================================================================
// DOCUMENT STATE
// =============================================================================

/// Per-document live state. Kept in memory once hydrated; flushed to
/// Postgres by the persistence task.
#[derive(Debug, Default)]
pub struct DocState {
    /// Current fields, or `None` if the document does not exist.
    pub fields: Option<Map<String, Value>>,
    /// Bumped by every successful write.
    pub version: i64,
    /// Subscribed connections: `client_id` -> sender for outgoing frames.
    pub subscribers: HashMap<Uuid, mpsc::Sender<Frame>>,
    /// Modified since the last successful flush.
    pub dirty: bool,
}

impl DocState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// State loaded from a stored row.
    #[must_use]
    pub fn hydrated(fields: Map<String, Value>, version: i64) -> Self {
        Self { fields: Some(fields), version, ..Self::default() }
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.fields.is_some()
    }

    /// No subscribers and nothing left to flush.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.subscribers.is_empty() && !self.dirty
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub docs: Arc<RwLock<HashMap<String, DocState>>>,
    /// Outbound queue size for each websocket connection.
    pub client_queue_capacity: usize,
    /// Bumped on every eviction; hydration compares it across its query.
    pub evictions: Arc<AtomicU64>,
}

impl AppState {
    #[must_use]
    pub fn new(pool: PgPool, client_queue_capacity: usize) -> Self {
        Self {
            pool,
            docs: Arc::new(RwLock::new(HashMap::new())),
            client_queue_capacity,
            evictions: Arc::new(AtomicU64::new(0)),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
