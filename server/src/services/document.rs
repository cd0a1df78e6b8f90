//! Document service: hydration, writes, and snapshot fan-out.
//!
//! DESIGN
//! ======
//! Documents are loaded from Postgres on first access and then served from
//! memory. Every successful write bumps the version, marks the document
//! dirty for the persistence task, and pushes a `doc:snapshot` frame to each
//! subscribed connection while the write lock is still held, so subscribers
//! observe writes in version order.
//!
//! A document stays in memory only while it has subscribers or unflushed
//! writes. Reads of a document that is not in memory go straight to Postgres
//! and cache nothing. Idle documents are evicted on the last unsubscribe,
//! after a write that leaves them idle, or by the persistence task once
//! their last write is flushed.
//!
//! HYDRATION RACE
//! ==============
//! Rows are queried outside the lock. Every eviction bumps
//! `AppState::evictions` under the write lock; a loader that sees the
//! counter move while it was querying discards its row and queries again,
//! since the evicted state may be newer than what it read.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use frames::Frame;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::{AppState, DocState};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DocError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("fields must be an object")]
    InvalidFields,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl frames::ErrorCode for DocError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_DOC_NOT_FOUND",
            Self::InvalidFields => "E_INVALID_FIELDS",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Point-in-time view of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocView {
    pub fields: Option<Map<String, Value>>,
    pub version: i64,
}

impl DocView {
    fn of(doc: &DocState) -> Self {
        Self { fields: doc.fields.clone(), version: doc.version }
    }

    /// Wire payload: `exists`, `fields` when present, `version`.
    #[must_use]
    pub fn to_data(&self) -> Value {
        let mut data = Map::new();
        data.insert("exists".into(), Value::Bool(self.fields.is_some()));
        if let Some(fields) = &self.fields {
            data.insert("fields".into(), Value::Object(fields.clone()));
        }
        data.insert("version".into(), serde_json::json!(self.version));
        Value::Object(data)
    }
}

// =============================================================================
// READS
// =============================================================================

/// Current view of a document. Served from memory when live, otherwise read
/// from Postgres without caching.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn get_doc(state: &AppState, room_id: &str) -> Result<DocView, DocError> {
    if let Some(doc) = state.docs.read().await.get(room_id) {
        return Ok(DocView::of(doc));
    }
    let view = match load_document(&state.pool, room_id).await? {
        Some((fields, version)) => DocView { fields: Some(fields), version },
        None => DocView { fields: None, version: 0 },
    };
    Ok(view)
}

// =============================================================================
// WRITES
// =============================================================================

/// Create the document unless it already exists. Returns whether it was
/// created and the resulting version.
///
/// # Errors
///
/// Returns a database error if hydration fails.
pub async fn create_doc(state: &AppState, room_id: &str, fields: Map<String, Value>) -> Result<(bool, i64), DocError> {
    with_loaded(state, room_id, |doc| {
        if doc.exists() {
            debug!(%room_id, version = doc.version, "doc: create skipped; already exists");
            return Ok((false, doc.version));
        }
        doc.fields = Some(fields);
        let version = commit(room_id, doc);
        info!(%room_id, version, "doc: created");
        Ok((true, version))
    })
    .await
}

/// Replace the whole document, creating it if needed.
///
/// # Errors
///
/// Returns a database error if hydration fails.
pub async fn set_doc(state: &AppState, room_id: &str, fields: Map<String, Value>) -> Result<i64, DocError> {
    with_loaded(state, room_id, |doc| {
        doc.fields = Some(fields);
        Ok(commit(room_id, doc))
    })
    .await
}

/// Merge `patch` into an existing document, field by field.
///
/// # Errors
///
/// Returns [`DocError::NotFound`] when the document does not exist, or a
/// database error if hydration fails.
pub async fn update_doc(state: &AppState, room_id: &str, patch: Map<String, Value>) -> Result<i64, DocError> {
    with_loaded(state, room_id, |doc| {
        let Some(fields) = doc.fields.as_mut() else {
            return Err(DocError::NotFound(room_id.to_owned()));
        };
        for (key, value) in patch {
            fields.insert(key, value);
        }
        Ok(commit(room_id, doc))
    })
    .await
}

/// Bump version, mark dirty, and push the new snapshot to subscribers.
fn commit(room_id: &str, doc: &mut DocState) -> i64 {
    doc.version += 1;
    doc.dirty = true;
    let frame = Frame::request("doc:snapshot", DocView::of(doc).to_data()).with_room_id(room_id);
    push_to_subscribers(room_id, doc, &frame);
    doc.version
}

fn push_to_subscribers(room_id: &str, doc: &mut DocState, frame: &Frame) {
    doc.subscribers.retain(|client_id, tx| match tx.try_send(frame.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(%room_id, %client_id, version = doc_version(frame), "doc: subscriber queue full; dropping snapshot");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(%room_id, %client_id, "doc: subscriber gone; removing");
            false
        }
    });
}

fn doc_version(frame: &Frame) -> i64 {
    frame.data.get("version").and_then(Value::as_i64).unwrap_or_default()
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// Register `client_id` for pushes and return the current view, which the
/// caller sends as the subscription's initial snapshot.
///
/// # Errors
///
/// Returns a database error if hydration fails.
pub async fn subscribe(
    state: &AppState,
    room_id: &str,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
) -> Result<DocView, DocError> {
    with_loaded(state, room_id, |doc| {
        doc.subscribers.insert(client_id, tx);
        info!(%room_id, %client_id, subscribers = doc.subscribers.len(), "doc: client subscribed");
        Ok(DocView::of(doc))
    })
    .await
}

/// Drop `client_id`'s subscription. Evicts the document when it has no
/// subscribers left and nothing pending for the persistence task.
pub async fn unsubscribe(state: &AppState, room_id: &str, client_id: Uuid) {
    let mut docs = state.docs.write().await;
    let Some(doc) = docs.get_mut(room_id) else {
        return;
    };
    doc.subscribers.remove(&client_id);
    info!(%room_id, %client_id, remaining = doc.subscribers.len(), "doc: client unsubscribed");
    evict_if_idle(state, &mut docs, room_id);
}

/// Remove the document if nobody is subscribed and nothing is left to flush.
/// Callers hold the write lock.
pub(crate) fn evict_if_idle(state: &AppState, docs: &mut HashMap<String, DocState>, room_id: &str) {
    if docs.get(room_id).is_some_and(DocState::is_idle) {
        docs.remove(room_id);
        state.evictions.fetch_add(1, Ordering::SeqCst);
        info!(%room_id, "doc: evicted from memory");
    }
}

// =============================================================================
// HYDRATION
// =============================================================================

/// Run `apply` on the live document under the write lock, hydrating it
/// first if it is not in memory. The document is evicted afterwards if
/// `apply` left it idle.
async fn with_loaded<T>(
    state: &AppState,
    room_id: &str,
    apply: impl FnOnce(&mut DocState) -> Result<T, DocError>,
) -> Result<T, DocError> {
    let mut docs = state.docs.write().await;
    loop {
        if let Some(doc) = docs.get_mut(room_id) {
            let result = apply(doc);
            evict_if_idle(state, &mut docs, room_id);
            return result;
        }

        // Query outside the lock; a concurrent loader may win the insert.
        let evictions = state.evictions.load(Ordering::SeqCst);
        drop(docs);
        let row = load_document(&state.pool, room_id).await?;
        docs = state.docs.write().await;
        if !install_row(state, &mut docs, room_id, row, evictions) {
            debug!(%room_id, "doc: eviction during hydration; reloading");
        }
    }
}

/// Insert a row queried while `evictions` was current. Leaves a document
/// another loader already installed untouched. Returns `false` when an
/// eviction ran during the query, in which case the row may predate that
/// document's last flush and the caller must query again.
pub(crate) fn install_row(
    state: &AppState,
    docs: &mut HashMap<String, DocState>,
    room_id: &str,
    row: Option<(Map<String, Value>, i64)>,
    evictions: u64,
) -> bool {
    if docs.contains_key(room_id) {
        return true;
    }
    if state.evictions.load(Ordering::SeqCst) != evictions {
        return false;
    }
    let doc = match row {
        Some((fields, version)) => {
            info!(%room_id, version, "doc: hydrated from database");
            DocState::hydrated(fields, version)
        }
        None => DocState::new(),
    };
    docs.insert(room_id.to_owned(), doc);
    true
}

async fn load_document(pool: &PgPool, room_id: &str) -> Result<Option<(Map<String, Value>, i64)>, DocError> {
    let row = sqlx::query_as::<_, (Value, i64)>("SELECT fields, version FROM documents WHERE id = $1")
        .bind(room_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some((Value::Object(fields), version)) => Ok(Some((fields, version))),
        Some(_) => Err(DocError::InvalidFields),
        None => Ok(None),
    }
}

/// Upsert one document row.
///
/// # Errors
///
/// Returns a database error if the write fails.
pub async fn flush_doc(pool: &PgPool, room_id: &str, fields: &Map<String, Value>, version: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO documents (id, fields, version, updated_at) VALUES ($1, $2, $3, now()) \
         ON CONFLICT (id) DO UPDATE SET fields = EXCLUDED.fields, version = EXCLUDED.version, updated_at = now()",
    )
    .bind(room_id)
    .bind(Value::Object(fields.clone()))
    .bind(version)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
#[path = "document_test.rs"]
mod tests;
