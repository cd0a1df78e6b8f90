//! Persistence service: background flush for dirty documents.
//!
//! DESIGN
//! ======
//! A background task flushes dirty documents, then sleeps for the configured
//! interval before the next cycle. Snapshots are cloned under the lock and
//! written to Postgres lock-free.
//!
//! ERROR HANDLING
//! ==============
//! Dirty flags are cleared only after successful writes, and only if the
//! document's version did not move during the write. A failed flush keeps
//! the flag so the next cycle retries. A flushed document with no
//! subscribers is evicted.

use std::time::Duration;

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::services::document::{evict_if_idle, flush_doc};
use crate::state::AppState;

#[derive(Debug)]
struct DirtyDoc {
    room_id: String,
    fields: Map<String, Value>,
    version: i64,
}

/// Spawn the background persistence task. Returns a handle for shutdown.
pub fn spawn_persistence_task(state: AppState, flush_interval_ms: u64) -> JoinHandle<()> {
    info!(flush_interval_ms, "document persistence flush configured");
    tokio::spawn(async move {
        loop {
            flush_all_dirty(&state).await;
            tokio::time::sleep(Duration::from_millis(flush_interval_ms)).await;
        }
    })
}

async fn flush_all_dirty(state: &AppState) {
    let dirty = collect_dirty(state).await;

    for doc in dirty {
        match flush_doc(&state.pool, &doc.room_id, &doc.fields, doc.version).await {
            Ok(()) => {
                debug!(room_id = %doc.room_id, version = doc.version, "persistence: document flushed");
                clear_flushed(state, &doc.room_id, doc.version).await;
            }
            Err(e) => {
                error!(error = %e, room_id = %doc.room_id, version = doc.version, "persistence flush failed");
            }
        }
    }
}

/// Clone every dirty, existing document under the read lock.
async fn collect_dirty(state: &AppState) -> Vec<DirtyDoc> {
    let docs = state.docs.read().await;
    docs.iter()
        .filter(|(_, doc)| doc.dirty)
        .filter_map(|(room_id, doc)| {
            doc.fields.as_ref().map(|fields| DirtyDoc {
                room_id: room_id.clone(),
                fields: fields.clone(),
                version: doc.version,
            })
        })
        .collect()
}

async fn clear_flushed(state: &AppState, room_id: &str, flushed_version: i64) {
    let mut docs = state.docs.write().await;
    let Some(doc) = docs.get_mut(room_id) else {
        return;
    };
    // EDGE: keep the flag if the document was written again mid-flush.
    if doc.version == flushed_version {
        doc.dirty = false;
    }
    evict_if_idle(state, &mut docs, room_id);
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
