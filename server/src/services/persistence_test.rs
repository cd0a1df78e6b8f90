use super::*;
use crate::services::document::subscribe;
use crate::state::test_helpers::{room_fields, seed_absent, seed_doc, test_app_state};
use tokio::sync::mpsc;
use uuid::Uuid;

const ROOM: &str = "our-special-place";

async fn mark_dirty(state: &AppState, room_id: &str) {
    state.docs.write().await.get_mut(room_id).expect("doc").dirty = true;
}

#[tokio::test]
async fn collect_dirty_skips_clean_and_absent_documents() {
    let state = test_app_state();
    seed_doc(&state, ROOM, room_fields(10.0, false, "hi", "2026-10-18"), 2).await;
    seed_doc(&state, "clean", room_fields(0.0, false, "hi", "2026-10-18"), 1).await;
    seed_absent(&state, "absent").await;
    mark_dirty(&state, ROOM).await;
    mark_dirty(&state, "absent").await;

    let dirty = collect_dirty(&state).await;
    assert_eq!(dirty.len(), 1);
    assert_eq!(dirty[0].room_id, ROOM);
    assert_eq!(dirty[0].version, 2);
}

#[tokio::test]
async fn clear_flushed_only_when_version_unchanged() {
    let state = test_app_state();
    seed_doc(&state, ROOM, room_fields(10.0, false, "hi", "2026-10-18"), 2).await;
    let (tx, _rx) = mpsc::channel(8);
    subscribe(&state, ROOM, Uuid::new_v4(), tx).await.expect("subscribe");
    mark_dirty(&state, ROOM).await;

    clear_flushed(&state, ROOM, 1).await;
    assert!(state.docs.read().await.get(ROOM).is_some_and(|d| d.dirty));

    clear_flushed(&state, ROOM, 2).await;
    assert!(state.docs.read().await.get(ROOM).is_some_and(|d| !d.dirty), "subscribed document stays live");
}

#[tokio::test]
async fn clear_flushed_evicts_document_nobody_watches() {
    let state = test_app_state();
    seed_doc(&state, ROOM, room_fields(10.0, false, "hi", "2026-10-18"), 2).await;
    mark_dirty(&state, ROOM).await;

    clear_flushed(&state, ROOM, 1).await;
    assert!(state.docs.read().await.contains_key(ROOM), "newer write still pending");

    clear_flushed(&state, ROOM, 2).await;
    assert!(!state.docs.read().await.contains_key(ROOM));
}

#[tokio::test]
async fn clear_flushed_ignores_evicted_documents() {
    let state = test_app_state();
    clear_flushed(&state, "gone", 5).await;
    assert!(state.docs.read().await.is_empty());
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
async fn flush_round_trips_through_postgres() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required for live-db-tests");
    let pool = crate::db::init_pool(&url, 2).await.expect("pool");
    let state = AppState::new(pool, 16);
    let room = format!("live-{}", uuid::Uuid::new_v4());
    seed_doc(&state, &room, room_fields(40.0, true, "persist me", "2026-10-18"), 3).await;
    mark_dirty(&state, &room).await;

    flush_all_dirty(&state).await;
    assert!(!state.docs.read().await.contains_key(&room), "flushed idle document is evicted");

    let view = crate::services::document::get_doc(&state, &room).await.expect("read row");
    assert_eq!(view.version, 3);
    assert_eq!(view.fields.expect("fields")["lastMessage"], serde_json::json!("persist me"));
    assert!(state.docs.read().await.is_empty(), "reads do not cache");

    let version = crate::services::document::update_doc(&state, &room, serde_json::Map::new()).await.expect("update");
    assert_eq!(version, 4, "writes continue from the stored version");
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
async fn reads_of_unknown_rooms_leave_no_trace() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required for live-db-tests");
    let pool = crate::db::init_pool(&url, 2).await.expect("pool");
    let state = AppState::new(pool, 16);

    for _ in 0..3 {
        let room = format!("unknown-{}", uuid::Uuid::new_v4());
        let view = crate::services::document::get_doc(&state, &room).await.expect("read");
        assert!(view.fields.is_none());
    }
    assert!(state.docs.read().await.is_empty());
}
