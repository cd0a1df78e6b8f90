//! Room REST endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::services::document::{self, DocError};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub id: String,
    pub fields: Map<String, Value>,
    pub version: i64,
}

pub(crate) fn doc_error_to_status(err: DocError) -> StatusCode {
    match err {
        DocError::NotFound(_) => StatusCode::NOT_FOUND,
        DocError::InvalidFields => StatusCode::UNPROCESSABLE_ENTITY,
        DocError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `GET /api/rooms/:id`: fetch one room document once.
pub async fn get_room(State(state): State<AppState>, Path(room_id): Path<String>) -> Result<Json<RoomResponse>, StatusCode> {
    let view = document::get_doc(&state, &room_id).await.map_err(doc_error_to_status)?;
    let fields = view.fields.ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(RoomResponse { id: room_id, fields, version: view.version }))
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
