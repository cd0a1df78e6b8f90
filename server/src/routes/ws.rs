//! WebSocket handler: bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming client frames → decode + dispatch by syscall prefix
//! - Snapshot pushes from subscribed documents → forward to client
//!
//! Handler functions validate, call the document service, and return an
//! `Outcome`. The dispatch layer turns it into the reply frame. Snapshot
//! fan-out to subscribers happens inside the document service.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Dispatch replies to the sender (done + data, or error)
//! 4. Close → release every subscription this connection held

use std::collections::HashSet;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use frames::{Frame, Status};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::document::{self, DocError};
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions.
enum Outcome {
    /// Send done+data to sender.
    Reply(Value),
    /// Send empty done to sender.
    Done,
}

/// Per-connection context shared by the handlers.
pub(crate) struct Session {
    pub(crate) client_id: Uuid,
    pub(crate) client_tx: mpsc::Sender<Frame>,
    /// Rooms this connection is subscribed to.
    pub(crate) rooms: HashSet<String>,
}

impl Session {
    pub(crate) fn new(client_id: Uuid, client_tx: mpsc::Sender<Frame>) -> Self {
        Self { client_id, client_tx, rooms: HashSet::new() }
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();

    // Per-connection channel for snapshot pushes.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.client_queue_capacity);
    let mut session = Session::new(client_id, client_tx);

    let welcome = Frame::request("session:connected", Value::Null).with_data("client_id", client_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Binary(bytes) => {
                        for frame in process_inbound(&state, &mut session, &bytes).await {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Text(_) => {
                        let err = gateway_error("binary frames required");
                        let _ = send_frame(&mut socket, &err).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    release_session(&state, &mut session).await;
    info!(%client_id, "ws: client disconnected");
}

/// Drop every subscription the connection still holds.
pub(crate) async fn release_session(state: &AppState, session: &mut Session) {
    for room_id in session.rooms.drain() {
        document::unsubscribe(state, &room_id, session.client_id).await;
    }
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Decode and process one inbound binary frame and return frames for the
/// sender. Kept apart from the socket so tests can drive dispatch directly.
pub(crate) async fn process_inbound(state: &AppState, session: &mut Session, bytes: &[u8]) -> Vec<Frame> {
    let req = match frames::decode_frame(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(client_id = %session.client_id, error = %e, "ws: invalid inbound frame");
            return vec![gateway_error(format!("invalid frame: {e}"))];
        }
    };

    info!(client_id = %session.client_id, id = %req.id, syscall = %req.syscall, room_id = ?req.room_id, "ws: recv frame");

    let prefix = req.prefix();
    let result = match prefix {
        "doc" => handle_doc(state, session, &req).await,
        _ => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// DOC HANDLERS
// =============================================================================

async fn handle_doc(state: &AppState, session: &mut Session, req: &Frame) -> Result<Outcome, Frame> {
    let Some(room_id) = req.room_id.clone().filter(|id| !id.is_empty()) else {
        return Err(req.error("room_id required"));
    };

    let op = req.syscall.split_once(':').map_or("", |(_, op)| op);

    match op {
        "get" => {
            let view = document::get_doc(state, &room_id).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(view.to_data()))
        }
        "create" => {
            let fields = fields_of(req)?;
            let (created, version) =
                document::create_doc(state, &room_id, fields).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(serde_json::json!({"created": created, "version": version})))
        }
        "set" => {
            let fields = fields_of(req)?;
            let version = document::set_doc(state, &room_id, fields).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(serde_json::json!({"version": version})))
        }
        "update" => {
            let fields = fields_of(req)?;
            let version = document::update_doc(state, &room_id, fields).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(serde_json::json!({"version": version})))
        }
        "subscribe" => {
            let view = document::subscribe(state, &room_id, session.client_id, session.client_tx.clone())
                .await
                .map_err(|e| req.error_from(&e))?;
            session.rooms.insert(room_id);
            Ok(Outcome::Reply(view.to_data()))
        }
        "unsubscribe" => {
            if session.rooms.remove(&room_id) {
                document::unsubscribe(state, &room_id, session.client_id).await;
            }
            Ok(Outcome::Done)
        }
        _ => Err(req.error(format!("unknown doc op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn fields_of(req: &Frame) -> Result<Map<String, Value>, Frame> {
    req.data
        .get("fields")
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| req.error_from(&DocError::InvalidFields))
}

fn gateway_error(message: impl Into<String>) -> Frame {
    Frame::request("gateway:error", Value::Null).with_data("message", message.into())
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    if frame.status == Status::Error {
        let code = frame.error_code().unwrap_or("-");
        let message = frame.error_message().unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket
        .send(Message::Binary(frames::encode_frame(frame).into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
