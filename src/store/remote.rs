//! Websocket client for the sanctuary document server.
//!
//! DESIGN
//! ======
//! One socket per store. A writer task drains an outbound queue into the
//! socket; a reader task decodes every inbound frame and routes it:
//! - Terminal replies resolve the pending request with the matching `parent_id`.
//! - `doc:subscribe` done replies also seed the subscription registered for
//!   that request, so the initial snapshot is queued ahead of later pushes.
//! - `doc:snapshot` pushes fan out to every local subscription on the room.
//!
//! A subscription holds back pushes until its opening snapshot is delivered,
//! and never delivers a snapshot at or below a version it already delivered.
//! The server may flush pushes queued for an older subscription on the same
//! room after the new one's reply.
//!
//! When the socket closes, pending requests resolve as `Closed` and every
//! subscription receives a final `Closed` error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use frames::{Frame, Status};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{CreateOutcome, DocumentStore, Snapshot, Subscription, WriteAck};
use crate::error::StoreError;
use crate::room::{RoomDocument, RoomPatch};

const SUBSCRIPTION_QUEUE_CAPACITY: usize = 256;

type SnapshotSender = mpsc::Sender<Result<Snapshot, StoreError>>;

struct Route {
    id: u64,
    /// Request id of the `doc:subscribe` that opened this route.
    request_id: String,
    tx: SnapshotSender,
    /// Pushes that arrived before the opening snapshot. `None` once open.
    held: Option<Vec<Result<Snapshot, StoreError>>>,
    /// Highest version delivered so far.
    delivered: Option<u64>,
}

impl Route {
    fn new(id: u64, request_id: String, tx: SnapshotSender) -> Self {
        Self { id, request_id, tx, held: Some(Vec::new()), delivered: None }
    }

    /// Route a push. Returns `false` once the route is gone.
    fn push(&mut self, snapshot: &Result<Snapshot, StoreError>) -> bool {
        if let Some(held) = self.held.as_mut() {
            held.push(snapshot.clone());
            return true;
        }
        self.forward(snapshot.clone())
    }

    /// Deliver the opening snapshot, then whatever was held back.
    fn open(&mut self, initial: Result<Snapshot, StoreError>) -> bool {
        let held = self.held.take().unwrap_or_default();
        std::iter::once(initial).chain(held).all(|snapshot| self.forward(snapshot))
    }

    fn forward(&mut self, snapshot: Result<Snapshot, StoreError>) -> bool {
        if let Ok(snap) = &snapshot {
            if self.delivered.is_some_and(|version| snap.version <= version) {
                debug!(room_id = %snap.room_id, version = snap.version, route = self.id, "remote store: stale push dropped");
                return true;
            }
            self.delivered = Some(snap.version);
        }
        deliver(&self.tx, snapshot)
    }
}

#[derive(Default)]
struct Routing {
    pending: HashMap<String, oneshot::Sender<Frame>>,
    routes: HashMap<String, Vec<Route>>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    routing: Mutex<Routing>,
    next_route: AtomicU64,
}

impl Shared {
    fn routing(&self) -> MutexGuard<'_, Routing> {
        self.routing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Document store reached over the server's websocket protocol.
pub struct RemoteStore {
    client_id: String,
    outbound: mpsc::UnboundedSender<Frame>,
    shared: Arc<Shared>,
    timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RemoteStore {
    /// Connect to a `ws://` or `wss://` endpoint and wait for the session greeting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transport`] if the socket cannot be opened,
    /// [`StoreError::Timeout`] if the greeting does not arrive in time, and
    /// [`StoreError::Closed`] if the server hangs up first.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let (stream, _) = connect_async(url).await?;
        let (mut sink, mut source) = stream.split();

        let client_id = tokio::time::timeout(timeout, wait_for_greeting(&mut source))
            .await
            .map_err(|_| StoreError::Timeout)??;

        info!(%url, %client_id, "remote store: connected");

        let shared = Arc::new(Shared::default());
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = sink.send(Message::Binary(frames::encode_frame(&frame).into())).await {
                    warn!(error = %e, syscall = %frame.syscall, "remote store: send failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_shared = Arc::clone(&shared);
        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Binary(bytes)) => match frames::decode_frame(&bytes) {
                        Ok(frame) => route_inbound(&reader_shared, frame),
                        Err(e) => warn!(error = %e, "remote store: undecodable frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "remote store: socket error");
                        break;
                    }
                }
            }
            shutdown(&reader_shared);
            info!("remote store: disconnected");
        });

        Ok(Self { client_id, outbound, shared, timeout, reader, writer })
    }

    /// Client id assigned by the server.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Send one request and wait for its terminal reply.
    async fn request(&self, syscall: &str, room_id: &str, data: Value) -> Result<Frame, StoreError> {
        let frame = Frame::request(syscall, data).with_room_id(room_id);
        self.send_and_wait(frame).await
    }

    async fn send_and_wait(&self, frame: Frame) -> Result<Frame, StoreError> {
        let (tx, rx) = oneshot::channel();
        let request_id = frame.id.clone();
        {
            let mut routing = self.shared.routing();
            if routing.closed {
                return Err(StoreError::Closed);
            }
            routing.pending.insert(request_id.clone(), tx);
        }

        debug!(id = %request_id, syscall = %frame.syscall, "remote store: send");
        let room_id = frame.room_id.clone().unwrap_or_default();
        if self.outbound.send(frame).is_err() {
            self.shared.routing().pending.remove(&request_id);
            return Err(StoreError::Closed);
        }

        let reply = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(StoreError::Closed),
            Err(_) => {
                self.shared.routing().pending.remove(&request_id);
                return Err(StoreError::Timeout);
            }
        };

        if reply.status == Status::Error {
            return Err(error_from_reply(&reply, &room_id));
        }
        Ok(reply)
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
        shutdown(&self.shared);
    }
}

#[async_trait]
impl DocumentStore for RemoteStore {
    async fn get(&self, room_id: &str) -> Result<Snapshot, StoreError> {
        let reply = self.request("doc:get", room_id, Value::Object(Map::new())).await?;
        snapshot_from_data(room_id, &reply.data)
    }

    async fn create_if_absent(&self, room_id: &str, document: &RoomDocument) -> Result<CreateOutcome, StoreError> {
        let reply = self
            .request("doc:create", room_id, fields_payload(document.to_fields()))
            .await?;
        Ok(CreateOutcome {
            created: reply.data.get("created").and_then(Value::as_bool).unwrap_or(false),
            version: version_from_data(&reply.data)?,
        })
    }

    async fn set(&self, room_id: &str, document: &RoomDocument) -> Result<WriteAck, StoreError> {
        let reply = self
            .request("doc:set", room_id, fields_payload(document.to_fields()))
            .await?;
        Ok(WriteAck { version: version_from_data(&reply.data)? })
    }

    async fn update(&self, room_id: &str, patch: &RoomPatch) -> Result<WriteAck, StoreError> {
        let reply = self
            .request("doc:update", room_id, fields_payload(patch.to_fields()))
            .await?;
        Ok(WriteAck { version: version_from_data(&reply.data)? })
    }

    async fn subscribe(&self, room_id: &str) -> Result<Subscription, StoreError> {
        let frame = Frame::request("doc:subscribe", Value::Object(Map::new())).with_room_id(room_id);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_QUEUE_CAPACITY);
        let route_id = self.shared.next_route.fetch_add(1, Ordering::Relaxed);

        // Register before sending so the initial snapshot and any push that
        // follows it land on this route.
        self.shared
            .routing()
            .routes
            .entry(room_id.to_owned())
            .or_default()
            .push(Route::new(route_id, frame.id.clone(), tx));

        if let Err(e) = self.send_and_wait(frame).await {
            remove_route(&self.shared, room_id, route_id);
            return Err(e);
        }

        let shared = Arc::clone(&self.shared);
        let outbound = self.outbound.clone();
        let room = room_id.to_owned();
        Ok(Subscription::new(room_id, rx, move || {
            let last_on_room = remove_route(&shared, &room, route_id);
            if last_on_room {
                let unsubscribe = Frame::request("doc:unsubscribe", Value::Object(Map::new())).with_room_id(&room);
                // Fire-and-forget; the reply is dropped by the reader.
                let _ = outbound.send(unsubscribe);
            }
            debug!(room_id = %room, route = route_id, "remote store: subscription released");
        }))
    }
}

// =============================================================================
// ROUTING
// =============================================================================

/// Read frames until `session:connected` and return the assigned client id.
async fn wait_for_greeting<S>(source: &mut S) -> Result<String, StoreError>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let Some(message) = source.next().await else {
            return Err(StoreError::Closed);
        };
        match message? {
            Message::Binary(bytes) => {
                let frame = frames::decode_frame(&bytes)?;
                if frame.syscall == "session:connected" {
                    return Ok(frame
                        .data
                        .get("client_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned());
                }
            }
            Message::Close(_) => return Err(StoreError::Closed),
            _ => {}
        }
    }
}

fn route_inbound(shared: &Shared, frame: Frame) {
    if frame.syscall == "doc:snapshot" && frame.parent_id.is_none() {
        let Some(room_id) = frame.room_id.as_deref() else {
            return;
        };
        let snapshot = snapshot_from_data(room_id, &frame.data);
        let mut routing = shared.routing();
        if let Some(routes) = routing.routes.get_mut(room_id) {
            routes.retain_mut(|route| route.push(&snapshot));
        }
        return;
    }

    let Some(parent_id) = frame.parent_id.clone() else {
        debug!(syscall = %frame.syscall, "remote store: unsolicited frame ignored");
        return;
    };
    if !frame.status.is_terminal() {
        return;
    }

    let mut routing = shared.routing();
    if frame.syscall == "doc:subscribe" && frame.status == Status::Done {
        if let Some(room_id) = frame.room_id.as_deref() {
            let snapshot = snapshot_from_data(room_id, &frame.data);
            if let Some(routes) = routing.routes.get_mut(room_id) {
                routes.retain_mut(|route| route.request_id != parent_id || route.open(snapshot.clone()));
            }
        }
    }
    if let Some(waiter) = routing.pending.remove(&parent_id) {
        let _ = waiter.send(frame);
    }
}

/// Push one snapshot to a route. Returns `false` once the route is gone.
fn deliver(tx: &SnapshotSender, snapshot: Result<Snapshot, StoreError>) -> bool {
    match tx.try_send(snapshot) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("remote store: subscription queue full; dropping snapshot");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Remove one route. Returns `true` if no route remains on the room.
fn remove_route(shared: &Shared, room_id: &str, route_id: u64) -> bool {
    let mut routing = shared.routing();
    let Some(routes) = routing.routes.get_mut(room_id) else {
        return true;
    };
    routes.retain(|route| route.id != route_id);
    if routes.is_empty() {
        routing.routes.remove(room_id);
        return true;
    }
    false
}

fn shutdown(shared: &Shared) {
    let mut routing = shared.routing();
    routing.closed = true;
    routing.pending.clear();
    for (_, routes) in routing.routes.drain() {
        for route in routes {
            let _ = route.tx.try_send(Err(StoreError::Closed));
        }
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

fn fields_payload(fields: Map<String, Value>) -> Value {
    let mut data = Map::new();
    data.insert("fields".into(), Value::Object(fields));
    Value::Object(data)
}

fn version_from_data(data: &Value) -> Result<u64, StoreError> {
    frames::data_u64(data, "version").ok_or_else(|| StoreError::InvalidDocument("missing version".into()))
}

/// Decode a `{exists, fields, version}` payload.
fn snapshot_from_data(room_id: &str, data: &Value) -> Result<Snapshot, StoreError> {
    let version = version_from_data(data)?;
    let exists = data.get("exists").and_then(Value::as_bool).unwrap_or(false);
    let document = if exists {
        let fields = data
            .get("fields")
            .and_then(Value::as_object)
            .ok_or_else(|| StoreError::InvalidDocument("missing fields".into()))?;
        Some(RoomDocument::from_fields(fields))
    } else {
        None
    };
    Ok(Snapshot { room_id: room_id.to_owned(), document, version })
}

fn error_from_reply(reply: &Frame, room_id: &str) -> StoreError {
    let code = reply.error_code().unwrap_or("E_UNKNOWN");
    if code == "E_DOC_NOT_FOUND" {
        return StoreError::NotFound(room_id.to_owned());
    }
    StoreError::Rejected {
        code: code.to_owned(),
        message: reply.error_message().unwrap_or("unknown store error").to_owned(),
    }
}

#[cfg(test)]
#[path = "remote_test.rs"]
mod tests;
