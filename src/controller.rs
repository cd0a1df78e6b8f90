//! Sanctuary state controller.
//!
//! DESIGN
//! ======
//! The controller owns the local mirror of one room document and mediates
//! every mutation. Intents mutate local state first and then queue the remote
//! write; the caller gets a [`PendingWrite`] it may await or drop. Snapshots
//! from the store are reduced by [`SanctuaryController::apply_snapshot`]:
//!
//! - absent document → create the default document (create-if-absent)
//! - `lastResetDate != today` → write the daily reset, keep local state
//! - otherwise → mirror `waterLevel`, `hasUnreadMessage`, `lastMessage`
//!
//! ORDERING
//! ========
//! A snapshot may arrive while an optimistic write is still in flight, or be
//! older than a write the store already acknowledged. Two guards keep such
//! snapshots from clobbering newer local values:
//! - Fields with a write in flight are not overwritten by incoming snapshots.
//! - The highest acknowledged write version is a floor; snapshots below it
//!   are ignored.
//!
//! When a write is acknowledged and a newer snapshot was already seen, the
//! released fields are re-read from that snapshot. Failed writes are never
//! rolled back; local state stays divergent until the next snapshot.
//!
//! Every write (intents, seeding, daily reset) goes through one writer task
//! per controller and reaches the store in issue order. A write starts only
//! after the previous one settled.
//!
//! LIFECYCLE
//! =========
//! [`SanctuaryController::subscribe`] spawns the sync task that owns the store
//! subscription. [`SanctuaryController::close`] or dropping the controller
//! aborts that task, which drops and thereby releases the subscription.
//! The writer task drains its queue and exits once the controller and every
//! queued write are gone.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SanctuaryConfig;
use crate::error::StoreError;
use crate::gesture::TapGate;
use crate::room::{DayStatus, Field, RoomDocument, RoomPatch, clamp_level};
use crate::store::{DocumentStore, Snapshot, Subscription, WriteAck};

const EVENT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// TYPES
// =============================================================================

/// Local view of the room, as a front end would render it.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalState {
    pub water_level: f64,
    pub has_unread_message: bool,
    pub last_message: String,
    /// Note shown after `open_note`, until `dismiss_note`.
    pub revealed_note: Option<String>,
    pub compose_buffer: String,
    pub composer_open: bool,
    /// Version of the last snapshot mirrored into this state.
    pub snapshot_version: u64,
}

impl Default for LocalState {
    fn default() -> Self {
        Self {
            water_level: 0.0,
            has_unread_message: false,
            last_message: String::new(),
            revealed_note: None,
            compose_buffer: String::new(),
            composer_open: false,
            snapshot_version: 0,
        }
    }
}

impl LocalState {
    /// Display volume for a bottle whose full level is `daily_goal_ml`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn water_ml(&self, daily_goal_ml: u32) -> u32 {
        (clamp_level(self.water_level) / 100.0 * f64::from(daily_goal_ml)).round() as u32
    }
}

/// Which intent or sync rule issued a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Seed,
    DailyReset,
    AddWater,
    SendNote,
    OpenNote,
}

/// Observability hook: everything the controller does with the store.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    SnapshotAdopted { version: u64 },
    SnapshotIgnored { version: u64, floor: u64 },
    ResetIssued { stale_date: String, today: String },
    WritePersisted { kind: WriteKind, version: u64 },
    WriteFailed { kind: WriteKind, error: StoreError },
    SubscriptionEnded { error: Option<StoreError> },
}

/// What `apply_snapshot` decided.
#[derive(Debug)]
pub enum SnapshotAction {
    /// Fields without a write in flight now mirror the snapshot.
    Adopted { version: u64 },
    /// Document was absent; the default document is being created.
    Seeding(PendingWrite),
    /// Document belongs to another day; the reset is being written.
    Resetting { stale_date: String, write: PendingWrite },
    /// Snapshot predates an acknowledged write.
    Ignored { version: u64, floor: u64 },
}

/// Outcome channel of a fire-and-forget write.
#[derive(Debug)]
pub struct PendingWrite {
    rx: oneshot::Receiver<Result<WriteAck, StoreError>>,
}

impl PendingWrite {
    /// Wait for the store's answer.
    ///
    /// # Errors
    ///
    /// Returns the store's error, or [`StoreError::Closed`] if the write task
    /// was torn down before it finished.
    pub async fn outcome(self) -> Result<WriteAck, StoreError> {
        self.rx.await.unwrap_or(Err(StoreError::Closed))
    }
}

// =============================================================================
// SHARED CORE
// =============================================================================

struct Mirror {
    local: LocalState,
    /// Writes in flight per field.
    in_flight: HashMap<Field, u32>,
    /// Highest version acknowledged for one of our writes.
    acked_floor: u64,
    /// Newest adopted-eligible snapshot, for reconciling after an ack.
    latest: Option<(u64, RoomDocument)>,
    taps: TapGate,
}

impl Mirror {
    fn hold(&mut self, fields: &[Field]) {
        for field in fields {
            *self.in_flight.entry(*field).or_insert(0) += 1;
        }
    }

    fn release(&mut self, fields: &[Field]) {
        for field in fields {
            if let Some(count) = self.in_flight.get_mut(field) {
                *count -= 1;
                if *count == 0 {
                    self.in_flight.remove(field);
                }
            }
        }
    }

    fn is_held(&self, field: Field) -> bool {
        self.in_flight.contains_key(&field)
    }

    /// Copy unheld fields from a today-valid document.
    fn mirror(&mut self, document: &RoomDocument, only: Option<&[Field]>) {
        let wanted = |field: Field| only.is_none_or(|fields| fields.contains(&field)) && !self.is_held(field);
        let water = wanted(Field::WaterLevel);
        let unread = wanted(Field::HasUnreadMessage);
        let message = wanted(Field::LastMessage);
        if water {
            self.local.water_level = clamp_level(document.water_level);
        }
        if unread {
            self.local.has_unread_message = document.has_unread_message;
        }
        if message {
            self.local.last_message.clone_from(&document.last_message);
        }
    }
}

type WriteFuture = Pin<Box<dyn Future<Output = Result<WriteAck, StoreError>> + Send>>;

/// One store write waiting for the writer task.
struct QueuedWrite<S> {
    core: Arc<Core<S>>,
    kind: WriteKind,
    held: Vec<Field>,
    write: WriteFuture,
    reply: oneshot::Sender<Result<WriteAck, StoreError>>,
}

struct Core<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: SanctuaryConfig,
    mirror: Mutex<Mirror>,
    events: broadcast::Sender<SyncEvent>,
    writes: mpsc::UnboundedSender<QueuedWrite<S>>,
}

impl<S: DocumentStore> Core<S> {
    fn mirror(&self) -> MutexGuard<'_, Mirror> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine; the hook is optional.
        let _ = self.events.send(event);
    }

    fn room_id(&self) -> &str {
        &self.config.room_id
    }

    fn apply_snapshot(self: &Arc<Self>, snapshot: Snapshot) -> SnapshotAction {
        let today = self.clock.today();
        let mut mirror = self.mirror();

        if snapshot.version < mirror.acked_floor {
            let floor = mirror.acked_floor;
            drop(mirror);
            debug!(room_id = %self.room_id(), version = snapshot.version, floor, "sanctuary: stale snapshot ignored");
            self.emit(SyncEvent::SnapshotIgnored { version: snapshot.version, floor });
            return SnapshotAction::Ignored { version: snapshot.version, floor };
        }

        let Some(document) = snapshot.document else {
            drop(mirror);
            info!(room_id = %self.room_id(), %today, "sanctuary: room absent; creating default document");
            let seed = RoomDocument::fresh(&today, &self.config.welcome_message);
            let store = Arc::clone(&self.store);
            let room = self.room_id().to_owned();
            let write = self.queue_write(WriteKind::Seed, Vec::new(), async move {
                let outcome = store.create_if_absent(&room, &seed).await?;
                Ok(WriteAck { version: outcome.version })
            });
            return SnapshotAction::Seeding(write);
        };

        if let DayStatus::Stale { last_reset_date } = DayStatus::classify(&document, &today) {
            drop(mirror);
            info!(room_id = %self.room_id(), stale_date = %last_reset_date, %today, "sanctuary: day rolled over; resetting");
            self.emit(SyncEvent::ResetIssued { stale_date: last_reset_date.clone(), today: today.clone() });
            let write = self.queue_update(WriteKind::DailyReset, RoomPatch::daily_reset(&today), Vec::new());
            return SnapshotAction::Resetting { stale_date: last_reset_date, write };
        }

        mirror.mirror(&document, None);
        mirror.local.snapshot_version = snapshot.version;
        if mirror.latest.as_ref().is_none_or(|(v, _)| snapshot.version >= *v) {
            mirror.latest = Some((snapshot.version, document));
        }
        drop(mirror);

        debug!(room_id = %self.room_id(), version = snapshot.version, "sanctuary: snapshot adopted");
        self.emit(SyncEvent::SnapshotAdopted { version: snapshot.version });
        SnapshotAction::Adopted { version: snapshot.version }
    }

    /// Apply an optimistic mutation and persist the patch it returns, holding
    /// the patch's fields until the write settles.
    fn optimistic(self: &Arc<Self>, kind: WriteKind, mutate: impl FnOnce(&mut LocalState) -> RoomPatch) -> PendingWrite {
        let patch = {
            let mut mirror = self.mirror();
            let patch = mutate(&mut mirror.local);
            mirror.hold(&patch.fields());
            patch
        };
        let held = patch.fields();
        self.queue_update(kind, patch, held)
    }

    fn queue_update(self: &Arc<Self>, kind: WriteKind, patch: RoomPatch, held: Vec<Field>) -> PendingWrite {
        let store = Arc::clone(&self.store);
        let room = self.room_id().to_owned();
        self.queue_write(kind, held, async move { store.update(&room, &patch).await })
    }

    fn queue_write<F>(self: &Arc<Self>, kind: WriteKind, held: Vec<Field>, write: F) -> PendingWrite
    where
        F: Future<Output = Result<WriteAck, StoreError>> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job = QueuedWrite { core: Arc::clone(self), kind, held, write: Box::pin(write), reply };
        if let Err(mpsc::error::SendError(job)) = self.writes.send(job) {
            // Writer is gone; dropping the reply resolves the outcome as Closed.
            job.core.mirror().release(&job.held);
        }
        PendingWrite { rx }
    }

    fn settle(&self, kind: WriteKind, held: &[Field], result: &Result<WriteAck, StoreError>) {
        {
            let mut mirror = self.mirror();
            mirror.release(held);
            if let Ok(ack) = result {
                mirror.acked_floor = mirror.acked_floor.max(ack.version);
                // A newer snapshot arrived while these fields were held.
                let newer = mirror
                    .latest
                    .as_ref()
                    .filter(|(v, _)| *v > ack.version)
                    .map(|(_, doc)| doc.clone());
                if let Some(doc) = newer {
                    mirror.mirror(&doc, Some(held));
                }
            }
        }

        match result {
            Ok(ack) => {
                debug!(room_id = %self.room_id(), ?kind, version = ack.version, "sanctuary: write persisted");
                self.emit(SyncEvent::WritePersisted { kind, version: ack.version });
            }
            Err(e) => {
                warn!(room_id = %self.room_id(), ?kind, error = %e, "sanctuary: write failed");
                self.emit(SyncEvent::WriteFailed { kind, error: e.clone() });
            }
        }
    }
}

/// Run queued writes one at a time, in the order they were issued.
async fn run_writer<S: DocumentStore>(mut queue: mpsc::UnboundedReceiver<QueuedWrite<S>>) {
    while let Some(job) = queue.recv().await {
        let result = job.write.await;
        job.core.settle(job.kind, &job.held, &result);
        let _ = job.reply.send(result);
    }
}

async fn run_sync<S: DocumentStore>(core: Arc<Core<S>>, mut subscription: Subscription) {
    info!(room_id = %subscription.room_id(), "sanctuary: subscription started");
    let error = loop {
        match subscription.next().await {
            Some(Ok(snapshot)) => {
                core.apply_snapshot(snapshot);
            }
            Some(Err(e)) => break Some(e),
            None => break None,
        }
    };
    match &error {
        Some(e) => warn!(room_id = %core.room_id(), error = %e, "sanctuary: subscription ended with error"),
        None => info!(room_id = %core.room_id(), "sanctuary: subscription ended"),
    }
    core.emit(SyncEvent::SubscriptionEnded { error });
}

// =============================================================================
// CONTROLLER
// =============================================================================

pub struct SanctuaryController<S: DocumentStore> {
    core: Arc<Core<S>>,
    sync_task: Option<JoinHandle<()>>,
}

impl<S: DocumentStore> SanctuaryController<S> {
    /// Build a controller with no live subscription yet. Starts the writer
    /// task, so it must be called from within a tokio runtime.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: SanctuaryConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (writes, queue) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(queue));
        let mirror = Mirror {
            local: LocalState::default(),
            in_flight: HashMap::new(),
            acked_floor: 0,
            latest: None,
            taps: TapGate::new(config.unlock_taps),
        };
        Self {
            core: Arc::new(Core { store, clock, config, mirror: Mutex::new(mirror), events, writes }),
            sync_task: None,
        }
    }

    /// Build a controller and subscribe to its room.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the subscription cannot be opened.
    pub async fn attach(store: Arc<S>, clock: Arc<dyn Clock>, config: SanctuaryConfig) -> Result<Self, StoreError> {
        let mut controller = Self::new(store, clock, config);
        controller.subscribe().await?;
        Ok(controller)
    }

    /// Open the live subscription and start reducing snapshots.
    ///
    /// Replaces any subscription this controller already held.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the subscription cannot be opened.
    pub async fn subscribe(&mut self) -> Result<(), StoreError> {
        let subscription = self.core.store.subscribe(self.core.room_id()).await?;
        if let Some(previous) = self.sync_task.take() {
            previous.abort();
        }
        self.sync_task = Some(tokio::spawn(run_sync(Arc::clone(&self.core), subscription)));
        Ok(())
    }

    /// Reduce one snapshot into local state. The sync task calls this for
    /// every snapshot the subscription delivers.
    pub fn apply_snapshot(&self, snapshot: Snapshot) -> SnapshotAction {
        self.core.apply_snapshot(snapshot)
    }

    /// Add one sip: raise the level by the configured increment, clamped to 100.
    pub fn add_water(&self) -> PendingWrite {
        let increment = self.core.config.sip_increment;
        let pending = self.core.optimistic(WriteKind::AddWater, |local| {
            local.water_level = clamp_level(local.water_level + increment);
            RoomPatch::water_level(local.water_level)
        });
        info!(room_id = %self.core.room_id(), level = self.state().water_level, "sanctuary: sip added");
        pending
    }

    /// Leave a note for the other viewer. Blank text is ignored.
    pub fn send_note(&self, text: &str) -> Option<PendingWrite> {
        if text.trim().is_empty() {
            debug!(room_id = %self.core.room_id(), "sanctuary: blank note ignored");
            return None;
        }
        let pending = self.core.optimistic(WriteKind::SendNote, |local| {
            text.clone_into(&mut local.last_message);
            local.has_unread_message = true;
            local.compose_buffer.clear();
            local.composer_open = false;
            RoomPatch::note(text)
        });
        info!(room_id = %self.core.room_id(), chars = text.chars().count(), "sanctuary: note sent");
        Some(pending)
    }

    /// Reveal the current note and mark it read for everyone.
    pub fn open_note(&self) -> PendingWrite {
        let pending = self.core.optimistic(WriteKind::OpenNote, |local| {
            local.revealed_note = Some(local.last_message.clone());
            local.has_unread_message = false;
            RoomPatch::acknowledge()
        });
        info!(room_id = %self.core.room_id(), "sanctuary: note opened");
        pending
    }

    pub fn dismiss_note(&self) {
        self.core.mirror().local.revealed_note = None;
    }

    /// Replace the compose buffer.
    pub fn compose_note(&self, text: &str) {
        text.clone_into(&mut self.core.mirror().local.compose_buffer);
    }

    /// Send whatever is in the compose buffer.
    pub fn send_composed(&self) -> Option<PendingWrite> {
        let text = self.core.mirror().local.compose_buffer.clone();
        self.send_note(&text)
    }

    /// Register a tap on the hidden gesture. Returns `true` when it unlocks
    /// the composer.
    pub fn tap_moon(&self) -> bool {
        let mut mirror = self.core.mirror();
        let unlocked = mirror.taps.tap();
        if unlocked {
            mirror.local.composer_open = true;
            debug!(room_id = %self.core.room_id(), "sanctuary: composer unlocked");
        }
        unlocked
    }

    pub fn close_composer(&self) {
        self.core.mirror().local.composer_open = false;
    }

    /// Point-in-time copy of the local mirror.
    #[must_use]
    pub fn state(&self) -> LocalState {
        self.core.mirror().local.clone()
    }

    /// Current level as display volume.
    #[must_use]
    pub fn water_ml(&self) -> u32 {
        self.state().water_ml(self.core.config.daily_goal_ml)
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        self.core.room_id()
    }

    #[must_use]
    pub fn config(&self) -> &SanctuaryConfig {
        &self.core.config
    }

    /// Subscribe to sync events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.core.events.subscribe()
    }

    /// `true` while the sync task is running.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.sync_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop syncing and release the store subscription.
    pub async fn close(mut self) {
        if let Some(task) = self.sync_task.take() {
            task.abort();
            let _ = task.await;
        }
        info!(room_id = %self.core.room_id(), "sanctuary: controller closed");
    }
}

impl<S: DocumentStore> Drop for SanctuaryController<S> {
    fn drop(&mut self) {
        if let Some(task) = self.sync_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod tests;
