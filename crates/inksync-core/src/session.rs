//! Per-client collaboration context.
//!
//! [`CollaborationSession`] owns everything one client needs to take part in
//! a room: the scene, undo history, delta log, consumption engine, sync
//! bookkeeping, rosters and the outgoing message queue. It is driven by three
//! event sources, all on the owner's thread:
//!
//! - local actions through [`dispatch`](CollaborationSession::dispatch),
//!   [`undo`](CollaborationSession::undo) and the drag methods,
//! - inbound messages through
//!   [`handle_message`](CollaborationSession::handle_message),
//! - timers through [`tick`](CollaborationSession::tick).
//!
//! Outgoing envelopes are collected with
//! [`take_outgoing`](CollaborationSession::take_outgoing) or pushed to a
//! [`Transport`] by [`pump`](CollaborationSession::pump).

use crate::action::{Action, reduce_with_deltas};
use crate::consume::{ConsumptionEngine, validate_element, validate_elements};
use crate::delta::{Delta, DeltaManager, DeltaOperation, apply_in_place, revert_in_place};
use crate::element::{Element, ElementId};
use crate::history::SceneHistory;
use crate::interaction::{PointerDownState, baseline_patches, capture_drag_baseline, merge_drag_preview};
use crate::protocol::{CursorInfo, Envelope, Message, UserInfo};
use crate::reconcile::local_dominates;
use crate::scene::Scene;
use crate::sync::{
    Backoff, BroadcastTracker, ConnectionState, CursorThrottle, PendingDeletes, SeenMessages, SyncConfig,
    UpdateClock,
};
use crate::transport::{Transport, TransportEvent};
use kurbo::{Point, Vec2};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Element state before a local change, used to pick the wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prior {
    Absent,
    Live,
    Deleted,
}

impl Prior {
    fn of(element: Option<&Element>) -> Self {
        match element {
            None => Prior::Absent,
            Some(el) if el.is_deleted => Prior::Deleted,
            Some(_) => Prior::Live,
        }
    }
}

pub struct CollaborationSession {
    config: SyncConfig,
    scene: Scene,
    history: SceneHistory,
    deltas: DeltaManager,
    engine: ConsumptionEngine,

    seen: SeenMessages,
    update_clock: UpdateClock,
    pending_deletes: PendingDeletes,
    cursor_throttle: CursorThrottle,
    broadcast: BroadcastTracker,
    backoff: Backoff,
    state: ConnectionState,
    reconnect_at: Option<u64>,
    /// Set by [`CollaborationSession::leave`]; suppresses reconnection.
    left: bool,

    self_user_id: Option<String>,
    users: HashMap<String, UserInfo>,
    cursors: HashMap<String, CursorInfo>,

    outgoing: Vec<Envelope>,
    scene_changed: bool,
    drag: Option<PointerDownState>,
}

impl CollaborationSession {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_scene(config, Scene::new())
    }

    /// Start from existing elements, e.g. a room loaded from storage.
    pub fn with_scene(config: SyncConfig, scene: Scene) -> Self {
        let mut engine = ConsumptionEngine::new(config.auto_versioning);
        engine.initialize(scene.all_elements().filter(|el| !el.is_deleted).cloned());
        Self {
            history: SceneHistory::with_depth(scene.clone(), config.undo_depth),
            deltas: DeltaManager::with_capacity(config.delta_depth),
            engine,
            seen: SeenMessages::new(config.dedup_capacity),
            update_clock: UpdateClock::new(),
            pending_deletes: PendingDeletes::new(config.dedup_capacity),
            cursor_throttle: CursorThrottle::new(config.cursor_throttle_ms),
            broadcast: BroadcastTracker::new(config.resync_interval_ms),
            backoff: Backoff::from_config(&config),
            state: ConnectionState::Disconnected,
            reconnect_at: None,
            left: false,
            self_user_id: None,
            users: HashMap::new(),
            cursors: HashMap::new(),
            outgoing: Vec::new(),
            scene_changed: false,
            drag: None,
            scene,
            config,
        }
    }

    // --- Accessors ---

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn engine(&self) -> &ConsumptionEngine {
        &self.engine
    }

    /// Mutable engine access, for subscribing a renderer.
    pub fn engine_mut(&mut self) -> &mut ConsumptionEngine {
        &mut self.engine
    }

    pub fn deltas(&self) -> &DeltaManager {
        &self.deltas
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn self_user_id(&self) -> Option<&str> {
        self.self_user_id.as_deref()
    }

    /// Room roster, ordered by user id.
    pub fn users(&self) -> Vec<&UserInfo> {
        let mut users: Vec<&UserInfo> = self.users.values().collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    /// Remote cursors, ordered by user id.
    pub fn cursors(&self) -> Vec<&CursorInfo> {
        let mut cursors: Vec<&CursorInfo> = self.cursors.values().collect();
        cursors.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        cursors
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Every element including tombstones, for the persistence sink.
    pub fn persistable_elements(&self) -> Vec<Element> {
        self.scene.all_elements().cloned().collect()
    }

    /// Envelopes waiting to be sent.
    pub fn take_outgoing(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outgoing)
    }

    /// Whether the scene changed since the last call.
    pub fn take_scene_changed(&mut self) -> bool {
        std::mem::take(&mut self.scene_changed)
    }

    // --- Local actions ---

    /// Apply a local action. Returns true if element state changed.
    pub fn dispatch(&mut self, action: Action, now: u64) -> bool {
        let (next, deltas) = reduce_with_deltas(&self.scene, &action, Some(&mut self.deltas));
        if !action.kind.mutates_elements() {
            self.scene = next;
            self.scene_changed = true;
            return false;
        }
        if deltas.is_empty() {
            log::debug!("action {} changed nothing", action.id);
            return false;
        }

        let priors = self.priors(&deltas);
        self.history.push_state(next.clone(), deltas);
        self.scene = next;
        self.scene_changed = true;
        for (id, prior) in priors {
            self.publish(id, prior, now);
        }
        true
    }

    /// Revert the last local action against the live scene.
    ///
    /// Only elements touched by that action are changed, so remote edits made
    /// since then survive. Reverted elements get a version above their current
    /// one so peers accept the undo.
    pub fn undo(&mut self, now: u64) -> bool {
        let Some(step) = self.history.undo_step() else {
            return false;
        };
        let changes = self.replay(step.deltas.iter().rev(), now, revert_in_place);
        self.finish_replay(changes, now)
    }

    /// Re-apply the last undone action against the live scene.
    pub fn redo(&mut self, now: u64) -> bool {
        let Some(step) = self.history.redo_step() else {
            return false;
        };
        let changes = self.replay(step.deltas.iter(), now, apply_in_place);
        self.finish_replay(changes, now)
    }

    fn replay<'a>(
        &mut self,
        deltas: impl Iterator<Item = &'a Delta>,
        now: u64,
        step: fn(&mut Scene, &Delta),
    ) -> Vec<(ElementId, Prior)> {
        let mut changes: Vec<(ElementId, Prior)> = Vec::new();
        for delta in deltas {
            let id = delta.element_id;
            let current = self.scene.get_any(id);
            // An edit of an element deleted remotely since then stays deleted.
            if delta.operation == DeltaOperation::Update && current.is_none_or(|el| el.is_deleted) {
                continue;
            }
            let prior = Prior::of(current);
            let floor = current.map_or(0, |el| el.version);
            step(&mut self.scene, delta);
            if let Some(el) = self.scene.get_any_mut(id) {
                el.version = el.version.max(floor);
                el.bump_version(now);
            }
            if !changes.iter().any(|(seen, _)| *seen == id) {
                changes.push((id, prior));
            }
        }
        changes
    }

    fn finish_replay(&mut self, changes: Vec<(ElementId, Prior)>, now: u64) -> bool {
        if changes.is_empty() {
            return false;
        }
        self.scene_changed = true;
        for (id, prior) in changes {
            self.publish(id, prior, now);
        }
        true
    }

    fn priors(&self, deltas: &[Delta]) -> Vec<(ElementId, Prior)> {
        let mut priors: Vec<(ElementId, Prior)> = Vec::new();
        for delta in deltas {
            if !priors.iter().any(|(id, _)| *id == delta.element_id) {
                priors.push((delta.element_id, Prior::of(self.scene.get_any(delta.element_id))));
            }
        }
        priors
    }

    /// Mirror a local change into the engine and onto the wire.
    fn publish(&mut self, id: ElementId, prior: Prior, now: u64) {
        let Some(el) = self.scene.get_any(id).cloned() else {
            return;
        };
        let message = if el.is_deleted {
            self.engine.delete_elements(&[id]);
            if prior != Prior::Live {
                return;
            }
            Ok(Message::DeleteElement { element_id: id })
        } else {
            self.engine.consume_element(el.clone());
            match prior {
                Prior::Absent => Message::add_element(&el),
                Prior::Live | Prior::Deleted => Message::update_element(&el),
            }
        };
        match message {
            Ok(message) => {
                if self.queue(message, now) {
                    self.broadcast.mark_sent(&el);
                }
            }
            Err(e) => log::warn!("failed to encode element {id}: {e}"),
        }
    }

    // --- Drag gestures ---

    /// Freeze the selected elements at gesture start.
    pub fn begin_drag(&mut self, pointer_id: u32, point: Point, now: u64) -> bool {
        let ids = self.scene.selected_ids();
        self.drag = capture_drag_baseline(&self.scene, &ids, pointer_id, point, now);
        self.drag.is_some()
    }

    /// Advisory preview of the live elements with the drag applied.
    pub fn drag_preview(&self, point: Point) -> Option<Vec<Element>> {
        let baseline = self.drag.as_ref()?;
        Some(merge_drag_preview(&self.scene.get_elements(), baseline, baseline.delta_to(point)))
    }

    /// Commit the gesture as one batched update (one undo step).
    pub fn end_drag(&mut self, point: Point, now: u64) -> bool {
        let Some(baseline) = self.drag.take() else {
            return false;
        };
        let delta = baseline.delta_to(point);
        if delta == Vec2::ZERO {
            return false;
        }
        let patches = baseline_patches(&baseline, delta);
        self.dispatch(Action::update_elements(patches, now), now)
    }

    pub fn cancel_drag(&mut self) {
        self.drag = None;
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    // --- Cursor ---

    /// Report the local pointer; sent at most once per throttle interval.
    pub fn set_cursor(&mut self, x: f64, y: f64, now: u64) {
        if let Some((x, y)) = self.cursor_throttle.push(x, y, now) {
            self.send_cursor(x, y, now);
        }
    }

    fn send_cursor(&mut self, x: f64, y: f64, now: u64) {
        let cursor = CursorInfo {
            user_id: self.self_user_id.clone().unwrap_or_default(),
            x,
            y,
            user_name: Some(self.config.user_name.clone()),
            color: Some(self.config.color.clone()),
        };
        self.queue(Message::CursorMove(cursor), now);
    }

    // --- Connection lifecycle ---

    /// Open the first connection.
    pub fn start(&mut self, transport: &mut impl Transport, now: u64) {
        self.left = false;
        self.backoff.reset();
        self.state = ConnectionState::Connecting;
        if let Err(e) = transport.connect(&self.config.endpoint) {
            log::warn!("connect failed: {e}");
            self.on_disconnected(now);
        }
    }

    pub fn on_connected(&mut self, now: u64) {
        log::info!("connected, joining room {}", self.config.room_id);
        self.state = ConnectionState::Connected;
        self.reconnect_at = None;
        self.backoff.reset();
        self.queue(
            Message::JoinRoom {
                room_id: self.config.room_id.clone(),
                user_name: self.config.user_name.clone(),
                color: self.config.color.clone(),
            },
            now,
        );
    }

    pub fn on_disconnected(&mut self, now: u64) {
        self.cursors.clear();
        if self.left {
            self.state = ConnectionState::Disconnected;
            return;
        }
        match self.backoff.next_delay() {
            Some(delay) => {
                log::info!("disconnected, retrying in {delay} ms (attempt {})", self.backoff.attempts());
                self.state = ConnectionState::Reconnecting;
                self.reconnect_at = Some(now + delay);
            }
            None => {
                log::warn!("giving up after {} reconnect attempts", self.backoff.attempts());
                self.state = ConnectionState::Offline;
                self.reconnect_at = None;
            }
        }
    }

    /// Announce departure; no reconnection follows.
    pub fn leave(&mut self, now: u64) {
        self.queue(Message::LeaveRoom, now);
        self.left = true;
        self.reconnect_at = None;
    }

    /// Run timers. Returns true when a reconnect attempt is due; the caller
    /// opens a new connection and reports the outcome.
    pub fn tick(&mut self, now: u64) -> bool {
        match self.state {
            ConnectionState::Connected => {
                if let Some((x, y)) = self.cursor_throttle.flush(now) {
                    self.send_cursor(x, y, now);
                }
                if self.broadcast.due(now) {
                    self.resync(now);
                }
                false
            }
            ConnectionState::Reconnecting if self.reconnect_at.is_some_and(|at| now >= at) => {
                self.reconnect_at = None;
                self.state = ConnectionState::Connecting;
                true
            }
            _ => false,
        }
    }

    /// Broadcast every element whose version moved past the last broadcast.
    fn resync(&mut self, now: u64) {
        let changed = self.broadcast.collect_changed(self.scene.all_elements(), now);
        if !changed.is_empty() {
            log::debug!("resync: broadcasting {} elements", changed.len());
        }
        for el in changed {
            match Message::update_element(&el) {
                Ok(message) => {
                    self.queue(message, now);
                }
                Err(e) => log::warn!("failed to encode element {}: {e}", el.id),
            }
        }
    }

    /// One iteration of the client loop: drain transport events, run timers
    /// and flush outgoing messages.
    pub fn pump(&mut self, transport: &mut impl Transport, now: u64) {
        for event in transport.poll_events() {
            match event {
                TransportEvent::Connected => self.on_connected(now),
                TransportEvent::Disconnected => self.on_disconnected(now),
                TransportEvent::Message(envelope) => self.handle_envelope(envelope, now),
                TransportEvent::Error(message) => log::warn!("transport error: {message}"),
            }
        }
        if self.tick(now) {
            if let Err(e) = transport.connect(&self.config.endpoint) {
                log::warn!("reconnect failed: {e}");
                self.on_disconnected(now);
            }
        }
        for envelope in self.take_outgoing() {
            if let Err(e) = transport.send(&envelope) {
                log::warn!("dropping {} message: {e}", envelope.message.kind());
            }
        }
    }

    /// Queue a message if connected. Element changes made while offline are
    /// picked up by the next resync instead.
    fn queue(&mut self, message: Message, now: u64) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }
        self.outgoing.push(Envelope::new(message, now));
        true
    }

    // --- Inbound ---

    /// Decode and apply one inbound message. Malformed input is dropped.
    pub fn handle_message(&mut self, text: &str, now: u64) {
        match Envelope::decode(text) {
            Ok(envelope) => self.handle_envelope(envelope, now),
            Err(e) => log::warn!("discarding malformed message: {e}"),
        }
    }

    pub fn handle_envelope(&mut self, envelope: Envelope, now: u64) {
        if !self.seen.insert(&envelope.id) {
            log::debug!("duplicate message {}", envelope.id);
            return;
        }
        match envelope.message {
            Message::SyncRoomState {
                elements,
                users,
                cursors,
                your_user_id,
            } => self.apply_room_state(elements, users, cursors, your_user_id),
            Message::UserJoin {
                user_id,
                user_name,
                color,
            } => {
                self.users.insert(
                    user_id.clone(),
                    UserInfo {
                        user_id,
                        user_name,
                        color,
                    },
                );
            }
            Message::UserLeave { user_id } => {
                self.users.remove(&user_id);
                self.cursors.remove(&user_id);
            }
            Message::AddElement { element } => {
                if let Some(el) = validated(&element) {
                    let id = el.id;
                    self.merge_remote(vec![el]);
                    self.settle_pending_delete(id, envelope.timestamp, now);
                }
            }
            Message::UpdateElement { element } => {
                if let Some(el) = validated(&element) {
                    if self.update_clock.admit(el.id, envelope.timestamp) {
                        let id = el.id;
                        self.merge_remote(vec![el]);
                        self.settle_pending_delete(id, envelope.timestamp, now);
                    } else {
                        log::debug!("dropping superseded update for {}", el.id);
                    }
                }
            }
            Message::DeleteElement { element_id } => {
                // Later-delivered updates sent before the delete are superseded.
                self.update_clock.admit(element_id, envelope.timestamp);
                self.remote_delete(element_id, envelope.timestamp, now);
            }
            Message::CursorMove(cursor) => {
                if self.self_user_id.as_deref() != Some(cursor.user_id.as_str()) {
                    self.cursors.insert(cursor.user_id.clone(), cursor);
                }
            }
            Message::Error { message } => log::warn!("server error: {message}"),
            Message::JoinRoom { .. } | Message::LeaveRoom => {
                log::debug!("ignoring client-only message");
            }
        }
    }

    fn apply_room_state(
        &mut self,
        elements: Vec<Value>,
        users: Vec<UserInfo>,
        cursors: Vec<CursorInfo>,
        your_user_id: String,
    ) {
        let elements = validate_elements(&elements);
        log::info!("room state: {} elements, {} users", elements.len(), users.len());

        self.users = users.into_iter().map(|u| (u.user_id.clone(), u)).collect();
        self.cursors = cursors
            .into_iter()
            .filter(|c| c.user_id != your_user_id)
            .map(|c| (c.user_id.clone(), c))
            .collect();
        self.self_user_id = Some(your_user_id);

        if self.scene.all_elements().next().is_none() {
            for el in &elements {
                self.broadcast.mark_sent(el);
            }
            self.engine.initialize(elements.iter().filter(|el| !el.is_deleted).cloned());
            self.scene = Scene::from_elements(elements);
            self.history.clear(self.scene.clone());
        } else {
            // Local elements the server does not know are sent again.
            let known: HashSet<ElementId> = elements.iter().map(|el| el.id).collect();
            let unknown: Vec<ElementId> = self
                .scene
                .all_elements()
                .map(|el| el.id)
                .filter(|id| !known.contains(id))
                .collect();
            for id in unknown {
                self.broadcast.forget(id);
            }
            self.merge_remote(elements);
        }
        self.scene_changed = true;
        // Offline edits go out on the next tick.
        self.broadcast.expedite();
    }

    /// Reconcile remote elements into the engine and the scene.
    fn merge_remote(&mut self, incoming: Vec<Element>) {
        // Tombstones live in the scene only, so screen against it first.
        let candidates: Vec<Element> = incoming
            .into_iter()
            .filter(|el| match self.scene.get_any(el.id) {
                Some(local) if local_dominates(local, el) => {
                    log::debug!("rejecting stale element {} v{}", el.id, el.version);
                    false
                }
                _ => true,
            })
            .collect();
        if candidates.is_empty() {
            return;
        }

        let result = self.engine.consume(&candidates);
        let mut tombstoned = Vec::new();
        for el in result.accepted {
            self.broadcast.mark_sent(&el);
            if self.drag.as_ref().is_some_and(|d| d.contains(el.id)) {
                log::debug!("remote update to {} during drag", el.id);
            }
            let id = el.id;
            let deleted = el.is_deleted;
            self.scene.add_element(el);
            if deleted {
                self.scene.delete_element(id);
                tombstoned.push(id);
            }
        }
        if !tombstoned.is_empty() {
            self.engine.delete_elements(&tombstoned);
        }
        if result.needs_render {
            self.scene_changed = true;
        }
    }

    /// Tombstone an element on a peer's request. The bumped tombstone is left
    /// unmarked so the next resync sends it; it must outrank any edit that
    /// crossed the delete on the wire.
    fn remote_delete(&mut self, id: ElementId, timestamp: u64, now: u64) {
        match self.scene.get_any(id) {
            None => {
                log::debug!("delete for unknown element {id}, holding it");
                self.pending_deletes.insert(id, timestamp);
                return;
            }
            Some(el) if el.is_deleted => {
                log::debug!("delete for deleted element {id}");
                return;
            }
            Some(_) => {}
        }
        self.scene.delete_element(id);
        if let Some(el) = self.scene.get_any_mut(id) {
            el.bump_version(now);
        }
        self.engine.delete_elements(&[id]);
        self.scene_changed = true;
    }

    /// Apply a delete that overtook this element's add or update.
    fn settle_pending_delete(&mut self, id: ElementId, timestamp: u64, now: u64) {
        match self.pending_deletes.take(id) {
            Some(deleted_at) if timestamp <= deleted_at => self.remote_delete(id, deleted_at, now),
            Some(_) => log::debug!("pending delete for {id} superseded"),
            None => {}
        }
    }
}

fn validated(value: &Value) -> Option<Element> {
    match validate_element(value) {
        Ok(el) => Some(el),
        Err(e) => {
            log::warn!("discarding invalid element: {e}");
            None
        }
    }
}
