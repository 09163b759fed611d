//! Room registry and the authoritative element map of each room.

use dashmap::DashMap;
use inksync_core::consume::validate_element;
use inksync_core::protocol::{CursorInfo, Envelope, Message, UserInfo};
use inksync_core::reconcile::local_dominates;
use inksync_core::sync::SeenMessages;
use inksync_core::{Element, ElementId};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 256;
const DEDUP_CAPACITY: usize = 1_000;

/// A relayed envelope and the user it came from.
pub type Relay = (String, Envelope);

struct Room {
    tx: broadcast::Sender<Relay>,
    users: HashMap<String, UserInfo>,
    cursors: HashMap<String, CursorInfo>,
    /// Reconciled elements, tombstones included.
    elements: HashMap<ElementId, Element>,
    /// First-seen order of `elements`; snapshots follow it.
    z_order: Vec<ElementId>,
    seen: SeenMessages,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            users: HashMap::new(),
            cursors: HashMap::new(),
            elements: HashMap::new(),
            z_order: Vec::new(),
            seen: SeenMessages::new(DEDUP_CAPACITY),
        }
    }

    fn snapshot(&self, your_user_id: &str, now: u64) -> Envelope {
        let elements: Vec<Value> = self
            .z_order
            .iter()
            .filter_map(|id| self.elements.get(id))
            .filter_map(|el| match serde_json::to_value(el) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("skipping unencodable element {}: {}", el.id, e);
                    None
                }
            })
            .collect();
        let mut users: Vec<UserInfo> = self.users.values().cloned().collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Envelope::new(
            Message::SyncRoomState {
                elements,
                users,
                cursors: self.cursors.values().cloned().collect(),
                your_user_id: your_user_id.to_string(),
            },
            now,
        )
    }

    /// Keep `incoming` if it beats the held copy.
    fn merge(&mut self, incoming: Element) -> bool {
        if let Some(held) = self.elements.get(&incoming.id) {
            if local_dominates(held, &incoming) {
                debug!("stale element {} v{} rejected", incoming.id, incoming.version);
                return false;
            }
        }
        let id = incoming.id;
        if self.elements.insert(id, incoming).is_none() {
            self.z_order.push(id);
        }
        true
    }
}

/// Shared server state.
#[derive(Default)]
pub struct AppState {
    rooms: DashMap<String, Room>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user to a room. Returns the room subscription and the
    /// `sync_room_state` envelope for the joining user.
    pub fn join(&self, room_id: &str, user: UserInfo, now: u64) -> (broadcast::Receiver<Relay>, Envelope) {
        let mut room = self.rooms.entry(room_id.to_string()).or_insert_with(Room::new);
        let user_id = user.user_id.clone();
        room.users.insert(user_id.clone(), user);
        (room.tx.subscribe(), room.snapshot(&user_id, now))
    }

    /// Remove a user. Rooms without users or elements are dropped.
    pub fn leave(&self, room_id: &str, user_id: &str) -> bool {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        let removed = room.users.remove(user_id).is_some();
        room.cursors.remove(user_id);
        let empty = room.users.is_empty() && room.elements.is_empty();
        drop(room);
        if empty {
            self.rooms.remove(room_id);
        }
        removed
    }

    /// Fold a client envelope into the room. Returns the envelope to relay
    /// to the other peers, or `None` if it is stale, duplicate or invalid.
    pub fn apply(&self, room_id: &str, from: &str, envelope: Envelope, now: u64) -> Option<Envelope> {
        let mut room = self.rooms.get_mut(room_id)?;
        if !room.seen.insert(&envelope.id) {
            debug!("duplicate message {} from {}", envelope.id, from);
            return None;
        }
        match &envelope.message {
            Message::AddElement { element } | Message::UpdateElement { element } => {
                let element = match validate_element(element) {
                    Ok(element) => element,
                    Err(e) => {
                        warn!("invalid element from {}: {}", from, e);
                        return None;
                    }
                };
                room.merge(element).then_some(envelope)
            }
            Message::DeleteElement { element_id } => {
                let el = room.elements.get_mut(element_id).filter(|el| !el.is_deleted)?;
                el.is_deleted = true;
                el.bump_version(now);
                Some(envelope)
            }
            Message::CursorMove(cursor) => {
                let mut cursor = cursor.clone();
                cursor.user_id = from.to_string();
                room.cursors.insert(from.to_string(), cursor.clone());
                Some(Envelope {
                    message: Message::CursorMove(cursor),
                    ..envelope
                })
            }
            other => {
                debug!("{} not relayed", other.kind());
                None
            }
        }
    }

    /// Send to every subscriber of the room; the socket loop skips its own.
    pub fn broadcast(&self, room_id: &str, from: &str, envelope: Envelope) {
        if let Some(room) = self.rooms.get(room_id) {
            let _ = room.tx.send((from.to_string(), envelope));
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Element held for `id`, tombstones included.
    pub fn element(&self, room_id: &str, id: ElementId) -> Option<Element> {
        self.rooms.get(room_id)?.elements.get(&id).cloned()
    }
}
