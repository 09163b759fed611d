//! Transport-side sync state: de-duplication, ordering guards, throttling,
//! periodic resync bookkeeping and reconnection backoff.
//!
//! Nothing here owns a socket or a clock. Every time-dependent operation
//! takes `now` in epoch milliseconds so the session can be driven (and
//! tested) deterministically.

use crate::element::{Element, ElementId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Sync configuration, deserializable with defaults for every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// WebSocket URL of the relay server.
    pub endpoint: String,
    pub room_id: String,
    pub user_name: String,
    pub color: String,
    pub resync_interval_ms: u64,
    pub cursor_throttle_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub dedup_capacity: usize,
    pub undo_depth: usize,
    pub delta_depth: usize,
    pub persist_debounce_ms: u64,
    /// Re-version accepted remote elements above the local copy.
    pub auto_versioning: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:3030/ws".to_string(),
            room_id: "default".to_string(),
            user_name: "Anonymous".to_string(),
            color: "#1e88e5".to_string(),
            resync_interval_ms: 20_000,
            cursor_throttle_ms: 50,
            max_reconnect_attempts: 5,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 30_000,
            dedup_capacity: 1_000,
            undo_depth: 50,
            delta_depth: 100,
            persist_debounce_ms: 1_000,
            auto_versioning: false,
        }
    }
}

/// Connection lifecycle as surfaced to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting for the next backoff deadline.
    Reconnecting,
    /// Retry budget exhausted; no further attempts are made.
    Offline,
}

/// Bounded FIFO set of processed message ids.
#[derive(Debug, Clone)]
pub struct SeenMessages {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenMessages {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record an id. Returns false if it was already seen.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for SeenMessages {
    fn default() -> Self {
        Self::new(SyncConfig::default().dedup_capacity)
    }
}

/// Per-element timestamp of the last applied `update_element`.
#[derive(Debug, Clone, Default)]
pub struct UpdateClock {
    last: HashMap<ElementId, u64>,
}

impl UpdateClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an update only if strictly newer than the last one applied.
    pub fn admit(&mut self, id: ElementId, timestamp: u64) -> bool {
        match self.last.get(&id) {
            Some(&last) if timestamp <= last => false,
            _ => {
                self.last.insert(id, timestamp);
                true
            }
        }
    }

    pub fn last(&self, id: ElementId) -> Option<u64> {
        self.last.get(&id).copied()
    }

    pub fn forget(&mut self, id: ElementId) {
        self.last.remove(&id);
    }
}

/// Deletes that arrived before the element they name, keyed by element id
/// with the delete's timestamp. Bounded, oldest evicted first.
#[derive(Debug, Clone)]
pub struct PendingDeletes {
    order: VecDeque<ElementId>,
    at: HashMap<ElementId, u64>,
    capacity: usize,
}

impl PendingDeletes {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            at: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&mut self, id: ElementId, timestamp: u64) {
        if let Some(at) = self.at.get_mut(&id) {
            *at = (*at).max(timestamp);
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.at.remove(&oldest);
            }
        }
        self.order.push_back(id);
        self.at.insert(id, timestamp);
    }

    /// Remove and return the delete timestamp held for `id`.
    pub fn take(&mut self, id: ElementId) -> Option<u64> {
        let at = self.at.remove(&id)?;
        self.order.retain(|held| *held != id);
        Some(at)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for PendingDeletes {
    fn default() -> Self {
        Self::new(SyncConfig::default().dedup_capacity)
    }
}

/// Coalesces cursor positions to at most one send per interval.
#[derive(Debug, Clone)]
pub struct CursorThrottle {
    interval_ms: u64,
    last_sent: Option<u64>,
    pending: Option<(f64, f64)>,
}

impl CursorThrottle {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_sent: None,
            pending: None,
        }
    }

    /// Offer a new position. Returns it if it may be sent now; otherwise it
    /// replaces any pending position and waits for [`CursorThrottle::flush`].
    pub fn push(&mut self, x: f64, y: f64, now: u64) -> Option<(f64, f64)> {
        self.pending = Some((x, y));
        self.flush(now)
    }

    /// Release the pending position if the interval has elapsed.
    pub fn flush(&mut self, now: u64) -> Option<(f64, f64)> {
        let ready = self
            .last_sent
            .is_none_or(|last| now.saturating_sub(last) >= self.interval_ms);
        if !ready {
            return None;
        }
        let position = self.pending.take()?;
        self.last_sent = Some(now);
        Some(position)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Sum of element versions; grows with any accepted mutation or insert.
pub fn scene_version<'a>(elements: impl IntoIterator<Item = &'a Element>) -> u64 {
    elements.into_iter().map(|el| el.version).sum()
}

/// High-water marks of what this node has already broadcast.
#[derive(Debug, Clone)]
pub struct BroadcastTracker {
    interval_ms: u64,
    last_resync: u64,
    expedited: bool,
    per_element: HashMap<ElementId, u64>,
    scene_mark: u64,
}

impl BroadcastTracker {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_resync: 0,
            expedited: false,
            per_element: HashMap::new(),
            scene_mark: 0,
        }
    }

    /// Whether a periodic resync is due.
    pub fn due(&self, now: u64) -> bool {
        self.expedited || now.saturating_sub(self.last_resync) >= self.interval_ms
    }

    /// Elements whose version exceeds what was last broadcast, marking them
    /// as sent. Returns nothing when the scene version has not moved.
    pub fn collect_changed<'a>(&mut self, elements: impl IntoIterator<Item = &'a Element>, now: u64) -> Vec<Element> {
        self.last_resync = now;
        self.expedited = false;
        let elements: Vec<&Element> = elements.into_iter().collect();
        let version = scene_version(elements.iter().copied());
        if version <= self.scene_mark {
            return Vec::new();
        }
        let changed: Vec<Element> = elements
            .into_iter()
            .filter(|el| self.per_element.get(&el.id).is_none_or(|&sent| el.version > sent))
            .cloned()
            .collect();
        for el in &changed {
            self.mark_sent(el);
        }
        self.scene_mark = version;
        changed
    }

    /// Record that this element version reached the wire (or came from it).
    pub fn mark_sent(&mut self, element: &Element) {
        let mark = self.per_element.entry(element.id).or_insert(0);
        *mark = (*mark).max(element.version);
    }

    /// Drop the mark for an element so the next resync sends it again.
    pub fn forget(&mut self, id: ElementId) {
        if self.per_element.remove(&id).is_some() {
            self.scene_mark = 0;
        }
    }

    /// Force the next check to run regardless of the interval.
    pub fn expedite(&mut self) {
        self.expedited = true;
    }

    pub fn scene_mark(&self) -> u64 {
        self.scene_mark
    }

    pub fn sent_version(&self, id: ElementId) -> Option<u64> {
        self.per_element.get(&id).copied()
    }
}

/// Exponential reconnection delays with a retry budget.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_ms,
            max_ms,
            max_attempts,
            attempt: 0,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.reconnect_base_ms,
            config.reconnect_max_ms,
            config.max_reconnect_attempts,
        )
    }

    /// Delay before the next attempt: `min(base * 2^n, max)`. `None` once the
    /// budget is spent.
    pub fn next_delay(&mut self) -> Option<u64> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u64.checked_shl(self.attempt).unwrap_or(u64::MAX);
        let delay = self.base_ms.saturating_mul(factor).min(self.max_ms);
        self.attempt += 1;
        Some(delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seen_messages_dedups_and_evicts_oldest() {
        let mut seen = SeenMessages::new(2);
        assert!(seen.insert("a"));
        assert!(!seen.insert("a"));
        assert!(seen.insert("b"));
        assert!(seen.insert("c"));
        assert_eq!(seen.len(), 2);
        assert!(!seen.contains("a"));
        // Evicted ids are accepted again.
        assert!(seen.insert("a"));
    }

    #[test]
    fn test_pending_deletes_keep_latest_and_evict_oldest() {
        let (a, b, c) = (ElementId::new_v4(), ElementId::new_v4(), ElementId::new_v4());
        let mut pending = PendingDeletes::new(2);
        pending.insert(a, 10);
        pending.insert(a, 5);
        pending.insert(b, 20);
        assert_eq!(pending.len(), 2);

        pending.insert(c, 30);
        assert_eq!(pending.take(a), None);
        assert_eq!(pending.take(b), Some(20));
        assert_eq!(pending.take(b), None);
        assert_eq!(pending.take(c), Some(30));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_update_clock_requires_strictly_newer() {
        let mut clock = UpdateClock::new();
        let id = ElementId::new_v4();
        assert!(clock.admit(id, 100));
        assert!(!clock.admit(id, 100));
        assert!(!clock.admit(id, 50));
        assert!(clock.admit(id, 101));
        assert!(clock.admit(ElementId::new_v4(), 1));
        assert_eq!(clock.last(id), Some(101));
    }

    #[test]
    fn test_cursor_throttle_coalesces() {
        let mut throttle = CursorThrottle::new(50);
        assert_eq!(throttle.push(1.0, 1.0, 1000), Some((1.0, 1.0)));
        assert_eq!(throttle.push(2.0, 2.0, 1010), None);
        assert_eq!(throttle.push(3.0, 3.0, 1020), None);
        assert_eq!(throttle.flush(1040), None);
        // Only the newest pending position goes out.
        assert_eq!(throttle.flush(1050), Some((3.0, 3.0)));
        assert_eq!(throttle.flush(2000), None);
        assert!(!throttle.has_pending());
    }

    #[test]
    fn test_broadcast_tracker_sends_only_newer_versions() {
        let mut tracker = BroadcastTracker::new(20_000);
        let mut a = Element::rectangle(0.0, 0.0, 1.0, 1.0);
        let b = Element::rectangle(5.0, 0.0, 1.0, 1.0);

        assert!(tracker.due(20_000));
        let first = tracker.collect_changed([&a, &b], 20_000);
        assert_eq!(first.len(), 2);
        assert!(!tracker.due(30_000));

        assert!(tracker.collect_changed([&a, &b], 40_000).is_empty());

        a.bump_version(41_000);
        let second = tracker.collect_changed([&a, &b], 60_000);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, a.id);
        assert_eq!(tracker.sent_version(a.id), Some(2));
        assert_eq!(tracker.scene_mark(), 3);
    }

    #[test]
    fn test_received_versions_are_not_echoed() {
        let mut tracker = BroadcastTracker::new(1);
        let mut el = Element::rectangle(0.0, 0.0, 1.0, 1.0);
        el.version = 9;
        tracker.mark_sent(&el);
        assert!(tracker.collect_changed([&el], 10).is_empty());
    }

    #[test]
    fn test_backoff_doubles_caps_and_exhausts() {
        let mut backoff = Backoff::new(1_000, 30_000, 7);
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
        assert_eq!(backoff.next_delay(), None);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(1_000));
    }

    #[test]
    fn test_default_backoff_budget_is_five() {
        let mut backoff = Backoff::from_config(&SyncConfig::default());
        assert_eq!(std::iter::from_fn(|| backoff.next_delay()).count(), 5);
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn test_config_fills_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"room_id": "team", "auto_versioning": true}"#).unwrap();
        assert_eq!(config.room_id, "team");
        assert!(config.auto_versioning);
        assert_eq!(config.resync_interval_ms, 20_000);
        assert_eq!(config.cursor_throttle_ms, 50);
        assert_eq!(config.dedup_capacity, 1_000);
    }
}
