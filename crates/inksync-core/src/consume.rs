//! Ingestion pipeline for remote element state.
//!
//! The [`ConsumptionEngine`] holds the sync-facing projection of the scene:
//! one entry per element id, merged through [`reconcile`](crate::reconcile).
//! After every merge it reports dirty regions to its subscribers so a
//! renderer can redraw only what changed.

use crate::element::{Element, ElementId, ElementKind};
use crate::reconcile::{ReconciliationManager, ReconciliationResult};
use kurbo::Rect;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Padding added around dirty bounds, in scene units.
pub const DIRTY_PADDING: f64 = 10.0;

/// An element object from an untrusted source failed the shape check.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("element is not a JSON object")]
    NotAnObject,
    #[error("missing or invalid field `{0}`")]
    InvalidField(&'static str),
    #[error("unknown element type `{0}`")]
    UnknownType(String),
    #[error("malformed element: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Screen area that needs a redraw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DirtyRegion {
    Rect(Rect),
    /// Used when there is no stable geometry to bound, e.g. after deletes.
    FullScene,
}

/// What subscribers receive after a merge.
#[derive(Debug)]
pub struct ConsumeEvent<'a> {
    pub elements: &'a HashMap<ElementId, Element>,
    /// Ids accepted by this merge (empty for deletes and initialize).
    pub changed: &'a [ElementId],
    pub dirty: &'a [DirtyRegion],
    pub top_version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn FnMut(&ConsumeEvent<'_>)>;

/// Check that an untrusted JSON value has the minimal element shape before
/// deserializing it.
pub fn validate_element(value: &Value) -> Result<Element, ValidationError> {
    let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;

    obj.get("id")
        .and_then(Value::as_str)
        .filter(|id| ElementId::parse_str(id).is_ok())
        .ok_or(ValidationError::InvalidField("id"))?;

    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ValidationError::InvalidField("type"))?;
    if !ElementKind::TYPE_NAMES.contains(&kind) {
        return Err(ValidationError::UnknownType(kind.to_string()));
    }

    for field in ["x", "y", "width", "height"] {
        let finite = obj
            .get(field)
            .and_then(Value::as_f64)
            .is_some_and(f64::is_finite);
        if !finite {
            return Err(ValidationError::InvalidField(field));
        }
    }

    Ok(serde_json::from_value(value.clone())?)
}

/// Validate a batch, dropping (and logging) every invalid entry.
pub fn validate_elements(values: &[Value]) -> Vec<Element> {
    values
        .iter()
        .filter_map(|value| match validate_element(value) {
            Ok(el) => Some(el),
            Err(e) => {
                log::warn!("discarding invalid element: {e}");
                None
            }
        })
        .collect()
}

/// Merged element map plus change notification.
pub struct ConsumptionEngine {
    elements: HashMap<ElementId, Element>,
    reconciler: ReconciliationManager,
    auto_versioning: bool,
    top_version: u64,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
}

impl Default for ConsumptionEngine {
    fn default() -> Self {
        Self::new(false)
    }
}

impl std::fmt::Debug for ConsumptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumptionEngine")
            .field("elements", &self.elements.len())
            .field("auto_versioning", &self.auto_versioning)
            .field("top_version", &self.top_version)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl ConsumptionEngine {
    pub fn new(auto_versioning: bool) -> Self {
        Self {
            elements: HashMap::new(),
            reconciler: ReconciliationManager::new(),
            auto_versioning,
            top_version: 0,
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    /// Replace the whole map, e.g. on room join.
    pub fn initialize(&mut self, elements: impl IntoIterator<Item = Element>) {
        self.elements.clear();
        self.reconciler.clear();
        self.top_version = 0;
        for el in elements {
            self.reconciler.record(&el);
            self.top_version = self.top_version.max(el.version);
            self.elements.insert(el.id, el);
        }
        log::debug!("consumption engine initialized with {} elements", self.elements.len());
        self.notify(&[], &[DirtyRegion::FullScene]);
    }

    /// Reconcile incoming elements against the local map and merge winners.
    ///
    /// The returned result holds the accepted elements as stored, i.e. after
    /// auto-versioning.
    pub fn consume(&mut self, incoming: &[Element]) -> ReconciliationResult {
        let mut result = self.reconciler.reconcile(&self.elements, incoming);
        let mut dirty = Vec::new();
        let mut changed = Vec::with_capacity(result.accepted.len());

        for el in &mut result.accepted {
            let previous = self.elements.get(&el.id);
            if self.auto_versioning {
                if let Some(prev) = previous {
                    el.version = el.version.max(prev.version + 1);
                    self.reconciler.record(el);
                }
            }
            if previous.map(|p| p.version) != Some(el.version) {
                if let Some(prev) = previous {
                    dirty.push(padded(prev.bounds()));
                }
                dirty.push(padded(el.bounds()));
            }
            self.top_version = self.top_version.max(el.version);
            changed.push(el.id);
            self.elements.insert(el.id, el.clone());
        }

        if result.needs_render {
            self.notify(&changed, &dirty);
        }
        result
    }

    pub fn consume_element(&mut self, element: Element) -> ReconciliationResult {
        self.consume(std::slice::from_ref(&element))
    }

    /// Drop entries outright. The last accepted version stays on record, so
    /// older copies arriving later are still rejected.
    pub fn delete_elements(&mut self, ids: &[ElementId]) -> usize {
        let removed = ids.iter().filter(|id| self.elements.remove(id).is_some()).count();
        if removed > 0 {
            self.notify(&[], &[DirtyRegion::FullScene]);
        }
        removed
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&ConsumeEvent<'_>) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }

    pub fn elements(&self) -> &HashMap<ElementId, Element> {
        &self.elements
    }

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    /// Highest version ever merged.
    pub fn top_version(&self) -> u64 {
        self.top_version
    }

    pub fn auto_versioning(&self) -> bool {
        self.auto_versioning
    }

    fn notify(&mut self, changed: &[ElementId], dirty: &[DirtyRegion]) {
        let event = ConsumeEvent {
            elements: &self.elements,
            changed,
            dirty,
            top_version: self.top_version,
        };
        for (_, subscriber) in &mut self.subscribers {
            subscriber(&event);
        }
    }
}

fn padded(rect: Rect) -> DirtyRegion {
    DirtyRegion::Rect(rect.inflate(DIRTY_PADDING, DIRTY_PADDING))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn versioned(base: &Element, version: u64, nonce: u32) -> Element {
        let mut el = base.clone();
        el.version = version;
        el.version_nonce = nonce;
        el
    }

    #[test]
    fn test_validate_accepts_minimal_shape() {
        let value = json!({
            "id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "type": "rectangle",
            "x": 1, "y": 2, "width": 3, "height": 4.5
        });
        let el = validate_element(&value).unwrap();
        assert_eq!(el.kind, ElementKind::Rectangle);
        assert!((el.height - 4.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let id = "67e55044-10b1-426f-9247-bb680e5fe0c8";
        assert!(matches!(validate_element(&json!([1, 2])), Err(ValidationError::NotAnObject)));
        assert!(matches!(
            validate_element(&json!({"type": "rectangle", "x": 0, "y": 0, "width": 1, "height": 1})),
            Err(ValidationError::InvalidField("id"))
        ));
        assert!(matches!(
            validate_element(&json!({"id": id, "type": "hexagon", "x": 0, "y": 0, "width": 1, "height": 1})),
            Err(ValidationError::UnknownType(_))
        ));
        assert!(matches!(
            validate_element(&json!({"id": id, "type": "ellipse", "x": "0", "y": 0, "width": 1, "height": 1})),
            Err(ValidationError::InvalidField("x"))
        ));
        assert!(matches!(
            validate_element(&json!({"id": id, "type": "line", "x": 0, "y": 0, "width": 1, "height": 1})),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_validate_elements_drops_invalid() {
        let good = serde_json::to_value(Element::rectangle(0.0, 0.0, 1.0, 1.0)).unwrap();
        let values = vec![good, json!({"id": "nope"}), json!(null)];
        assert_eq!(validate_elements(&values).len(), 1);
    }

    #[test]
    fn test_consume_merges_and_notifies() {
        let mut engine = ConsumptionEngine::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        engine.subscribe(move |event| {
            sink.borrow_mut().push((event.changed.to_vec(), event.dirty.to_vec(), event.top_version));
        });

        let el = versioned(&Element::rectangle(0.0, 0.0, 10.0, 10.0), 2, 1);
        let result = engine.consume_element(el.clone());
        assert!(result.needs_render);
        assert_eq!(engine.get(el.id), Some(&el));

        let events = seen.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, vec![el.id]);
        assert_eq!(events[0].1, vec![DirtyRegion::Rect(Rect::new(-10.0, -10.0, 20.0, 20.0))]);
        assert_eq!(events[0].2, 2);
    }

    #[test]
    fn test_rejected_consume_does_not_notify() {
        let mut engine = ConsumptionEngine::default();
        let base = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        engine.initialize([versioned(&base, 5, 1)]);

        let calls = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&calls);
        engine.subscribe(move |_| *counter.borrow_mut() += 1);

        let result = engine.consume_element(versioned(&base, 4, 0));
        assert!(!result.needs_render);
        assert_eq!(*calls.borrow(), 0);
        assert_eq!(engine.get(base.id).unwrap().version, 5);
    }

    #[test]
    fn test_moved_element_dirties_old_and_new_bounds() {
        let mut engine = ConsumptionEngine::default();
        let base = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        engine.initialize([base.clone()]);
        let dirty = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&dirty);
        engine.subscribe(move |event| sink.borrow_mut().extend_from_slice(event.dirty));

        let mut moved = versioned(&base, 2, 0);
        moved.x = 100.0;
        engine.consume_element(moved);
        assert_eq!(dirty.borrow().len(), 2);
    }

    #[test]
    fn test_delete_is_full_scene_and_keeps_version_record() {
        let mut engine = ConsumptionEngine::default();
        let base = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        engine.consume_element(versioned(&base, 3, 0));

        let dirty = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&dirty);
        let sub = engine.subscribe(move |event| sink.borrow_mut().extend_from_slice(event.dirty));

        assert_eq!(engine.delete_elements(&[base.id]), 1);
        assert!(engine.get(base.id).is_none());
        assert_eq!(*dirty.borrow(), vec![DirtyRegion::FullScene]);

        // An older copy cannot resurrect the entry.
        assert!(engine.consume_element(versioned(&base, 2, 0)).accepted.is_empty());

        assert!(engine.unsubscribe(sub));
        assert!(!engine.unsubscribe(sub));
    }

    #[test]
    fn test_auto_versioning_moves_past_local() {
        let mut engine = ConsumptionEngine::new(true);
        let base = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        engine.initialize([versioned(&base, 7, 50)]);

        // Same version, smaller nonce: accepted, then re-versioned above local.
        let result = engine.consume_element(versioned(&base, 7, 10));
        assert_eq!(result.accepted[0].version, 8);
        assert_eq!(engine.get(base.id).unwrap().version, 8);

        // Incoming far ahead keeps its own version.
        let result = engine.consume_element(versioned(&base, 20, 0));
        assert_eq!(result.accepted[0].version, 20);
        assert_eq!(engine.top_version(), 20);
    }

    #[test]
    fn test_version_monotonicity_over_many_consumes() {
        let mut engine = ConsumptionEngine::default();
        let base = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let batches = [
            vec![versioned(&base, 3, 9)],
            vec![versioned(&base, 1, 0), versioned(&base, 5, 4)],
            vec![versioned(&base, 5, 8)],
            vec![versioned(&base, 4, 0)],
            vec![versioned(&base, 6, 1), versioned(&base, 2, 0)],
        ];

        let mut max_accepted = 0;
        for batch in &batches {
            for el in engine.consume(batch).accepted {
                max_accepted = max_accepted.max(el.version);
            }
            assert!(engine.get(base.id).unwrap().version >= max_accepted);
        }
        assert_eq!(engine.get(base.id).unwrap().version, 6);
    }
}
