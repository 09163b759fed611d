//! Reversible descriptions of single-element scene mutations.

use crate::element::{Element, ElementId};
use crate::scene::Scene;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Default number of deltas kept in the log.
pub const DEFAULT_DELTA_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaOperation {
    Add,
    Update,
    Delete,
    Restore,
}

/// One reversible mutation of one element.
///
/// `before` and `after` carry full element snapshots so that a delta can be
/// applied or reverted without consulting any other state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub id: Uuid,
    pub operation: DeltaOperation,
    pub element_id: ElementId,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Element>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Element>,
}

impl Delta {
    fn new(
        operation: DeltaOperation,
        element_id: ElementId,
        timestamp: u64,
        before: Option<Element>,
        after: Option<Element>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            element_id,
            timestamp,
            before,
            after,
        }
    }

    pub(crate) fn add(element: &Element, timestamp: u64) -> Self {
        Self::new(DeltaOperation::Add, element.id, timestamp, None, Some(element.clone()))
    }

    pub(crate) fn update(before: &Element, after: &Element, timestamp: u64) -> Self {
        Self::new(DeltaOperation::Update, after.id, timestamp, Some(before.clone()), Some(after.clone()))
    }

    pub(crate) fn delete(before: &Element, after: &Element, timestamp: u64) -> Self {
        Self::new(DeltaOperation::Delete, before.id, timestamp, Some(before.clone()), Some(after.clone()))
    }

    pub(crate) fn restore(before: &Element, after: &Element, timestamp: u64) -> Self {
        Self::new(DeltaOperation::Restore, before.id, timestamp, Some(before.clone()), Some(after.clone()))
    }
}

/// Bounded log of recorded deltas. The oldest delta is evicted on overflow.
#[derive(Debug, Clone)]
pub struct DeltaManager {
    deltas: VecDeque<Delta>,
    capacity: usize,
}

impl Default for DeltaManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaManager {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_DELTA_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            deltas: VecDeque::with_capacity(capacity.min(DEFAULT_DELTA_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Append a delta, evicting the oldest at capacity.
    pub(crate) fn record(&mut self, delta: &Delta) {
        if self.deltas.len() == self.capacity {
            self.deltas.pop_front();
        }
        self.deltas.push_back(delta.clone());
    }

    pub fn create_add_delta(&mut self, element: &Element, timestamp: u64) -> Delta {
        let delta = Delta::add(element, timestamp);
        self.record(&delta);
        delta
    }

    pub fn create_update_delta(&mut self, before: &Element, after: &Element, timestamp: u64) -> Delta {
        let delta = Delta::update(before, after, timestamp);
        self.record(&delta);
        delta
    }

    pub fn create_delete_delta(&mut self, before: &Element, after: &Element, timestamp: u64) -> Delta {
        let delta = Delta::delete(before, after, timestamp);
        self.record(&delta);
        delta
    }

    pub fn create_restore_delta(&mut self, before: &Element, after: &Element, timestamp: u64) -> Delta {
        let delta = Delta::restore(before, after, timestamp);
        self.record(&delta);
        delta
    }

    /// Recorded deltas, oldest first.
    pub fn deltas(&self) -> impl Iterator<Item = &Delta> {
        self.deltas.iter()
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn clear(&mut self) {
        self.deltas.clear();
    }
}

/// Apply a delta to a scene, producing a new scene.
pub fn apply_delta(scene: &Scene, delta: &Delta) -> Scene {
    let mut next = scene.clone();
    apply_in_place(&mut next, delta);
    next
}

/// Undo a delta on a scene, producing a new scene.
pub fn revert_delta(scene: &Scene, delta: &Delta) -> Scene {
    let mut next = scene.clone();
    revert_in_place(&mut next, delta);
    next
}

/// Apply deltas in order.
pub fn apply_deltas<'a>(scene: &Scene, deltas: impl IntoIterator<Item = &'a Delta>) -> Scene {
    let mut next = scene.clone();
    for delta in deltas {
        apply_in_place(&mut next, delta);
    }
    next
}

/// Revert deltas newest first.
pub fn revert_deltas<'a, I>(scene: &Scene, deltas: I) -> Scene
where
    I: IntoIterator<Item = &'a Delta>,
    I::IntoIter: DoubleEndedIterator,
{
    let mut next = scene.clone();
    for delta in deltas.into_iter().rev() {
        revert_in_place(&mut next, delta);
    }
    next
}

pub(crate) fn apply_in_place(scene: &mut Scene, delta: &Delta) {
    match (delta.operation, &delta.after) {
        (_, Some(after)) => {
            scene.add_element(after.clone());
            if after.is_deleted {
                scene.deselect(&[delta.element_id]);
            }
        }
        (DeltaOperation::Delete, None) => {
            scene.delete_element(delta.element_id);
        }
        (DeltaOperation::Restore, None) => {
            scene.restore_element(delta.element_id);
        }
        (DeltaOperation::Add | DeltaOperation::Update, None) => {}
    }
}

pub(crate) fn revert_in_place(scene: &mut Scene, delta: &Delta) {
    match (delta.operation, &delta.before) {
        // Reverting an add tombstones the element rather than purging it, so a
        // replayed add for the same version cannot bring it back.
        (DeltaOperation::Add, _) => {
            scene.delete_element(delta.element_id);
        }
        (_, Some(before)) => {
            scene.add_element(before.clone());
            if before.is_deleted {
                scene.deselect(&[delta.element_id]);
            }
        }
        (DeltaOperation::Delete, None) => {
            scene.restore_element(delta.element_id);
        }
        (DeltaOperation::Restore, None) => {
            scene.delete_element(delta.element_id);
        }
        (DeltaOperation::Update, None) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementPatch;

    fn scene_with(el: &Element) -> Scene {
        let mut scene = Scene::new();
        scene.add_element(el.clone());
        scene
    }

    #[test]
    fn test_add_round_trip() {
        let mut manager = DeltaManager::new();
        let scene = Scene::new();
        let el = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let delta = manager.create_add_delta(&el, 1);

        let applied = apply_delta(&scene, &delta);
        assert!(applied.get_element(el.id).is_some());

        let reverted = revert_delta(&applied, &delta);
        assert!(reverted.get_element(el.id).is_none());
        assert!(reverted.get_elements().is_empty());
    }

    #[test]
    fn test_update_round_trip() {
        let mut manager = DeltaManager::new();
        let before = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let scene = scene_with(&before);
        let mut after = before.clone();
        after.apply_patch(&ElementPatch::position(30.0, 40.0));
        after.bump_version(2);
        let delta = manager.create_update_delta(&before, &after, 2);

        let applied = apply_delta(&scene, &delta);
        assert_eq!(applied.get_element(before.id), Some(&after));

        let reverted = revert_delta(&applied, &delta);
        assert_eq!(reverted.get_element(before.id), Some(&before));
    }

    #[test]
    fn test_delete_round_trip() {
        let mut manager = DeltaManager::new();
        let before = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let scene = scene_with(&before);
        let mut after = before.clone();
        after.is_deleted = true;
        after.bump_version(3);
        let delta = manager.create_delete_delta(&before, &after, 3);

        let applied = apply_delta(&scene, &delta);
        assert!(applied.get_element(before.id).is_none());

        let reverted = revert_delta(&applied, &delta);
        assert_eq!(reverted.get_element(before.id), Some(&before));
    }

    #[test]
    fn test_restore_round_trip() {
        let mut manager = DeltaManager::new();
        let mut before = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        before.is_deleted = true;
        let scene = scene_with(&before);
        let mut after = before.clone();
        after.is_deleted = false;
        after.bump_version(4);
        let delta = manager.create_restore_delta(&before, &after, 4);

        let applied = apply_delta(&scene, &delta);
        assert!(applied.get_element(before.id).is_some());

        let reverted = revert_delta(&applied, &delta);
        assert!(reverted.get_element(before.id).is_none());
        assert_eq!(reverted.get_any(before.id), Some(&before));
    }

    #[test]
    fn test_apply_and_revert_many() {
        let mut manager = DeltaManager::new();
        let el = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let add = manager.create_add_delta(&el, 1);
        let mut moved = el.clone();
        moved.apply_patch(&ElementPatch::position(5.0, 5.0));
        moved.bump_version(2);
        let update = manager.create_update_delta(&el, &moved, 2);

        let deltas = vec![add, update];
        let applied = apply_deltas(&Scene::new(), &deltas);
        assert_eq!(applied.get_element(el.id), Some(&moved));

        let reverted = revert_deltas(&applied, &deltas);
        assert!(reverted.get_elements().is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut manager = DeltaManager::with_capacity(3);
        let elements: Vec<Element> = (0..5)
            .map(|i| Element::rectangle(f64::from(i), 0.0, 1.0, 1.0))
            .collect();
        for el in &elements {
            manager.create_add_delta(el, 0);
        }
        assert_eq!(manager.len(), 3);
        let first = manager.deltas().next().unwrap();
        assert_eq!(first.element_id, elements[2].id);
    }

    #[test]
    fn test_revert_leaves_other_elements_alone() {
        let mut manager = DeltaManager::new();
        let mine = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let theirs = Element::rectangle(50.0, 50.0, 10.0, 10.0);
        let mut scene = scene_with(&theirs);
        let add = manager.create_add_delta(&mine, 1);
        scene = apply_delta(&scene, &add);

        // A remote edit lands after the local add.
        let mut remote = theirs.clone();
        remote.x = 500.0;
        remote.version = 9;
        scene.add_element(remote.clone());

        let reverted = revert_delta(&scene, &add);
        assert_eq!(reverted.get_element(theirs.id), Some(&remote));
        assert!(reverted.get_element(mine.id).is_none());
    }
}
