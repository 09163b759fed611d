//! Typed, timestamped scene actions and the reducer that applies them.
//!
//! Actions are the only path through which a new [`Scene`] snapshot is
//! produced locally. Every element-mutating action yields a [`Delta`] when a
//! [`DeltaManager`] is supplied; selection and editing actions do not.

use crate::delta::{Delta, DeltaManager};
use crate::element::{Element, ElementId, ElementPatch};
use crate::scene::Scene;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One element's share of a batched update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementUpdate {
    pub id: ElementId,
    pub patch: ElementPatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ActionKind {
    AddElement(Element),
    UpdateElement(ElementUpdate),
    /// Several elements changed by one gesture; recorded as one undo step.
    UpdateElements(Vec<ElementUpdate>),
    DeleteElement(ElementId),
    RestoreElement(ElementId),
    Select(Vec<ElementId>),
    Deselect(Vec<ElementId>),
    SelectAll,
    ClearSelection,
    ToggleSelection(ElementId),
    StartEditingText(ElementId),
    StopEditingText,
}

impl ActionKind {
    /// Whether the action changes element state (and so is synced and undoable).
    pub fn mutates_elements(&self) -> bool {
        matches!(
            self,
            ActionKind::AddElement(_)
                | ActionKind::UpdateElement(_)
                | ActionKind::UpdateElements(_)
                | ActionKind::DeleteElement(_)
                | ActionKind::RestoreElement(_)
        )
    }
}

/// A dispatched scene action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    /// Epoch millis at creation.
    pub timestamp: u64,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl Action {
    pub fn new(kind: ActionKind, timestamp: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            kind,
        }
    }

    pub fn add_element(element: Element, timestamp: u64) -> Self {
        Self::new(ActionKind::AddElement(element), timestamp)
    }

    pub fn update_element(id: ElementId, patch: ElementPatch, timestamp: u64) -> Self {
        Self::new(ActionKind::UpdateElement(ElementUpdate { id, patch }), timestamp)
    }

    pub fn update_elements(updates: Vec<ElementUpdate>, timestamp: u64) -> Self {
        Self::new(ActionKind::UpdateElements(updates), timestamp)
    }

    pub fn delete_element(id: ElementId, timestamp: u64) -> Self {
        Self::new(ActionKind::DeleteElement(id), timestamp)
    }

    pub fn restore_element(id: ElementId, timestamp: u64) -> Self {
        Self::new(ActionKind::RestoreElement(id), timestamp)
    }

    pub fn select(ids: Vec<ElementId>, timestamp: u64) -> Self {
        Self::new(ActionKind::Select(ids), timestamp)
    }

    pub fn deselect(ids: Vec<ElementId>, timestamp: u64) -> Self {
        Self::new(ActionKind::Deselect(ids), timestamp)
    }

    pub fn select_all(timestamp: u64) -> Self {
        Self::new(ActionKind::SelectAll, timestamp)
    }

    pub fn clear_selection(timestamp: u64) -> Self {
        Self::new(ActionKind::ClearSelection, timestamp)
    }

    pub fn toggle_selection(id: ElementId, timestamp: u64) -> Self {
        Self::new(ActionKind::ToggleSelection(id), timestamp)
    }

    pub fn start_editing_text(id: ElementId, timestamp: u64) -> Self {
        Self::new(ActionKind::StartEditingText(id), timestamp)
    }

    pub fn stop_editing_text(timestamp: u64) -> Self {
        Self::new(ActionKind::StopEditingText, timestamp)
    }
}

/// Apply an action to a scene, producing a new scene.
///
/// The input scene is never mutated, so it stays usable as an undo snapshot.
pub fn reduce(scene: &Scene, action: &Action, deltas: Option<&mut DeltaManager>) -> Scene {
    reduce_with_deltas(scene, action, deltas).0
}

/// Like [`reduce`], also returning the deltas the action produced.
///
/// Deltas are returned even when no manager is supplied. Local mutations of
/// existing elements bump the element version so that peers accept them.
pub fn reduce_with_deltas(
    scene: &Scene,
    action: &Action,
    mut manager: Option<&mut DeltaManager>,
) -> (Scene, Vec<Delta>) {
    let now = action.timestamp;
    let mut next = scene.clone();
    let mut produced = Vec::new();

    match &action.kind {
        ActionKind::AddElement(element) => {
            let mut element = element.clone();
            if element.updated == 0 {
                element.updated = now;
            }
            produced.push(record(manager.as_deref_mut(), Delta::add(&element, now)));
            next.add_element(element);
        }
        ActionKind::UpdateElement(update) => {
            if let Some(delta) = update_one(scene, &mut next, update, now, manager.as_deref_mut()) {
                produced.push(delta);
            }
        }
        ActionKind::UpdateElements(updates) => {
            for update in updates {
                if let Some(delta) = update_one(scene, &mut next, update, now, manager.as_deref_mut()) {
                    produced.push(delta);
                }
            }
        }
        ActionKind::DeleteElement(id) => {
            // Read the before-state from the untouched input scene.
            if let Some(before) = scene.get_element(*id) {
                next.delete_element(*id);
                if let Some(after) = next.get_any_mut(*id) {
                    after.bump_version(now);
                    let after = after.clone();
                    produced.push(record(manager.as_deref_mut(), Delta::delete(before, &after, now)));
                }
            }
        }
        ActionKind::RestoreElement(id) => {
            if let Some(before) = scene.get_any(*id).filter(|el| el.is_deleted) {
                next.restore_element(*id);
                if let Some(after) = next.get_any_mut(*id) {
                    after.bump_version(now);
                    let after = after.clone();
                    produced.push(record(manager.as_deref_mut(), Delta::restore(before, &after, now)));
                }
            }
        }
        ActionKind::Select(ids) => next.set_selected_elements(ids),
        ActionKind::Deselect(ids) => next.deselect(ids),
        ActionKind::SelectAll => next.select_all(),
        ActionKind::ClearSelection => next.clear_selection(),
        ActionKind::ToggleSelection(id) => next.toggle_element_selection(*id),
        ActionKind::StartEditingText(id) => next.start_editing(*id),
        ActionKind::StopEditingText => next.stop_editing(),
    }

    (next, produced)
}

fn update_one(
    original: &Scene,
    next: &mut Scene,
    update: &ElementUpdate,
    now: u64,
    manager: Option<&mut DeltaManager>,
) -> Option<Delta> {
    // Deleted elements are treated as absent: the update raced a delete.
    let before = original.get_element(update.id)?;
    let after = next.get_any_mut(update.id)?;
    after.apply_patch(&update.patch);
    if after == before {
        return None;
    }
    after.bump_version(now);
    let after = after.clone();
    Some(record(manager, Delta::update(before, &after, now)))
}

/// Log `delta` in the manager, if there is one.
fn record(manager: Option<&mut DeltaManager>, delta: Delta) -> Delta {
    if let Some(m) = manager {
        m.record(&delta);
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{DeltaOperation, revert_deltas};
    use crate::element::SerializableColor;

    fn scene_with(el: &Element) -> Scene {
        let mut scene = Scene::new();
        scene.add_element(el.clone());
        scene
    }

    #[test]
    fn test_reduce_leaves_input_untouched() {
        let el = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let scene = scene_with(&el);
        let snapshot = scene.clone();

        let next = reduce(&scene, &Action::update_element(el.id, ElementPatch::position(5.0, 5.0), 10), None);
        assert_eq!(scene, snapshot);
        assert!((next.get_element(el.id).unwrap().x - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_add_records_delta() {
        let mut manager = DeltaManager::new();
        let el = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let (next, deltas) = reduce_with_deltas(&Scene::new(), &Action::add_element(el.clone(), 7), Some(&mut manager));

        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].operation, DeltaOperation::Add);
        assert_eq!(manager.len(), 1);
        let stored = next.get_element(el.id).unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.updated, 7);
    }

    #[test]
    fn test_detached_deltas_match_recorded_ones() {
        let el = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let scene = scene_with(&el);
        let action = Action::delete_element(el.id, 5);

        let mut manager = DeltaManager::new();
        let (_, recorded) = reduce_with_deltas(&scene, &action, Some(&mut manager));
        let (_, detached) = reduce_with_deltas(&scene, &action, None);

        assert_eq!(manager.len(), 1);
        assert_eq!(detached.len(), 1);
        assert_eq!(detached[0].operation, DeltaOperation::Delete);
        assert_eq!(detached[0].before, recorded[0].before);
        assert_eq!(detached[0].after.as_ref().map(|el| el.is_deleted), Some(true));
        assert_eq!(detached[0].after.as_ref().map(|el| el.version), Some(2));
    }

    #[test]
    fn test_update_bumps_version_and_captures_before() {
        let mut manager = DeltaManager::new();
        let el = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let scene = scene_with(&el);
        let red = SerializableColor::new(255, 0, 0, 255);

        let (next, deltas) = reduce_with_deltas(
            &scene,
            &Action::update_element(el.id, ElementPatch::stroke_color(red), 20),
            Some(&mut manager),
        );
        let updated = next.get_element(el.id).unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.style.stroke_color, red);
        assert_eq!(deltas[0].before.as_ref(), Some(&el));
        assert_eq!(deltas[0].after.as_ref(), Some(updated));
    }

    #[test]
    fn test_update_without_change_is_silent() {
        let el = Element::rectangle(3.0, 4.0, 10.0, 10.0);
        let scene = scene_with(&el);
        let (next, deltas) =
            reduce_with_deltas(&scene, &Action::update_element(el.id, ElementPatch::position(3.0, 4.0), 1), None);
        assert!(deltas.is_empty());
        assert_eq!(next.get_element(el.id).unwrap().version, 1);
    }

    #[test]
    fn test_update_of_missing_or_deleted_is_noop() {
        let el = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let mut scene = scene_with(&el);
        scene.delete_element(el.id);

        let (next, deltas) =
            reduce_with_deltas(&scene, &Action::update_element(el.id, ElementPatch::position(9.0, 9.0), 1), None);
        assert!(deltas.is_empty());
        assert_eq!(next, scene);

        let (next, deltas) = reduce_with_deltas(
            &scene,
            &Action::update_element(ElementId::new_v4(), ElementPatch::position(9.0, 9.0), 1),
            None,
        );
        assert!(deltas.is_empty());
        assert_eq!(next, scene);
    }

    #[test]
    fn test_delete_and_restore_bump_versions() {
        let el = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let scene = scene_with(&el);

        let deleted = reduce(&scene, &Action::delete_element(el.id, 1), None);
        let tomb = deleted.get_any(el.id).unwrap();
        assert!(tomb.is_deleted);
        assert_eq!(tomb.version, 2);

        // Deleting twice does nothing more.
        let (again, deltas) = reduce_with_deltas(&deleted, &Action::delete_element(el.id, 2), None);
        assert!(deltas.is_empty());
        assert_eq!(again.get_any(el.id).unwrap().version, 2);

        let restored = reduce(&deleted, &Action::restore_element(el.id, 3), None);
        let live = restored.get_element(el.id).unwrap();
        assert_eq!(live.id, el.id);
        assert_eq!(live.version, 3);
    }

    #[test]
    fn test_batched_update_yields_one_delta_per_element() {
        let a = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let b = Element::rectangle(50.0, 0.0, 10.0, 10.0);
        let mut scene = scene_with(&a);
        scene.add_element(b.clone());

        let action = Action::update_elements(
            vec![
                ElementUpdate { id: a.id, patch: ElementPatch::position(1.0, 1.0) },
                ElementUpdate { id: b.id, patch: ElementPatch::position(51.0, 1.0) },
            ],
            5,
        );
        let (next, deltas) = reduce_with_deltas(&scene, &action, None);
        assert_eq!(deltas.len(), 2);

        let reverted = revert_deltas(&next, &deltas);
        assert_eq!(reverted.get_element(a.id), Some(&a));
        assert_eq!(reverted.get_element(b.id), Some(&b));
    }

    #[test]
    fn test_selection_actions_produce_no_deltas() {
        let el = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let scene = scene_with(&el);
        let mut manager = DeltaManager::new();

        let selected = reduce(&scene, &Action::select(vec![el.id], 1), Some(&mut manager));
        assert!(selected.is_selected(el.id));
        let toggled = reduce(&selected, &Action::toggle_selection(el.id, 2), Some(&mut manager));
        assert!(!toggled.has_selection());
        let all = reduce(&toggled, &Action::select_all(3), Some(&mut manager));
        assert!(all.is_selected(el.id));
        let cleared = reduce(&all, &Action::clear_selection(4), Some(&mut manager));
        assert!(!cleared.has_selection());
        assert!(manager.is_empty());
        assert!(!Action::select_all(0).kind.mutates_elements());
    }

    #[test]
    fn test_editing_actions() {
        let el = Element::text(0.0, 0.0, "hello");
        let scene = scene_with(&el);
        let editing = reduce(&scene, &Action::start_editing_text(el.id, 1), None);
        assert_eq!(editing.editing(), Some(el.id));
        let stopped = reduce(&editing, &Action::stop_editing_text(2), None);
        assert_eq!(stopped.editing(), None);
    }

    #[test]
    fn test_action_serializes_type_and_payload() {
        let id = ElementId::new_v4();
        let action = Action::delete_element(id, 99);
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "delete-element");
        assert_eq!(value["payload"], id.to_string());
        assert_eq!(value["timestamp"], 99);
    }
}
