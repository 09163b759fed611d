//! Scene: the in-memory set of elements plus local selection state.

use crate::element::{Element, ElementId, ElementPatch};
use kurbo::Rect;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// All elements on the canvas, keyed by id, with z-order and selection.
///
/// Deleted elements are kept as tombstones; [`Scene::get_elements`] hides
/// them. Selection and editing state are local to this node and never synced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    elements: HashMap<ElementId, Element>,
    /// Z-order of element ids (back to front).
    z_order: Vec<ElementId>,
    #[serde(skip)]
    selected: HashSet<ElementId>,
    #[serde(skip)]
    editing: Option<ElementId>,
}

impl Scene {
    /// Create a new empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a scene from a list of elements (tombstones included).
    pub fn from_elements(elements: impl IntoIterator<Item = Element>) -> Self {
        let mut scene = Self::new();
        for el in elements {
            scene.add_element(el);
        }
        scene
    }

    /// Insert an element, overwriting any element with the same id.
    pub fn add_element(&mut self, element: Element) {
        let id = element.id;
        if self.elements.insert(id, element).is_none() {
            self.z_order.push(id);
        }
    }

    /// Shallow-merge `patch` into an existing element. No-op if absent.
    pub fn update_element(&mut self, id: ElementId, patch: &ElementPatch) -> bool {
        match self.elements.get_mut(&id) {
            Some(el) => {
                el.apply_patch(patch);
                true
            }
            None => false,
        }
    }

    /// Tombstone an element and drop it from the selection.
    pub fn delete_element(&mut self, id: ElementId) -> bool {
        self.selected.remove(&id);
        if self.editing == Some(id) {
            self.editing = None;
        }
        match self.elements.get_mut(&id) {
            Some(el) => {
                el.is_deleted = true;
                true
            }
            None => false,
        }
    }

    /// Clear the tombstone flag. The id is kept.
    pub fn restore_element(&mut self, id: ElementId) -> bool {
        match self.elements.get_mut(&id) {
            Some(el) => {
                el.is_deleted = false;
                true
            }
            None => false,
        }
    }

    /// Get a live (non-deleted) element.
    pub fn get_element(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id).filter(|el| !el.is_deleted)
    }

    /// Get an element regardless of its tombstone flag.
    pub fn get_any(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    pub(crate) fn get_any_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.elements.get_mut(&id)
    }

    /// Live elements in z-order (back to front).
    pub fn get_elements(&self) -> Vec<&Element> {
        self.z_order
            .iter()
            .filter_map(|id| self.elements.get(id))
            .filter(|el| !el.is_deleted)
            .collect()
    }

    /// Every element including tombstones, in z-order.
    pub fn all_elements(&self) -> impl Iterator<Item = &Element> {
        self.z_order.iter().filter_map(|id| self.elements.get(id))
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.elements.contains_key(&id)
    }

    /// Number of live elements.
    pub fn len(&self) -> usize {
        self.elements.values().filter(|el| !el.is_deleted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // --- Selection ---

    /// Replace the selection. Unknown or deleted ids are ignored.
    pub fn set_selected_elements(&mut self, ids: &[ElementId]) {
        self.selected = ids
            .iter()
            .copied()
            .filter(|id| self.get_element(*id).is_some())
            .collect();
    }

    pub fn toggle_element_selection(&mut self, id: ElementId) {
        if !self.selected.remove(&id) && self.get_element(id).is_some() {
            self.selected.insert(id);
        }
    }

    pub fn select_all(&mut self) {
        self.selected = self
            .elements
            .values()
            .filter(|el| !el.is_deleted)
            .map(|el| el.id)
            .collect();
    }

    pub fn deselect(&mut self, ids: &[ElementId]) {
        for id in ids {
            self.selected.remove(id);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    pub fn is_selected(&self, id: ElementId) -> bool {
        self.selected.contains(&id)
    }

    pub fn has_selection(&self) -> bool {
        !self.selected.is_empty()
    }

    /// Selected ids in z-order.
    pub fn selected_ids(&self) -> Vec<ElementId> {
        self.z_order
            .iter()
            .copied()
            .filter(|id| self.selected.contains(id))
            .collect()
    }

    // --- Text editing ---

    pub fn start_editing(&mut self, id: ElementId) {
        if self.get_element(id).is_some() {
            self.editing = Some(id);
        }
    }

    pub fn stop_editing(&mut self) {
        self.editing = None;
    }

    pub fn editing(&self) -> Option<ElementId> {
        self.editing
    }

    // --- Bounds ---

    /// Bounding box of all live elements, `None` if there are none.
    pub fn get_bounds(&self) -> Option<Rect> {
        union_bounds(self.elements.values().filter(|el| !el.is_deleted))
    }

    /// Bounding box of the selected live elements.
    pub fn get_selected_bounds(&self) -> Option<Rect> {
        union_bounds(
            self.selected
                .iter()
                .filter_map(|id| self.get_element(*id)),
        )
    }

    /// Serialize the scene to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize a scene from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

fn union_bounds<'a>(elements: impl Iterator<Item = &'a Element>) -> Option<Rect> {
    elements.fold(None, |acc, el| {
        let bounds = el.bounds();
        Some(match acc {
            Some(r) => r.union(bounds),
            None => bounds,
        })
    })
}
