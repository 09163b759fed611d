//! Render-side cache keyed by element id and version.
//!
//! A cached value is valid only for the exact version it was built from, so a
//! remote update or a local mutation invalidates it implicitly.

use crate::element::{Element, ElementId};
use crate::scene::Scene;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Per-element derived data (stroke paths, text layouts, decoded images).
#[derive(Debug, Clone)]
pub struct ShapeCache<T> {
    entries: HashMap<ElementId, (u64, T)>,
}

impl<T> Default for ShapeCache<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> ShapeCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for this element version, built on a miss.
    pub fn get_or_insert_with(&mut self, element: &Element, build: impl FnOnce(&Element) -> T) -> &T {
        let slot = match self.entries.entry(element.id) {
            Entry::Occupied(entry) => {
                let slot = entry.into_mut();
                if slot.0 != element.version {
                    *slot = (element.version, build(element));
                }
                slot
            }
            Entry::Vacant(entry) => entry.insert((element.version, build(element))),
        };
        &slot.1
    }

    pub fn get(&self, element: &Element) -> Option<&T> {
        self.entries
            .get(&element.id)
            .filter(|(version, _)| *version == element.version)
            .map(|(_, value)| value)
    }

    pub fn invalidate(&mut self, id: ElementId) {
        self.entries.remove(&id);
    }

    /// Drop entries for deleted, missing or re-versioned elements.
    pub fn retain_live(&mut self, scene: &Scene) {
        self.entries.retain(|id, (version, _)| {
            scene
                .get_element(*id)
                .is_some_and(|el| el.version == *version)
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
