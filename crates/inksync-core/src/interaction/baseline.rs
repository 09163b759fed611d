//! Drift-free drag geometry.
//!
//! A gesture freezes the affected elements once, at pointer down. Every
//! preview frame and the final commit are computed as `baseline + total
//! pointer delta`, never by accumulating per-frame steps.

use crate::action::ElementUpdate;
use crate::element::{Element, ElementId, ElementPatch};
use crate::scene::Scene;
use kurbo::{Point, Vec2};
use std::collections::HashMap;

/// Frozen snapshot taken at gesture start.
#[derive(Debug, Clone, PartialEq)]
pub struct PointerDownState {
    pub pointer_id: u32,
    pub down_point: Point,
    original_elements: HashMap<ElementId, Element>,
    /// Affected ids, in the order they were requested.
    element_ids: Vec<ElementId>,
    pub timestamp: u64,
}

impl PointerDownState {
    pub fn original_elements(&self) -> &HashMap<ElementId, Element> {
        &self.original_elements
    }

    pub fn element_ids(&self) -> &[ElementId] {
        &self.element_ids
    }

    /// Total pointer delta from the down point.
    pub fn delta_to(&self, point: Point) -> Vec2 {
        point - self.down_point
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.original_elements.contains_key(&id)
    }
}

/// Snapshot the live elements among `ids`. `None` if none of them is live.
pub fn capture_drag_baseline(
    scene: &Scene,
    ids: &[ElementId],
    pointer_id: u32,
    down_point: Point,
    now: u64,
) -> Option<PointerDownState> {
    let mut original_elements = HashMap::new();
    let mut element_ids = Vec::new();
    for id in ids {
        if let Some(el) = scene.get_element(*id) {
            if original_elements.insert(*id, el.clone()).is_none() {
                element_ids.push(*id);
            }
        }
    }
    if element_ids.is_empty() {
        return None;
    }
    Some(PointerDownState {
        pointer_id,
        down_point,
        original_elements,
        element_ids,
        timestamp: now,
    })
}

/// Final geometry: every baseline element translated by the total delta.
pub fn apply_delta_to_baseline(baseline: &PointerDownState, delta: Vec2) -> Vec<Element> {
    baseline
        .element_ids
        .iter()
        .filter_map(|id| baseline.original_elements.get(id))
        .map(|original| {
            let mut el = original.clone();
            el.translate(delta);
            el
        })
        .collect()
}

/// Preview of `elements` with the gesture applied.
///
/// Non-geometry fields come from the current elements, so remote edits that
/// land mid-gesture stay visible; position comes from the baseline.
pub fn merge_drag_preview(elements: &[&Element], baseline: &PointerDownState, delta: Vec2) -> Vec<Element> {
    elements
        .iter()
        .map(|current| match baseline.original_elements.get(&current.id) {
            Some(original) => {
                let mut el = (*current).clone();
                el.x = original.x + delta.x;
                el.y = original.y + delta.y;
                el
            }
            None => (*current).clone(),
        })
        .collect()
}

/// Position patches that commit the gesture as one batched update.
pub fn baseline_patches(baseline: &PointerDownState, delta: Vec2) -> Vec<ElementUpdate> {
    apply_delta_to_baseline(baseline, delta)
        .into_iter()
        .map(|el| ElementUpdate {
            id: el.id,
            patch: ElementPatch::position(el.x, el.y),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::SerializableColor;

    fn scene_of(elements: &[&Element]) -> Scene {
        Scene::from_elements(elements.iter().map(|el| (*el).clone()))
    }

    #[test]
    fn test_capture_skips_missing_and_deleted() {
        let a = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let b = Element::rectangle(20.0, 0.0, 10.0, 10.0);
        let mut scene = scene_of(&[&a, &b]);
        scene.delete_element(b.id);

        let baseline =
            capture_drag_baseline(&scene, &[a.id, b.id, ElementId::new_v4()], 1, Point::ZERO, 5).unwrap();
        assert_eq!(baseline.element_ids(), &[a.id]);
        assert!(capture_drag_baseline(&scene, &[b.id], 1, Point::ZERO, 5).is_none());
    }

    #[test]
    fn test_apply_translates_from_frozen_state() {
        let a = Element::rectangle(10.0, 20.0, 10.0, 10.0);
        let mut scene = scene_of(&[&a]);
        let baseline = capture_drag_baseline(&scene, &[a.id], 1, Point::new(100.0, 100.0), 0).unwrap();

        // Later scene changes do not leak into the baseline.
        scene.update_element(a.id, &ElementPatch::position(500.0, 500.0));

        let delta = baseline.delta_to(Point::new(130.0, 90.0));
        let moved = apply_delta_to_baseline(&baseline, delta);
        assert!((moved[0].x - 40.0).abs() < f64::EPSILON);
        assert!((moved[0].y - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_delta_is_additive() {
        let a = Element::rectangle(1.5, -2.0, 10.0, 10.0);
        let b = Element::line(&[Point::new(0.0, 0.0), Point::new(8.0, 8.0)]);
        let scene = scene_of(&[&a, &b]);
        let d1 = Vec2::new(12.25, -3.5);
        let d2 = Vec2::new(-4.0, 7.75);

        let baseline = capture_drag_baseline(&scene, &[a.id, b.id], 1, Point::ZERO, 0).unwrap();
        let at_once = apply_delta_to_baseline(&baseline, d1 + d2);

        let step_one = Scene::from_elements(apply_delta_to_baseline(&baseline, d1));
        let second = capture_drag_baseline(&step_one, &[a.id, b.id], 1, Point::ZERO, 0).unwrap();
        let stepwise = apply_delta_to_baseline(&second, d2);

        assert_eq!(at_once, stepwise);
    }

    #[test]
    fn test_preview_keeps_remote_fields() {
        let a = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let other = Element::ellipse(50.0, 50.0, 5.0, 5.0);
        let mut scene = scene_of(&[&a, &other]);
        let baseline = capture_drag_baseline(&scene, &[a.id], 7, Point::ZERO, 0).unwrap();

        // A remote color change lands mid-gesture.
        let blue = SerializableColor::new(0, 0, 255, 255);
        scene.update_element(a.id, &ElementPatch::stroke_color(blue));

        let preview = merge_drag_preview(&scene.get_elements(), &baseline, Vec2::new(5.0, 5.0));
        let dragged = preview.iter().find(|el| el.id == a.id).unwrap();
        assert_eq!(dragged.style.stroke_color, blue);
        assert!((dragged.x - 5.0).abs() < f64::EPSILON);
        let untouched = preview.iter().find(|el| el.id == other.id).unwrap();
        assert_eq!(untouched, &other);

        // The baseline itself is never touched by previews.
        assert!((baseline.original_elements()[&a.id].x - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_patches_cover_every_element() {
        let a = Element::rectangle(0.0, 0.0, 10.0, 10.0);
        let b = Element::rectangle(20.0, 0.0, 10.0, 10.0);
        let scene = scene_of(&[&a, &b]);
        let baseline = capture_drag_baseline(&scene, &[b.id, a.id], 1, Point::ZERO, 0).unwrap();

        let patches = baseline_patches(&baseline, Vec2::new(1.0, 2.0));
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].id, b.id);
        assert_eq!(patches[0].patch, ElementPatch::position(21.0, 2.0));
    }
}
