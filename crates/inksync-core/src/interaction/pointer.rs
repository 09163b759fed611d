//! Multi-pointer state for gesture detection.

use kurbo::{Point, Vec2};
use std::collections::HashMap;

/// Distance a pointer must travel before a press becomes a drag.
pub const DRAG_THRESHOLD: f64 = 3.0;

/// Double-click detection constants.
pub const DOUBLE_CLICK_TIME_MS: u64 = 500;
pub const DOUBLE_CLICK_DISTANCE: f64 = 5.0;

/// One pressed pointer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerInfo {
    pub id: u32,
    pub down_point: Point,
    pub position: Point,
    pub down_at: u64,
    /// Set once the pointer has moved past [`DRAG_THRESHOLD`].
    pub dragging: bool,
}

impl PointerInfo {
    /// Total delta since pointer down.
    pub fn delta(&self) -> Vec2 {
        self.position - self.down_point
    }
}

/// Tracks every pressed pointer (mouse, pen, fingers).
#[derive(Debug, Clone, Default)]
pub struct PointerTracker {
    pointers: HashMap<u32, PointerInfo>,
    /// The first pointer of the current gesture.
    primary: Option<u32>,
    last_click: Option<(u64, Point)>,
}

impl PointerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a press. Returns true if it completes a double click.
    pub fn pointer_down(&mut self, id: u32, position: Point, now: u64) -> bool {
        self.pointers.insert(
            id,
            PointerInfo {
                id,
                down_point: position,
                position,
                down_at: now,
                dragging: false,
            },
        );
        if self.primary.is_none() {
            self.primary = Some(id);
        }

        let double = self.last_click.is_some_and(|(at, last)| {
            now.saturating_sub(at) < DOUBLE_CLICK_TIME_MS && last.distance(position) < DOUBLE_CLICK_DISTANCE
        });
        // Reset after a double so a third click starts over.
        self.last_click = if double { None } else { Some((now, position)) };
        double
    }

    /// Update a pointer. Returns the total delta once it is dragging.
    pub fn pointer_move(&mut self, id: u32, position: Point) -> Option<Vec2> {
        let info = self.pointers.get_mut(&id)?;
        info.position = position;
        if !info.dragging && info.delta().hypot() >= DRAG_THRESHOLD {
            info.dragging = true;
        }
        info.dragging.then(|| info.delta())
    }

    /// Release a pointer, returning its final state.
    pub fn pointer_up(&mut self, id: u32, position: Point) -> Option<PointerInfo> {
        let mut info = self.pointers.remove(&id)?;
        info.position = position;
        if self.primary == Some(id) {
            self.primary = None;
        }
        Some(info)
    }

    pub fn get(&self, id: u32) -> Option<&PointerInfo> {
        self.pointers.get(&id)
    }

    pub fn primary(&self) -> Option<&PointerInfo> {
        self.primary.and_then(|id| self.pointers.get(&id))
    }

    pub fn is_dragging(&self, id: u32) -> bool {
        self.pointers.get(&id).is_some_and(|p| p.dragging)
    }

    /// Two or more pointers down at once (pinch, two-finger pan).
    pub fn is_multi_touch(&self) -> bool {
        self.pointers.len() > 1
    }

    pub fn active_count(&self) -> usize {
        self.pointers.len()
    }

    /// Forget every pointer, e.g. on focus loss.
    pub fn cancel_all(&mut self) {
        self.pointers.clear();
        self.primary = None;
    }
}
