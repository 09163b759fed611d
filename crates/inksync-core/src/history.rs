//! Linear undo/redo history of scene snapshots.

use crate::delta::Delta;
use crate::scene::Scene;

/// Maximum number of undo steps kept by default.
pub const DEFAULT_UNDO_DEPTH: usize = 50;

#[derive(Debug, Clone)]
struct HistoryEntry {
    scene: Scene,
    /// Deltas that led from the previous entry to this one.
    deltas: Vec<Delta>,
}

/// One step crossed by [`SceneHistory::undo_step`] or [`SceneHistory::redo_step`].
#[derive(Debug, Clone)]
pub struct HistoryStep {
    /// Snapshot at the new position.
    pub scene: Scene,
    /// Deltas of the crossed entry, in the order they were produced.
    pub deltas: Vec<Delta>,
}

/// Stack of cloned scene snapshots with a cursor.
///
/// Entry 0 is the base state and can never be undone past. Pushing after an
/// undo discards the redo branch.
#[derive(Debug, Clone)]
pub struct SceneHistory {
    entries: Vec<HistoryEntry>,
    index: usize,
    depth: usize,
}

impl Default for SceneHistory {
    fn default() -> Self {
        Self::new(Scene::new())
    }
}

impl SceneHistory {
    pub fn new(initial: Scene) -> Self {
        Self::with_depth(initial, DEFAULT_UNDO_DEPTH)
    }

    pub fn with_depth(initial: Scene, depth: usize) -> Self {
        Self {
            entries: vec![HistoryEntry {
                scene: initial,
                deltas: Vec::new(),
            }],
            index: 0,
            depth: depth.max(1),
        }
    }

    /// Record a new state reached by applying `deltas`.
    pub fn push_state(&mut self, scene: Scene, deltas: Vec<Delta>) {
        self.entries.truncate(self.index + 1);
        self.entries.push(HistoryEntry { scene, deltas });
        if self.entries.len() > self.depth + 1 {
            self.entries.remove(0);
        }
        self.index = self.entries.len() - 1;
    }

    /// Step back; `None` at the oldest entry.
    pub fn undo(&mut self) -> Option<Scene> {
        self.undo_step().map(|step| step.scene)
    }

    /// Step forward; `None` at the newest entry.
    pub fn redo(&mut self) -> Option<Scene> {
        self.redo_step().map(|step| step.scene)
    }

    /// Step back, also returning the deltas of the entry that was undone.
    pub fn undo_step(&mut self) -> Option<HistoryStep> {
        if !self.can_undo() {
            return None;
        }
        let deltas = self.entries[self.index].deltas.clone();
        self.index -= 1;
        Some(HistoryStep {
            scene: self.entries[self.index].scene.clone(),
            deltas,
        })
    }

    /// Step forward, also returning the deltas of the entry that was redone.
    pub fn redo_step(&mut self) -> Option<HistoryStep> {
        if !self.can_redo() {
            return None;
        }
        self.index += 1;
        let entry = &self.entries[self.index];
        Some(HistoryStep {
            scene: entry.scene.clone(),
            deltas: entry.deltas.clone(),
        })
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    /// Snapshot at the cursor.
    pub fn current(&self) -> &Scene {
        &self.entries[self.index].scene
    }

    /// Number of undo steps available.
    pub fn undo_len(&self) -> usize {
        self.index
    }

    /// Drop all entries and restart from `scene`.
    pub fn clear(&mut self, scene: Scene) {
        self.entries = vec![HistoryEntry {
            scene,
            deltas: Vec::new(),
        }];
        self.index = 0;
    }
}
