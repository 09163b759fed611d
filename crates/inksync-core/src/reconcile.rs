//! Version-based conflict resolution between local and incoming elements.
//!
//! The winner of two copies of an element is decided purely by their
//! `(version, version_nonce)` pairs, so every node picks the same winner
//! without coordination.

use crate::element::{Element, ElementId};
use std::collections::HashMap;

/// Whether the local copy wins against an incoming copy of the same element.
///
/// Higher version wins; on equal versions the smaller nonce wins. An incoming
/// copy identical in both fields loses, so replays are no-ops.
pub fn local_dominates(local: &Element, incoming: &Element) -> bool {
    dominates(
        (local.version, local.version_nonce),
        (incoming.version, incoming.version_nonce),
    )
}

fn dominates(local: (u64, u32), incoming: (u64, u32)) -> bool {
    local.0 > incoming.0 || (local.0 == incoming.0 && local.1 <= incoming.1)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationResult {
    /// Incoming elements that replace (or introduce) the local copy.
    pub accepted: Vec<Element>,
    /// Incoming elements dominated by the local copy.
    pub rejected: Vec<Element>,
    /// True iff anything was accepted.
    pub needs_render: bool,
}

/// Decide, per incoming element, whether it replaces the local copy.
///
/// Incoming elements are processed in order; a later copy of the same id
/// competes against the earlier winner, not just the local one.
pub fn reconcile<'a>(
    local: &HashMap<ElementId, Element>,
    incoming: impl IntoIterator<Item = &'a Element>,
) -> ReconciliationResult {
    let mut result = ReconciliationResult::default();
    // id -> index into `accepted` of the current winner from this batch
    let mut winners: HashMap<ElementId, usize> = HashMap::new();

    for el in incoming {
        let winner = winners.get(&el.id).copied();
        let current = match winner {
            Some(idx) => Some(&result.accepted[idx]),
            None => local.get(&el.id),
        };
        if current.is_some_and(|current| local_dominates(current, el)) {
            log::debug!("rejecting stale element {} v{}", el.id, el.version);
            result.rejected.push(el.clone());
            continue;
        }
        match winner {
            Some(idx) => {
                let superseded = std::mem::replace(&mut result.accepted[idx], el.clone());
                result.rejected.push(superseded);
            }
            None => {
                winners.insert(el.id, result.accepted.len());
                result.accepted.push(el.clone());
            }
        }
    }

    result.needs_render = !result.accepted.is_empty();
    result
}

/// Remembers the last accepted `(version, nonce)` per element.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationManager {
    seen: HashMap<ElementId, (u64, u32)>,
}

impl ReconciliationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cheap pre-filter before a full reconcile pass.
    pub fn should_accept(&self, id: ElementId, version: u64, nonce: u32) -> bool {
        match self.seen.get(&id) {
            Some(&last) => !dominates(last, (version, nonce)),
            None => true,
        }
    }

    /// Remember an accepted element if it is newer than what is on record.
    pub fn record(&mut self, element: &Element) {
        if self.should_accept(element.id, element.version, element.version_nonce) {
            self.seen.insert(element.id, (element.version, element.version_nonce));
        }
    }

    /// Reconcile and record every accepted element.
    pub fn reconcile<'a>(
        &mut self,
        local: &HashMap<ElementId, Element>,
        incoming: impl IntoIterator<Item = &'a Element>,
    ) -> ReconciliationResult {
        let incoming: Vec<&Element> = incoming
            .into_iter()
            .filter(|el| {
                let keep = self.should_accept(el.id, el.version, el.version_nonce);
                if !keep {
                    log::debug!("pre-filtered element {} v{}", el.id, el.version);
                }
                keep
            })
            .collect();
        let result = reconcile(local, incoming);
        for el in &result.accepted {
            self.record(el);
        }
        result
    }

    /// Last accepted `(version, nonce)` for an element.
    pub fn last_seen(&self, id: ElementId) -> Option<(u64, u32)> {
        self.seen.get(&id).copied()
    }

    pub fn forget(&mut self, id: ElementId) {
        self.seen.remove(&id);
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}
