//! Debounced room persistence.
//!
//! Each scene change marks the manager dirty; a save happens once the scene
//! has been quiet for the debounce interval. [`AutoSaveManager::save`]
//! flushes immediately for visibility loss or unload.

use crate::element::Element;
use crate::storage::{FileStorage, RoomSnapshot, Storage, StorageResult};
use std::sync::Arc;

/// Default quiet period before a save, in milliseconds.
pub const DEFAULT_PERSIST_DEBOUNCE_MS: u64 = 1_000;

/// Manages automatic room persistence.
pub struct AutoSaveManager<S: Storage> {
    storage: Arc<S>,
    room_id: String,
    debounce_ms: u64,
    /// Time of the most recent unsaved change.
    last_change: Option<u64>,
    last_save: Option<u64>,
}

impl<S: Storage> AutoSaveManager<S> {
    pub fn new(storage: Arc<S>, room_id: impl Into<String>) -> Self {
        Self {
            storage,
            room_id: room_id.into(),
            debounce_ms: DEFAULT_PERSIST_DEBOUNCE_MS,
            last_change: None,
            last_save: None,
        }
    }

    pub fn set_debounce(&mut self, debounce_ms: u64) {
        self.debounce_ms = debounce_ms;
    }

    pub fn debounce(&self) -> u64 {
        self.debounce_ms
    }

    /// Record a change; restarts the debounce window.
    pub fn mark_dirty(&mut self, now: u64) {
        self.last_change = Some(now);
    }

    pub fn is_dirty(&self) -> bool {
        self.last_change.is_some()
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn last_save(&self) -> Option<u64> {
        self.last_save
    }

    /// Dirty and quiet for at least the debounce interval.
    pub fn should_save(&self, now: u64) -> bool {
        self.last_change
            .is_some_and(|changed| now.saturating_sub(changed) >= self.debounce_ms)
    }

    /// Save if the debounce window has elapsed. Returns true if it saved.
    pub async fn maybe_save(&mut self, elements: &[Element], now: u64) -> StorageResult<bool> {
        if !self.should_save(now) {
            return Ok(false);
        }
        self.save(elements, now).await?;
        Ok(true)
    }

    /// Save immediately, regardless of the debounce window.
    pub async fn save(&mut self, elements: &[Element], now: u64) -> StorageResult<()> {
        self.storage.save(&self.room_id, elements, now).await?;
        log::debug!("saved room {} ({} elements)", self.room_id, elements.len());
        self.last_save = Some(now);
        self.last_change = None;
        Ok(())
    }

    /// Load the stored room.
    pub async fn load(&mut self) -> StorageResult<RoomSnapshot> {
        let snapshot = self.storage.load(&self.room_id).await?;
        self.last_change = None;
        self.last_save = Some(snapshot.saved_at);
        Ok(snapshot)
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }
}

/// File storage in the default location.
pub fn create_default_storage() -> StorageResult<Arc<FileStorage>> {
    Ok(Arc::new(FileStorage::default_location()?))
}

/// Auto-save manager for `room_id` backed by the default storage.
pub fn create_autosave_manager(room_id: &str) -> StorageResult<AutoSaveManager<FileStorage>> {
    Ok(AutoSaveManager::new(create_default_storage()?, room_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, block_on};

    #[test]
    fn test_clean_manager_does_not_save() {
        let manager = AutoSaveManager::new(Arc::new(MemoryStorage::new()), "room");
        assert!(!manager.is_dirty());
        assert!(!manager.should_save(10_000));
    }

    #[test]
    fn test_debounce_restarts_on_each_change() {
        let mut manager = AutoSaveManager::new(Arc::new(MemoryStorage::new()), "room");
        manager.mark_dirty(1_000);
        assert!(!manager.should_save(1_500));
        manager.mark_dirty(1_800);
        assert!(!manager.should_save(2_200));
        assert!(manager.should_save(2_800));
    }

    #[test]
    fn test_maybe_save_respects_window() {
        let storage = Arc::new(MemoryStorage::new());
        let mut manager = AutoSaveManager::new(Arc::clone(&storage), "room");
        let el = Element::rectangle(0.0, 0.0, 1.0, 1.0);

        manager.mark_dirty(0);
        assert!(!block_on(manager.maybe_save(&[el.clone()], 500)).unwrap());
        assert!(block_on(manager.maybe_save(&[el.clone()], 1_000)).unwrap());
        assert!(!manager.is_dirty());
        assert_eq!(manager.last_save(), Some(1_000));

        let stored = block_on(storage.load("room")).unwrap();
        assert_eq!(stored.elements, vec![el]);
    }

    #[test]
    fn test_immediate_save_and_reload() {
        let storage = Arc::new(MemoryStorage::new());
        let mut manager = AutoSaveManager::new(Arc::clone(&storage), "room");
        manager.mark_dirty(100);
        block_on(manager.save(&[Element::ellipse(0.0, 0.0, 2.0, 2.0)], 150)).unwrap();

        let mut other = AutoSaveManager::new(Arc::clone(manager.storage()), "room");
        let snapshot = block_on(other.load()).unwrap();
        assert_eq!(snapshot.elements.len(), 1);
        assert_eq!(other.last_save(), Some(150));
    }
}
