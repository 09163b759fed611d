//! In-memory storage implementation.

use super::{BoxFuture, RoomSnapshot, Storage, StorageError, StorageResult};
use crate::element::Element;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory storage for tests and ephemeral rooms.
#[derive(Default)]
pub struct MemoryStorage {
    rooms: RwLock<HashMap<String, RoomSnapshot>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other(format!("Lock error: {e}"))
}

impl Storage for MemoryStorage {
    fn save(&self, room_id: &str, elements: &[Element], now: u64) -> BoxFuture<'_, StorageResult<()>> {
        let snapshot = RoomSnapshot {
            room_id: room_id.to_string(),
            saved_at: now,
            elements: elements.to_vec(),
        };
        Box::pin(async move {
            let mut rooms = self.rooms.write().map_err(lock_error)?;
            rooms.insert(snapshot.room_id.clone(), snapshot);
            Ok(())
        })
    }

    fn load(&self, room_id: &str) -> BoxFuture<'_, StorageResult<RoomSnapshot>> {
        let room_id = room_id.to_string();
        Box::pin(async move {
            let rooms = self.rooms.read().map_err(lock_error)?;
            rooms.get(&room_id).cloned().ok_or(StorageError::NotFound(room_id))
        })
    }

    fn delete(&self, room_id: &str) -> BoxFuture<'_, StorageResult<()>> {
        let room_id = room_id.to_string();
        Box::pin(async move {
            self.rooms.write().map_err(lock_error)?.remove(&room_id);
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        Box::pin(async move { Ok(self.rooms.read().map_err(lock_error)?.keys().cloned().collect()) })
    }

    fn exists(&self, room_id: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let room_id = room_id.to_string();
        Box::pin(async move { Ok(self.rooms.read().map_err(lock_error)?.contains_key(&room_id)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block_on;

    #[test]
    fn test_save_and_load_keeps_tombstones() {
        let storage = MemoryStorage::new();
        let live = Element::rectangle(0.0, 0.0, 1.0, 1.0);
        let mut gone = Element::ellipse(5.0, 5.0, 1.0, 1.0);
        gone.is_deleted = true;

        block_on(storage.save("room", &[live.clone(), gone.clone()], 42)).unwrap();
        let loaded = block_on(storage.load("room")).unwrap();

        assert_eq!(loaded.saved_at, 42);
        assert_eq!(loaded.elements, vec![live, gone]);
    }

    #[test]
    fn test_not_found() {
        let storage = MemoryStorage::new();
        let result = block_on(storage.load("nonexistent"));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_exists_delete_and_list() {
        let storage = MemoryStorage::new();
        assert!(!block_on(storage.exists("a")).unwrap());

        block_on(storage.save("a", &[], 1)).unwrap();
        block_on(storage.save("b", &[], 1)).unwrap();
        assert!(block_on(storage.exists("a")).unwrap());
        assert_eq!(block_on(storage.list()).unwrap().len(), 2);

        block_on(storage.delete("a")).unwrap();
        assert!(!block_on(storage.exists("a")).unwrap());
        assert_eq!(block_on(storage.list()).unwrap(), vec!["b".to_string()]);
    }
}
