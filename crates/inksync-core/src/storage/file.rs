//! File-based storage for native platforms.

use super::{BoxFuture, RoomSnapshot, Storage, StorageError, StorageResult};
use crate::element::Element;
use std::fs;
use std::path::{Path, PathBuf};

/// Stores each room as a JSON file in a base directory.
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Creates the directory if it doesn't exist.
    pub fn new(base_path: PathBuf) -> StorageResult<Self> {
        if !base_path.exists() {
            fs::create_dir_all(&base_path)
                .map_err(|e| StorageError::Io(format!("Failed to create storage directory: {e}")))?;
        }
        Ok(Self { base_path })
    }

    /// Storage under the platform data directory, e.g.
    /// `~/.local/share/inksync/rooms/` on Linux.
    pub fn default_location() -> StorageResult<Self> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| StorageError::Io("Could not determine home directory".to_string()))?;
        Self::new(base.join("inksync").join("rooms"))
    }

    fn room_path(&self, room_id: &str) -> PathBuf {
        // Room ids come from users; keep them filename-safe.
        let safe_id: String = room_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_path.join(format!("{safe_id}.json"))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

impl Storage for FileStorage {
    fn save(&self, room_id: &str, elements: &[Element], now: u64) -> BoxFuture<'_, StorageResult<()>> {
        let path = self.room_path(room_id);
        let snapshot = RoomSnapshot {
            room_id: room_id.to_string(),
            saved_at: now,
            elements: elements.to_vec(),
        };
        Box::pin(async move {
            let json = serde_json::to_string_pretty(&snapshot)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            // Readers never observe a partially written room.
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, json)
                .map_err(|e| StorageError::Io(format!("Failed to write {}: {e}", tmp.display())))?;
            fs::rename(&tmp, &path)
                .map_err(|e| StorageError::Io(format!("Failed to replace {}: {e}", path.display())))
        })
    }

    fn load(&self, room_id: &str) -> BoxFuture<'_, StorageResult<RoomSnapshot>> {
        let path = self.room_path(room_id);
        let room_id = room_id.to_string();
        Box::pin(async move {
            if !path.exists() {
                return Err(StorageError::NotFound(room_id));
            }
            let json = fs::read_to_string(&path)
                .map_err(|e| StorageError::Io(format!("Failed to read {}: {e}", path.display())))?;
            serde_json::from_str(&json)
                .map_err(|e| StorageError::Serialization(format!("Failed to parse {}: {e}", path.display())))
        })
    }

    fn delete(&self, room_id: &str) -> BoxFuture<'_, StorageResult<()>> {
        let path = self.room_path(room_id);
        Box::pin(async move {
            if path.exists() {
                fs::remove_file(&path)
                    .map_err(|e| StorageError::Io(format!("Failed to delete {}: {e}", path.display())))?;
            }
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        let base = self.base_path.clone();
        Box::pin(async move {
            if !base.exists() {
                return Ok(vec![]);
            }
            let entries =
                fs::read_dir(&base).map_err(|e| StorageError::Io(format!("Failed to read directory: {e}")))?;
            Ok(entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
                .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
                .collect())
        })
    }

    fn exists(&self, room_id: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let path = self.room_path(room_id);
        Box::pin(async move { Ok(path.exists()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block_on;
    use tempfile::tempdir;

    #[test]
    fn test_file_storage_save_load() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_path_buf()).unwrap();
        let el = Element::text(1.0, 2.0, "persisted");

        block_on(storage.save("team-board", &[el.clone()], 7)).unwrap();
        let loaded = block_on(storage.load("team-board")).unwrap();

        assert_eq!(loaded.room_id, "team-board");
        assert_eq!(loaded.elements, vec![el]);
    }

    #[test]
    fn test_file_storage_not_found() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_path_buf()).unwrap();
        let result = block_on(storage.load("nonexistent"));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_file_storage_list_and_delete() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_path_buf()).unwrap();

        block_on(storage.save("room1", &[], 1)).unwrap();
        block_on(storage.save("room2", &[], 1)).unwrap();
        let mut list = block_on(storage.list()).unwrap();
        list.sort();
        assert_eq!(list, vec!["room1".to_string(), "room2".to_string()]);

        block_on(storage.delete("room1")).unwrap();
        assert!(!block_on(storage.exists("room1")).unwrap());
    }

    #[test]
    fn test_file_storage_sanitizes_id() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_path_buf()).unwrap();

        block_on(storage.save("../escape/room:1", &[], 1)).unwrap();
        assert!(block_on(storage.load("../escape/room:1")).is_ok());
        assert!(storage.room_path("../escape").starts_with(dir.path()));
    }
}
