//! Durable storage of a room's element list.
//!
//! The sink only sees `(room_id, elements)`; tombstones are stored too so a
//! reloaded room keeps rejecting stale copies of deleted elements.

mod autosave;
mod file;
mod memory;

pub use autosave::{AutoSaveManager, DEFAULT_PERSIST_DEBOUNCE_MS, create_autosave_manager, create_default_storage};
pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::element::Element;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Room not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed future returned by storage backends.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persisted form of one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: String,
    /// Epoch millis of the save.
    pub saved_at: u64,
    pub elements: Vec<Element>,
}

/// Backend for room persistence (memory, filesystem, remote).
pub trait Storage: Send + Sync {
    fn save(&self, room_id: &str, elements: &[Element], now: u64) -> BoxFuture<'_, StorageResult<()>>;

    fn load(&self, room_id: &str) -> BoxFuture<'_, StorageResult<RoomSnapshot>>;

    fn delete(&self, room_id: &str) -> BoxFuture<'_, StorageResult<()>>;

    /// All stored room ids.
    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>>;

    fn exists(&self, room_id: &str) -> BoxFuture<'_, StorageResult<bool>>;
}

/// Poll a storage future to completion on the current thread.
#[cfg(test)]
pub(crate) fn block_on<F: Future>(f: F) -> F::Output {
    use std::task::{Context, Poll, Waker};

    let mut cx = Context::from_waker(Waker::noop());
    let mut f = std::pin::pin!(f);
    loop {
        if let Poll::Ready(result) = f.as_mut().poll(&mut cx) {
            return result;
        }
    }
}
