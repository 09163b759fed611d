//! InkSync Core Library
//!
//! Scene model, reconciliation and synchronization engine for the InkSync
//! collaborative whiteboard. Rendering and the relay server live elsewhere;
//! this crate owns the state every client keeps and the rules for merging
//! concurrent edits into it.

pub mod action;
pub mod cache;
pub mod consume;
pub mod delta;
pub mod element;
pub mod history;
pub mod interaction;
pub mod protocol;
pub mod reconcile;
pub mod scene;
pub mod session;
pub mod storage;
pub mod sync;
pub mod transport;

pub use action::{Action, ActionKind, ElementUpdate, reduce, reduce_with_deltas};
pub use cache::ShapeCache;
pub use consume::{ConsumeEvent, ConsumptionEngine, DirtyRegion, SubscriptionId, ValidationError, validate_element};
pub use delta::{Delta, DeltaManager, DeltaOperation, apply_delta, apply_deltas, revert_delta, revert_deltas};
pub use element::{Element, ElementId, ElementKind, ElementPatch, ElementStyle, SerializableColor};
pub use history::{HistoryStep, SceneHistory};
pub use interaction::{PointerDownState, PointerTracker};
pub use protocol::{CursorInfo, Envelope, Message, ProtocolError, UserInfo};
pub use reconcile::{ReconciliationManager, ReconciliationResult, local_dominates, reconcile};
pub use scene::Scene;
pub use session::CollaborationSession;
pub use storage::{AutoSaveManager, FileStorage, MemoryStorage, RoomSnapshot, Storage, StorageError};
pub use sync::{Backoff, BroadcastTracker, ConnectionState, CursorThrottle, SeenMessages, SyncConfig, UpdateClock, now_ms};
#[cfg(not(target_arch = "wasm32"))]
pub use transport::NativeWebSocket;
pub use transport::{Transport, TransportError, TransportEvent};
