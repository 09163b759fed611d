//! Wire protocol shared by clients and the relay server.
//!
//! Every message is one JSON object: `type`, `id` (used for de-duplication),
//! `timestamp` (epoch millis) and the type-specific payload fields, all
//! camelCase. Element payloads stay as raw JSON until they pass
//! [`validate_element`](crate::consume::validate_element).

use crate::element::{Element, ElementId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A collaborator in the room roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub user_id: String,
    pub user_name: String,
    pub color: String,
}

/// Last known pointer position of a collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorInfo {
    pub user_id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Message {
    /// Full room state, sent to a client when it joins.
    SyncRoomState {
        elements: Vec<Value>,
        #[serde(default)]
        users: Vec<UserInfo>,
        #[serde(default)]
        cursors: Vec<CursorInfo>,
        your_user_id: String,
    },
    UserJoin {
        user_id: String,
        user_name: String,
        color: String,
    },
    UserLeave {
        user_id: String,
    },
    AddElement {
        element: Value,
    },
    UpdateElement {
        element: Value,
    },
    DeleteElement {
        element_id: ElementId,
    },
    CursorMove(CursorInfo),
    /// Client asks to enter a room.
    JoinRoom {
        room_id: String,
        user_name: String,
        color: String,
    },
    LeaveRoom,
    /// Server-side rejection or failure.
    Error {
        message: String,
    },
}

impl Message {
    pub fn add_element(element: &Element) -> Result<Self, ProtocolError> {
        Ok(Message::AddElement {
            element: serde_json::to_value(element).map_err(ProtocolError::Encode)?,
        })
    }

    pub fn update_element(element: &Element) -> Result<Self, ProtocolError> {
        Ok(Message::UpdateElement {
            element: serde_json::to_value(element).map_err(ProtocolError::Encode)?,
        })
    }

    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::SyncRoomState { .. } => "sync_room_state",
            Message::UserJoin { .. } => "user_join",
            Message::UserLeave { .. } => "user_leave",
            Message::AddElement { .. } => "add_element",
            Message::UpdateElement { .. } => "update_element",
            Message::DeleteElement { .. } => "delete_element",
            Message::CursorMove(_) => "cursor_move",
            Message::JoinRoom { .. } => "join_room",
            Message::LeaveRoom => "leave_room",
            Message::Error { .. } => "error",
        }
    }
}

/// A message plus its de-duplication id and send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub timestamp: u64,
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    /// Stamp a message with a fresh id and the given send time.
    pub fn new(message: Message, timestamp: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp,
            message,
        }
    }

    /// Stamp a message with a fresh id and the wall-clock time.
    pub fn now(message: Message) -> Self {
        Self::new(message, crate::sync::now_ms())
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}
