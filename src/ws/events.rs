//! Wire events exchanged over the document WebSocket.
//!
//! Every frame is a JSON text message `{"event": <name>, "data": {...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::db::{DocId, UserId};
use crate::services::cursors::CursorData;
use crate::services::operations::Operation;
use crate::services::presence::PresenceUser;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("frame is not a JSON event: {0}")]
    Frame(serde_json::Error),

    #[error("unknown event '{0}'")]
    Unknown(String),

    #[error("invalid payload for '{event}': {source}")]
    Payload {
        event: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    pub username: String,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocRef {
    pub doc_id: DocId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub doc_id: DocId,
    pub username: String,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPayload {
    pub doc_id: DocId,
    #[serde(default)]
    pub is_typing: bool,
    #[serde(flatten)]
    pub position: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditPayload {
    pub doc_id: DocId,
    pub content: String,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub doc_id: DocId,
    pub message: String,
    pub user: ChatUser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub doc_id: DocId,
    pub username: String,
}

/// Events sent by clients
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ActiveLogin(LoginPayload),
    ActiveHeartbeat,
    DocHeartbeat(DocRef),
    JoinDoc(JoinPayload),
    LeaveDoc(DocRef),
    Cursor(CursorPayload),
    Edit(EditPayload),
    ChatMessage(ChatPayload),
    EditorTyping(TypingPayload),
    ChatTyping(TypingPayload),
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self, EventError> {
        let frame: Frame = serde_json::from_str(text).map_err(EventError::Frame)?;
        let data = frame.data;
        let payload_err = |source| EventError::Payload {
            event: frame.event.clone(),
            source,
        };

        let event = match frame.event.as_str() {
            "active:login" => ClientEvent::ActiveLogin(serde_json::from_value(data).map_err(payload_err)?),
            "active:heartbeat" => ClientEvent::ActiveHeartbeat,
            "doc:heartbeat" => ClientEvent::DocHeartbeat(serde_json::from_value(data).map_err(payload_err)?),
            "joinDoc" => ClientEvent::JoinDoc(serde_json::from_value(data).map_err(payload_err)?),
            "leaveDoc" => ClientEvent::LeaveDoc(serde_json::from_value(data).map_err(payload_err)?),
            "cursor" => ClientEvent::Cursor(serde_json::from_value(data).map_err(payload_err)?),
            "edit" => ClientEvent::Edit(serde_json::from_value(data).map_err(payload_err)?),
            "chat:message" => ClientEvent::ChatMessage(serde_json::from_value(data).map_err(payload_err)?),
            "editor:typing" => ClientEvent::EditorTyping(serde_json::from_value(data).map_err(payload_err)?),
            "chat:typing" => ClientEvent::ChatTyping(serde_json::from_value(data).map_err(payload_err)?),
            other => return Err(EventError::Unknown(other.to_string())),
        };
        Ok(event)
    }

    /// Wire name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::ActiveLogin(_) => "active:login",
            ClientEvent::ActiveHeartbeat => "active:heartbeat",
            ClientEvent::DocHeartbeat(_) => "doc:heartbeat",
            ClientEvent::JoinDoc(_) => "joinDoc",
            ClientEvent::LeaveDoc(_) => "leaveDoc",
            ClientEvent::Cursor(_) => "cursor",
            ClientEvent::Edit(_) => "edit",
            ClientEvent::ChatMessage(_) => "chat:message",
            ClientEvent::EditorTyping(_) => "editor:typing",
            ClientEvent::ChatTyping(_) => "chat:typing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceChange {
    Join,
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypingKind {
    Editor,
    Chat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorBroadcast {
    pub user_id: String,
    pub username: String,
    pub is_typing: bool,
    #[serde(flatten)]
    pub position: Map<String, Value>,
}

/// Events sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "connected")]
    Connected { id: String },

    #[serde(rename = "presence:update")]
    PresenceUpdate {
        #[serde(rename = "type")]
        change: PresenceChange,
        users: Vec<PresenceUser>,
    },

    #[serde(rename = "cursors:init")]
    CursorsInit(BTreeMap<String, CursorData>),

    #[serde(rename = "doc:snapshot")]
    DocSnapshot { content: String, version: i64 },

    #[serde(rename = "cursor")]
    Cursor(CursorBroadcast),

    #[serde(rename = "cursor:remove")]
    CursorRemove {
        #[serde(rename = "userId")]
        user_id: String,
    },

    #[serde(rename = "edit")]
    Edit {
        #[serde(rename = "userId")]
        user_id: String,
        content: String,
        version: i64,
        ops: Vec<Operation>,
    },

    #[serde(rename = "chat:message")]
    ChatMessage {
        message: String,
        user: ChatUser,
        #[serde(rename = "createdAt")]
        created_at: DateTime<Utc>,
    },

    #[serde(rename = "typing")]
    Typing { kind: TypingKind, username: String },

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
