//! Outgoing message composition.

use chatdesk_shared::{ChatMessage, DeliveryState, MessageType, SenderType, UploadedFile};
use chrono::{DateTime, Utc};
use serde::Serialize;

const ADMIN_NOTE_PREFIX: &str = "[Admin Note]";

/// A message ready to be posted to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub conversation_id: String,
    pub message: String,
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    pub is_admin_note: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_note: Option<String>,
}

/// Who the optimistic copy is attributed to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Operator {
    pub id: Option<String>,
    pub name: Option<String>,
}

impl OutgoingMessage {
    /// Compose a text message. Blank input yields `None`.
    ///
    /// Input starting with `@` becomes an internal admin note.
    pub fn compose(conversation_id: impl Into<String>, input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        let (message, is_admin_note, admin_note) = match input.strip_prefix('@') {
            Some(note) => {
                let note = note.trim();
                (format!("{ADMIN_NOTE_PREFIX} {note}"), true, Some(note.to_string()))
            }
            None => (input.to_string(), false, None),
        };
        Some(Self {
            conversation_id: conversation_id.into(),
            message,
            message_type: MessageType::Text,
            attachment_url: None,
            is_admin_note,
            admin_note,
        })
    }

    /// Compose a message carrying an uploaded file, with an optional caption.
    pub fn with_attachment(conversation_id: impl Into<String>, caption: &str, file: &UploadedFile) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message: caption.trim().to_string(),
            message_type: MessageType::from_file_type(&file.file_type),
            attachment_url: Some(file.file_url.clone()),
            is_admin_note: false,
            admin_note: None,
        }
    }

    /// Local copy shown immediately while the send is in flight.
    pub fn to_optimistic(&self, temp_id: &str, operator: &Operator, created_at: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            id: temp_id.to_string(),
            conversation_id: self.conversation_id.clone(),
            sender_type: SenderType::Admin,
            sender_id: operator.id.clone(),
            sender_name: operator.name.clone(),
            message: self.message.clone(),
            message_type: self.message_type,
            attachment_url: self.attachment_url.clone(),
            is_read: false,
            created_at,
            is_admin_note: self.is_admin_note,
            admin_note: self.admin_note.clone(),
            temp_id: Some(temp_id.to_string()),
            delivery: DeliveryState::Pending,
        }
    }
}

/// Fresh correlation key for an optimistic send.
pub fn new_temp_id() -> String {
    format!("temp-{}", uuid::Uuid::new_v4())
}
