//! Chat data models shared by the stream protocol and the REST client.
//!
//! The backend is loose about JSON types (ids arrive as numbers or strings,
//! flags as `0/1`, `"1"` or booleans, timestamps with or without a zone), so
//! the wire-facing fields go through the [`lenient`] helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// --- Enums ---

/// Who authored a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    User,
    Admin,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::User => "user",
            SenderType::Admin => "admin",
        }
    }
}

/// Kind of payload a message carries.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Audio,
    Video,
}

impl MessageType {
    /// Map an upload `file_type` (either `image` or a MIME type such as
    /// `image/png`) to a message type. Anything unrecognized is text.
    pub fn from_file_type(kind: &str) -> Self {
        let kind = kind.trim().to_ascii_lowercase();
        match kind.split('/').next().unwrap_or_default() {
            "image" => MessageType::Image,
            "audio" => MessageType::Audio,
            "video" => MessageType::Video,
            _ => MessageType::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Audio => "audio",
            MessageType::Video => "video",
        }
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .map(|kind| MessageType::from_file_type(&kind))
            .unwrap_or_default())
    }
}

/// Delivery lifecycle of a message in the local list.
///
/// Messages loaded from the backend are always `Settled`; only messages the
/// operator composed locally pass through `Pending` and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryState {
    Pending,
    Failed,
    #[default]
    Settled,
}

// --- Conversations ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    #[serde(deserialize_with = "lenient::id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub admin_id: Option<String>,
    #[serde(default)]
    pub admin_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::opt_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::opt_timestamp")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default, with = "lenient::count")]
    pub unread_count_user: u32,
    #[serde(default, with = "lenient::count")]
    pub unread_count_admin: u32,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_sender: Option<String>,
    #[serde(default, with = "lenient::flag")]
    pub resolved: bool,
}

impl Conversation {
    /// Name to show for the end user of this conversation.
    pub fn display_name(&self) -> &str {
        self.user_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or(self.user_id.as_deref())
            .unwrap_or(&self.id)
    }

    /// Shallow-merge a partial update over this record.
    ///
    /// Preview fields survive an update that leaves them out or blank.
    pub fn apply_update(&mut self, update: &ConversationUpdate) {
        fn set<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if let Some(value) = value {
                *slot = Some(value.clone());
            }
        }

        set(&mut self.user_id, &update.user_id);
        set(&mut self.user_name, &update.user_name);
        set(&mut self.status, &update.status);
        set(&mut self.admin_id, &update.admin_id);
        set(&mut self.admin_name, &update.admin_name);
        set(&mut self.created_at, &update.created_at);
        set(&mut self.updated_at, &update.updated_at);
        set(&mut self.last_message_at, &update.last_message_at);

        if let Some(count) = update.unread_count_user {
            self.unread_count_user = count;
        }
        if let Some(count) = update.unread_count_admin {
            self.unread_count_admin = count;
        }
        if let Some(resolved) = update.resolved {
            self.resolved = resolved;
        }

        if let Some(text) = update.last_message.as_ref().filter(|t| !t.is_empty()) {
            self.last_message = Some(text.clone());
        }
        if let Some(sender) = update.last_message_sender.as_ref().filter(|s| !s.is_empty()) {
            self.last_message_sender = Some(sender.clone());
        }
    }

    /// Fold a delivered message into the denormalized preview.
    ///
    /// A message from the end user re-opens a resolved conversation.
    pub fn record_message(&mut self, message: &ChatMessage) {
        self.last_message = Some(message.preview_text());
        self.last_message_sender = Some(message.sender_type.as_str().to_string());
        self.last_message_at = Some(message.created_at);
        self.updated_at = Some(message.created_at);
        if message.sender_type == SenderType::User {
            self.resolved = false;
        }
    }
}

/// Partial conversation record pushed by the stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConversationUpdate {
    #[serde(alias = "conversation_id", deserialize_with = "lenient::id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub admin_id: Option<String>,
    #[serde(default)]
    pub admin_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::opt_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::opt_timestamp")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::opt_count")]
    pub unread_count_user: Option<u32>,
    #[serde(default, deserialize_with = "lenient::opt_count")]
    pub unread_count_admin: Option<u32>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_sender: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_flag")]
    pub resolved: Option<bool>,
}

impl ConversationUpdate {
    /// Build a full record for a conversation the client has never seen.
    pub fn to_conversation(&self) -> Conversation {
        Conversation {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            user_name: self.user_name.clone(),
            status: self.status.clone(),
            admin_id: self.admin_id.clone(),
            admin_name: self.admin_name.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_message_at: self.last_message_at,
            unread_count_user: 0,
            unread_count_admin: self.unread_count_admin.unwrap_or(0),
            last_message: self.last_message.clone(),
            last_message_sender: self.last_message_sender.clone(),
            resolved: self.resolved.unwrap_or(false),
        }
    }
}

// --- Messages ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    #[serde(deserialize_with = "lenient::id")]
    pub id: String,
    #[serde(deserialize_with = "lenient::id")]
    pub conversation_id: String,
    pub sender_type: SenderType,
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default, with = "lenient::flag")]
    pub is_read: bool,
    #[serde(default = "Utc::now", deserialize_with = "lenient::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "lenient::flag")]
    pub is_admin_note: bool,
    #[serde(default)]
    pub admin_note: Option<String>,
    /// Client-assigned correlation key for optimistic sends.
    #[serde(skip)]
    pub temp_id: Option<String>,
    #[serde(skip)]
    pub delivery: DeliveryState,
}

impl ChatMessage {
    pub fn is_pending(&self) -> bool {
        self.delivery == DeliveryState::Pending
    }

    pub fn is_failed(&self) -> bool {
        self.delivery == DeliveryState::Failed
    }

    pub fn is_settled(&self) -> bool {
        self.delivery == DeliveryState::Settled
    }

    /// Text used for conversation previews and alert bodies.
    pub fn preview_text(&self) -> String {
        if !self.message.trim().is_empty() {
            return self.message.clone();
        }
        match self.message_type {
            MessageType::Text => String::new(),
            MessageType::Image => "[Image]".to_string(),
            MessageType::Audio => "[Audio]".to_string(),
            MessageType::Video => "[Video]".to_string(),
        }
    }

    /// Whether `incoming` is the server echo of this optimistic message:
    /// same conversation, sender type and exact text, created within `window`.
    pub fn is_echo_of_optimistic(&self, incoming: &ChatMessage, window: chrono::Duration) -> bool {
        if self.temp_id.is_none() || self.is_failed() {
            return false;
        }
        let drift = incoming.created_at - self.created_at;
        self.conversation_id == incoming.conversation_id
            && self.sender_type == incoming.sender_type
            && self.message == incoming.message
            && drift <= window
            && drift >= -window
    }
}

// --- REST envelopes ---

/// Response envelope used by every backend endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default, with = "lenient::flag")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

/// Result of an attachment upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadedFile {
    pub file_url: String,
    #[serde(default)]
    pub file_type: String,
}

/// Lenient field (de)serializers for the backend's loosely typed JSON.
pub mod lenient {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];

    fn as_flag(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_i64() == Some(1),
            Value::String(s) => matches!(s.trim(), "1" | "true"),
            _ => false,
        }
    }

    fn as_count(value: &Value) -> Option<u32> {
        match value {
            Value::Number(n) => Some(
                n.as_u64()
                    .map(|v| v.min(u32::MAX as u64) as u32)
                    .unwrap_or(0),
            ),
            Value::String(s) => Some(s.trim().parse().unwrap_or(0)),
            _ => None,
        }
    }

    fn as_id(value: Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Parse the timestamp shapes the backend emits: RFC 3339, naive
    /// `YYYY-MM-DD HH:MM:SS` (taken as UTC), or epoch seconds/millis.
    pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }

    fn epoch(value: i64) -> Option<DateTime<Utc>> {
        if value > 1_000_000_000_000 {
            Utc.timestamp_millis_opt(value).single()
        } else {
            Utc.timestamp_opt(value, 0).single()
        }
    }

    fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
        match value {
            Value::String(s) => parse_timestamp(s),
            Value::Number(n) => n.as_i64().and_then(epoch),
            _ => None,
        }
    }

    pub mod flag {
        use super::*;

        pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_u8(u8::from(*value))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
            Ok(as_flag(&Value::deserialize(deserializer)?))
        }
    }

    pub mod count {
        use super::*;

        pub fn serialize<S: Serializer>(value: &u32, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_u32(*value)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
            Ok(as_count(&Value::deserialize(deserializer)?).unwrap_or(0))
        }
    }

    pub fn opt_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Null => None,
            other => Some(as_flag(&other)),
        })
    }

    pub fn opt_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
        Ok(as_count(&Value::deserialize(deserializer)?))
    }

    pub fn id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        as_id(Value::deserialize(deserializer)?)
            .ok_or_else(|| D::Error::custom("expected a string or numeric id"))
    }

    pub fn opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        Ok(as_id(Value::deserialize(deserializer)?))
    }

    pub fn timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        Ok(as_timestamp(&Value::deserialize(deserializer)?).unwrap_or_else(Utc::now))
    }

    pub fn opt_timestamp<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Ok(as_timestamp(&Value::deserialize(deserializer)?))
    }
}
