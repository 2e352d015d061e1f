//! Time-boxed local cache over [`Storage`].
//!
//! Cached lists only seed the UI until the REST response arrives; the backend
//! stays authoritative.

use std::time::Duration;

use chatdesk_shared::{ChatMessage, Conversation};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::storage::Storage;

pub const CONVERSATIONS_TTL: Duration = Duration::from_secs(60);
pub const MESSAGES_TTL: Duration = Duration::from_secs(30);

const CONVERSATIONS_KEY: &str = "chat_conversations";

#[derive(Debug, Serialize, Deserialize)]
struct CachedEntry<T> {
    stored_at: DateTime<Utc>,
    value: T,
}

#[derive(Debug, Clone)]
pub struct TtlCache {
    storage: Storage,
}

impl TtlCache {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Read a value stored less than `ttl` ago. Expired entries are removed.
    pub fn read<T: DeserializeOwned>(&self, key: &str, ttl: Duration) -> Option<T> {
        let entry: CachedEntry<T> = self.storage.load(key)?;
        let age = (Utc::now() - entry.stored_at).to_std().unwrap_or_default();
        if age < ttl {
            Some(entry.value)
        } else {
            tracing::debug!(key, ?age, "cache entry expired");
            self.storage.remove(key);
            None
        }
    }

    pub fn write<T: Serialize>(&self, key: &str, value: &T) {
        let entry = CachedEntry {
            stored_at: Utc::now(),
            value,
        };
        if let Err(e) = self.storage.save(key, &entry) {
            tracing::warn!(key, error = %e, "failed to write cache entry");
        }
    }

    pub fn conversations(&self) -> Option<Vec<Conversation>> {
        self.read(CONVERSATIONS_KEY, CONVERSATIONS_TTL)
    }

    pub fn store_conversations(&self, conversations: &[Conversation]) {
        self.write(CONVERSATIONS_KEY, &conversations);
    }

    pub fn messages(&self, conversation_id: &str) -> Option<Vec<ChatMessage>> {
        self.read(&messages_key(conversation_id), MESSAGES_TTL)
    }

    /// Cache the settled messages of a conversation. Optimistic entries are
    /// transient and never written.
    pub fn store_messages(&self, conversation_id: &str, messages: &[ChatMessage]) {
        let settled: Vec<&ChatMessage> = messages
            .iter()
            .filter(|m| m.temp_id.is_none() && m.is_settled())
            .collect();
        self.write(&messages_key(conversation_id), &settled);
    }
}

fn messages_key(conversation_id: &str) -> String {
    format!("chat_messages_{conversation_id}")
}
