//! Message list for the selected conversation.
//!
//! Messages are kept sorted by `created_at` ascending and unique by id.
//! Locally composed messages carry a `temp_id` until the backend confirms them.

use std::collections::HashMap;

use chatdesk_shared::{ChatMessage, DeliveryState};

/// What happened to a message offered to [`MessageList::merge_incoming`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A message with the same id is already present; nothing changed.
    Duplicate,
    /// The message replaced the optimistic entry carrying `temp_id`.
    Reconciled { temp_id: String },
    /// The message was appended.
    Inserted,
}

/// Messages of one conversation.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MessageList {
    conversation_id: Option<String>,
    /// All messages, sorted by created_at ascending.
    messages: Vec<ChatMessage>,
    /// Whether history has been fetched from the REST API.
    is_loaded: bool,
}

impl MessageList {
    pub fn for_conversation(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(conversation_id.into()),
            ..Self::default()
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn find_by_temp_id(&self, temp_id: &str) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .find(|m| m.temp_id.as_deref() == Some(temp_id))
    }

    /// Add a message, maintaining sort order by created_at.
    /// Returns false if a message with the same ID already exists.
    pub fn add_message(&mut self, msg: ChatMessage) -> bool {
        if self.messages.iter().any(|m| m.id == msg.id) {
            return false;
        }
        self.messages.push(msg);
        self.resort();
        true
    }

    /// Merge a message delivered by the stream.
    ///
    /// Duplicates by id are ignored. A message that echoes an in-flight
    /// optimistic send replaces that entry; anything else is inserted. The
    /// list is re-sorted either way, since the echo carries the server's
    /// timestamp.
    pub fn merge_incoming(&mut self, msg: ChatMessage, echo_window: chrono::Duration) -> MergeOutcome {
        if self.messages.iter().any(|m| m.id == msg.id) {
            return MergeOutcome::Duplicate;
        }

        if let Some(slot) = self
            .messages
            .iter_mut()
            .find(|m| m.is_echo_of_optimistic(&msg, echo_window))
        {
            let temp_id = slot.temp_id.clone().unwrap_or_default();
            *slot = msg;
            self.resort();
            return MergeOutcome::Reconciled { temp_id };
        }

        self.add_message(msg);
        MergeOutcome::Inserted
    }

    /// Replace the list with fetched history, keeping local optimistic entries.
    pub fn set_history(&mut self, history: Vec<ChatMessage>, echo_window: chrono::Duration) {
        self.messages = merge_messages(&self.messages, history, echo_window);
        self.is_loaded = true;
    }

    /// Append a locally composed message.
    pub fn push_optimistic(&mut self, msg: ChatMessage) {
        self.messages.push(msg);
        self.resort();
    }

    /// Swap the optimistic entry for the backend's record.
    ///
    /// If the record already arrived through the stream, the optimistic entry
    /// is dropped instead so the id stays unique.
    pub fn replace_temp(&mut self, temp_id: &str, record: ChatMessage) -> bool {
        let Some(pos) = self.position_of_temp(temp_id) else {
            return false;
        };
        if self.messages.iter().any(|m| m.id == record.id) {
            self.messages.remove(pos);
        } else {
            self.messages[pos] = record;
            self.resort();
        }
        true
    }

    /// Mark an optimistic entry delivered when the backend returned no record.
    pub fn settle_temp(&mut self, temp_id: &str) -> bool {
        self.set_delivery(temp_id, DeliveryState::Settled)
    }

    pub fn mark_failed(&mut self, temp_id: &str) -> bool {
        self.set_delivery(temp_id, DeliveryState::Failed)
    }

    pub fn mark_pending(&mut self, temp_id: &str) -> bool {
        self.set_delivery(temp_id, DeliveryState::Pending)
    }

    pub fn remove_temp(&mut self, temp_id: &str) -> Option<ChatMessage> {
        let pos = self.position_of_temp(temp_id)?;
        Some(self.messages.remove(pos))
    }

    /// Stable, so equal timestamps keep arrival order.
    fn resort(&mut self) {
        self.messages.sort_by_key(|m| m.created_at);
    }

    fn position_of_temp(&self, temp_id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.temp_id.as_deref() == Some(temp_id))
    }

    fn set_delivery(&mut self, temp_id: &str, state: DeliveryState) -> bool {
        match self
            .messages
            .iter_mut()
            .find(|m| m.temp_id.as_deref() == Some(temp_id))
        {
            Some(msg) => {
                msg.delivery = state;
                true
            }
            None => false,
        }
    }
}

/// Merge a fetched batch into the current list, keyed by id.
///
/// Fetched records win over local copies with the same id. Local records the
/// batch does not mention are kept (the batch may be a single page), and
/// local optimistic entries survive unless the batch carries their echo.
/// The result is sorted by `created_at`.
pub fn merge_messages(
    current: &[ChatMessage],
    incoming: Vec<ChatMessage>,
    echo_window: chrono::Duration,
) -> Vec<ChatMessage> {
    let mut merged: Vec<ChatMessage> = Vec::with_capacity(current.len() + incoming.len());
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for msg in current {
        if let Some(&idx) = by_id.get(&msg.id) {
            merged[idx] = msg.clone();
        } else {
            by_id.insert(msg.id.clone(), merged.len());
            merged.push(msg.clone());
        }
    }

    for msg in incoming {
        if let Some(&idx) = by_id.get(&msg.id) {
            merged[idx] = msg;
            continue;
        }
        let echo_of = merged
            .iter()
            .position(|m| m.is_echo_of_optimistic(&msg, echo_window));
        match echo_of {
            Some(idx) => {
                by_id.remove(&merged[idx].id);
                by_id.insert(msg.id.clone(), idx);
                merged[idx] = msg;
            }
            None => {
                by_id.insert(msg.id.clone(), merged.len());
                merged.push(msg);
            }
        }
    }

    merged.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    merged
}
