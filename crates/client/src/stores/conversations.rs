//! Conversation list store.

use std::collections::{HashMap, HashSet};

use chatdesk_shared::{ChatMessage, Conversation, ConversationUpdate, SenderType};

/// Result of applying a stream update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The conversation was unknown and has been added at the top.
    Created,
    Merged,
}

/// Ordered list of conversations, unique by id. Entries are never removed
/// client-side.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConversationList {
    items: Vec<Conversation>,
}

impl ConversationList {
    pub fn items(&self) -> &[Conversation] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.items.iter().find(|c| c.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.items.iter_mut().find(|c| c.id == id)
    }

    /// Reconcile with a freshly fetched list.
    pub fn replace_all(&mut self, incoming: Vec<Conversation>) {
        self.items = merge_conversations(&self.items, incoming);
    }

    /// Merge a partial update, synthesizing a record for unseen ids.
    pub fn apply_update(&mut self, update: &ConversationUpdate) -> UpdateOutcome {
        match self.get_mut(&update.id) {
            Some(existing) => {
                existing.apply_update(update);
                UpdateOutcome::Merged
            }
            None => {
                self.items.insert(0, update.to_conversation());
                UpdateOutcome::Created
            }
        }
    }

    /// Fold a delivered message into its conversation's preview.
    ///
    /// User messages bump the admin unread badge unless the conversation is the
    /// one currently open. Returns false when the conversation is unknown.
    pub fn record_message(&mut self, msg: &ChatMessage, selected: Option<&str>) -> bool {
        let is_open = selected == Some(msg.conversation_id.as_str());
        let Some(conv) = self.get_mut(&msg.conversation_id) else {
            return false;
        };
        conv.record_message(msg);
        if msg.sender_type == SenderType::User && !is_open {
            conv.unread_count_admin = conv.unread_count_admin.saturating_add(1);
        }
        true
    }

    pub fn clear_unread_admin(&mut self, id: &str) -> bool {
        match self.get_mut(id) {
            Some(conv) => {
                conv.unread_count_admin = 0;
                true
            }
            None => false,
        }
    }

    pub fn set_resolved(&mut self, id: &str, resolved: bool) -> bool {
        match self.get_mut(id) {
            Some(conv) => {
                conv.resolved = resolved;
                true
            }
            None => false,
        }
    }
}

/// Merge a fetched list into the current one, keyed by id.
///
/// The fetched list supplies the order and wins field-by-field, except that a
/// blank preview never overwrites a known one. Conversations only known
/// locally are kept ahead of the fetched ones.
pub fn merge_conversations(current: &[Conversation], incoming: Vec<Conversation>) -> Vec<Conversation> {
    let local: HashMap<&str, &Conversation> = current.iter().map(|c| (c.id.as_str(), c)).collect();
    let mut seen: HashSet<String> = HashSet::with_capacity(incoming.len());
    let mut fetched: Vec<Conversation> = Vec::with_capacity(incoming.len());

    for mut conv in incoming {
        if !seen.insert(conv.id.clone()) {
            continue;
        }
        if let Some(previous) = local.get(conv.id.as_str()) {
            if conv.last_message.as_deref().map_or(true, |t| t.trim().is_empty()) {
                conv.last_message = previous.last_message.clone();
                if conv.last_message_sender.is_none() {
                    conv.last_message_sender = previous.last_message_sender.clone();
                }
            }
        }
        fetched.push(conv);
    }

    let mut merged: Vec<Conversation> = current
        .iter()
        .filter(|c| !seen.contains(&c.id))
        .cloned()
        .collect();
    merged.extend(fetched);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conv(value: serde_json::Value) -> Conversation {
        serde_json::from_value(value).unwrap()
    }

    fn user_message(conversation_id: &str, text: &str) -> ChatMessage {
        serde_json::from_value(json!({
            "id": format!("m-{text}"),
            "conversation_id": conversation_id,
            "sender_type": "user",
            "message": text,
        }))
        .unwrap()
    }

    #[test]
    fn unknown_update_is_prepended_with_defaults() {
        let mut list = ConversationList::default();
        list.replace_all(vec![conv(json!({"id": "c1"}))]);

        let update: ConversationUpdate = serde_json::from_value(json!({
            "conversation_id": "c2",
            "user_name": "Sari",
            "unread_count_admin": 1,
            "unread_count_user": 9
        }))
        .unwrap();
        assert_eq!(list.apply_update(&update), UpdateOutcome::Created);
        assert_eq!(list.items()[0].id, "c2");
        assert_eq!(list.items()[0].unread_count_user, 0);
        assert!(!list.items()[0].resolved);
        assert_eq!(list.apply_update(&update), UpdateOutcome::Merged);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn user_message_bumps_unread_only_when_not_open() {
        let mut list = ConversationList::default();
        list.replace_all(vec![conv(json!({"id": "c1", "resolved": 1})), conv(json!({"id": "c2"}))]);

        assert!(list.record_message(&user_message("c1", "halo"), Some("c2")));
        assert!(list.record_message(&user_message("c2", "hai"), Some("c2")));
        assert!(!list.record_message(&user_message("c3", "?"), None));

        let c1 = list.get("c1").unwrap();
        assert_eq!(c1.unread_count_admin, 1);
        assert!(!c1.resolved);
        assert_eq!(c1.last_message.as_deref(), Some("halo"));
        assert_eq!(list.get("c2").unwrap().unread_count_admin, 0);
    }

    #[test]
    fn fetched_list_keeps_known_previews_and_local_only_entries() {
        let current = vec![
            conv(json!({"id": "local", "user_name": "New"})),
            conv(json!({"id": "c1", "last_message": "halo", "last_message_sender": "user"})),
        ];
        let incoming = vec![
            conv(json!({"id": "c1", "last_message": "", "status": "active"})),
            conv(json!({"id": "c2", "last_message": "hai"})),
        ];

        let merged = merge_conversations(&current, incoming);
        let ids: Vec<&str> = merged.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["local", "c1", "c2"]);
        assert_eq!(merged[1].last_message.as_deref(), Some("halo"));
        assert_eq!(merged[1].last_message_sender.as_deref(), Some("user"));
        assert_eq!(merged[1].status.as_deref(), Some("active"));
    }
}
